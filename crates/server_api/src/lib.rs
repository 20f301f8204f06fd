use std::{sync::Arc, time::Duration};

use shared::error::{ApiError, ErrorCode};
use storage::{ChatStore, NotificationSink, StoreError, StoreHandles};

pub mod access;
pub mod auth;
pub mod chats;
pub mod dedup;
pub mod delivery;
pub mod events;
pub mod notifications;
pub mod rate_limit;
pub mod realtime;
pub mod rooms;
pub mod sanitize;

pub use dedup::RecentSends;
pub use rate_limit::RateLimiter;
pub use realtime::ChatSession;
pub use rooms::{ChatRooms, Subscription};

#[derive(Debug, Clone, Copy)]
pub struct ChatLimits {
    pub socket_messages_per_minute: u32,
    pub http_messages_per_minute: u32,
    pub dedup_window: Duration,
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self {
            socket_messages_per_minute: 40,
            http_messages_per_minute: 20,
            dedup_window: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct ApiContext {
    pub store: Arc<dyn ChatStore>,
    pub notifications: Arc<dyn NotificationSink>,
    pub rooms: ChatRooms,
    pub socket_limiter: RateLimiter,
    pub http_limiter: RateLimiter,
    pub recent_sends: RecentSends,
}

impl ApiContext {
    pub fn new(handles: StoreHandles, limits: ChatLimits) -> Self {
        Self {
            store: handles.chats,
            notifications: handles.notifications,
            rooms: ChatRooms::default(),
            socket_limiter: RateLimiter::per_minute(limits.socket_messages_per_minute),
            http_limiter: RateLimiter::per_minute(limits.http_messages_per_minute),
            recent_sends: RecentSends::new(limits.dedup_window),
        }
    }
}

/// Maps a storage failure onto the caller-visible taxonomy. Anything that is
/// not a caller mistake is logged here and leaves as a generic error.
pub fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::InvalidChatId(_) => ApiError::validation("Invalid chat id"),
        StoreError::Unsupported(_) => unavailable(),
        StoreError::NotFound(what) => ApiError::not_found(format!("{} not found", capitalize(what))),
        other => {
            tracing::error!(error = %other, "store operation failed");
            ApiError::internal()
        }
    }
}

pub(crate) fn unavailable() -> ApiError {
    ApiError::new(ErrorCode::Unavailable, "Relational store is not configured")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
pub(crate) mod test_support;
