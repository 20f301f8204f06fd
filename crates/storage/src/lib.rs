use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{ChatId, ChatType, EventId, MessageId, NotificationId, NotificationKind, UserId},
    protocol::{ChatSummary, MessagePayload, NotificationPayload},
};

mod document;
mod error;
mod sql;

pub use document::DocumentStore;
pub use error::{StoreError, StoreResult};
pub use sql::SqlStore;

pub const DEFAULT_PAGE_SIZE: i64 = 30;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Relational,
    Document,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::Document => "document",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub id: ChatId,
    pub chat_type: ChatType,
    pub event_id: EventId,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl ChatRecord {
    pub fn summary(&self) -> ChatSummary {
        ChatSummary {
            id: self.id,
            chat_type: self.chat_type,
            event_id: self.event_id,
            created_at: self.created_at,
        }
    }
}

/// Membership row of a user in a chat. Soft-deleted rows are never returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberState {
    /// `left_at` is null.
    pub active: bool,
    pub is_blocked: bool,
    pub blocked_by: Option<UserId>,
    pub blocked_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub reporter_id: UserId,
    pub reported_user_id: UserId,
    pub event_id: EventId,
    pub chat_id: ChatId,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct NotificationDraft {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
}

/// History window: `limit` rows newest-first starting `offset` rows back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn clamped(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::clamped(None, None)
    }
}

/// Persistence contract for the chat core. One implementation is chosen at
/// startup and used for the lifetime of the process.
#[async_trait]
pub trait ChatStore: Send + Sync {
    fn backend(&self) -> Backend;

    async fn health_check(&self) -> StoreResult<()>;

    async fn create_user(&self, username: &str) -> StoreResult<UserId>;
    async fn user_exists(&self, user_id: UserId) -> StoreResult<bool>;

    async fn create_event(&self, creator_id: UserId, title: &str) -> StoreResult<EventId>;
    async fn event_creator(&self, event_id: EventId) -> StoreResult<Option<UserId>>;
    async fn join_event(&self, event_id: EventId, user_id: UserId) -> StoreResult<()>;
    /// Marks participation LEFT and leaves every chat of the event.
    async fn leave_event(&self, event_id: EventId, user_id: UserId) -> StoreResult<()>;
    async fn is_joined_participant(&self, event_id: EventId, user_id: UserId)
        -> StoreResult<bool>;

    /// Creator of the event or an active JOINED participant. Unknown events
    /// are simply not accessible.
    async fn can_access_event(&self, event_id: EventId, user_id: UserId) -> StoreResult<bool>;
    async fn can_access_chat(&self, chat_id: ChatId, user_id: UserId) -> StoreResult<bool>;

    /// Insert-or-get of the single group chat of an event, then an active
    /// membership upsert for `user_id`.
    async fn ensure_event_group_chat(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreResult<ChatId>;
    async fn find_chat(&self, chat_id: ChatId) -> StoreResult<Option<ChatRecord>>;
    async fn list_event_chats(&self, event_id: EventId) -> StoreResult<Vec<ChatRecord>>;
    async fn create_direct_chat(
        &self,
        event_id: EventId,
        creator_id: UserId,
        participant_id: UserId,
    ) -> StoreResult<ChatId>;

    async fn upsert_active_member(&self, chat_id: ChatId, user_id: UserId) -> StoreResult<()>;
    async fn member_state(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> StoreResult<Option<MemberState>>;
    async fn block_member(
        &self,
        chat_id: ChatId,
        target_id: UserId,
        blocked_by: UserId,
        reason: Option<&str>,
    ) -> StoreResult<()>;
    async fn report_user(&self, report: NewReport) -> StoreResult<()>;

    /// Returned oldest-first within the page.
    async fn list_messages(&self, chat_id: ChatId, page: Page) -> StoreResult<Vec<MessagePayload>>;
    async fn create_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
    ) -> StoreResult<MessagePayload>;
    async fn get_message(&self, message_id: MessageId) -> StoreResult<Option<MessagePayload>>;
    /// SENT -> DELIVERED. Returns whether a transition happened.
    async fn mark_delivered(&self, message_id: MessageId) -> StoreResult<bool>;
    /// SENT|DELIVERED -> SEEN for a message of `chat_id`. Returns whether a
    /// transition happened.
    async fn mark_seen(&self, chat_id: ChatId, message_id: MessageId) -> StoreResult<bool>;

    async fn list_notifications(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> StoreResult<Vec<NotificationPayload>>;
    async fn mark_notification_read(
        &self,
        user_id: UserId,
        notification_id: NotificationId,
    ) -> StoreResult<Option<NotificationPayload>>;
}

/// Write side of the notification collaborator.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Enqueues `draft` for every active member of the chat except the
    /// sender. Returns the number of notifications written.
    async fn notify_chat_members(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        draft: &NotificationDraft,
    ) -> StoreResult<u64>;
    async fn notify_user(&self, user_id: UserId, draft: &NotificationDraft) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct StoreHandles {
    pub chats: Arc<dyn ChatStore>,
    pub notifications: Arc<dyn NotificationSink>,
}

impl StoreHandles {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ChatStore + NotificationSink + 'static,
    {
        Self {
            chats: store.clone(),
            notifications: store,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StoreConfig {
    Relational {
        database_url: String,
        max_connections: u32,
    },
    Document {
        snapshot_path: Option<PathBuf>,
    },
}

pub async fn open_store(config: &StoreConfig) -> StoreResult<StoreHandles> {
    let handles = match config {
        StoreConfig::Relational {
            database_url,
            max_connections,
        } => StoreHandles::from_store(Arc::new(
            SqlStore::connect(database_url, *max_connections).await?,
        )),
        StoreConfig::Document { snapshot_path } => StoreHandles::from_store(Arc::new(
            DocumentStore::open(snapshot_path.clone()).await?,
        )),
    };
    tracing::info!(backend = handles.chats.backend().as_str(), "chat store ready");
    Ok(handles)
}
