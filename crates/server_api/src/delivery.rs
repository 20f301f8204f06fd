use shared::{
    domain::{ChatId, ChatType, MessageId, MessageStatus, NotificationKind, UserId},
    error::{ApiError, ErrorCode},
    protocol::{MessagePayload, MessageStatusPayload, ServerEvent},
};
use storage::{ChatRecord, NotificationDraft, StoreError};
use thiserror::Error;

use crate::{
    access::authorize_chat,
    dedup::Claim,
    sanitize::{sanitize_text, MAX_MESSAGE_CHARS},
    store_error, ApiContext,
};

/// Why a send was refused. The display text is what a realtime client sees
/// in its negative ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendRejection {
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Invalid chat room")]
    InvalidChat,
    #[error("Message cannot be empty")]
    EmptyContent,
    #[error("Forbidden")]
    Forbidden,
    #[error("Not a chat member")]
    NotMember,
    #[error("Blocked in this chat")]
    Blocked,
    #[error("Send failed")]
    Failed,
}

impl SendRejection {
    /// Wording used by the HTTP endpoint.
    pub fn into_http(self) -> ApiError {
        match self {
            Self::RateLimited => ApiError::rate_limited(),
            Self::InvalidChat => ApiError::validation("Invalid chat id"),
            Self::EmptyContent => ApiError::validation("Message content is required"),
            Self::Forbidden => ApiError::new(ErrorCode::Forbidden, "Unauthorized chat access"),
            Self::NotMember => ApiError::new(ErrorCode::Forbidden, "Not a chat member"),
            Self::Blocked => ApiError::new(ErrorCode::Forbidden, "You are blocked in this chat"),
            Self::Failed => ApiError::internal(),
        }
    }
}

fn rejection(err: StoreError) -> SendRejection {
    match err {
        StoreError::InvalidChatId(_) => SendRejection::InvalidChat,
        other => {
            tracing::error!(error = %other, "send aborted by store failure");
            SendRejection::Failed
        }
    }
}

/// Shared admission checks for both transports. Group chats re-add the
/// sender as an active member when `rejoin_group` is set.
async fn admit(
    ctx: &ApiContext,
    sender: UserId,
    chat_id: ChatId,
    rejoin_group: bool,
) -> Result<ChatRecord, SendRejection> {
    let store = ctx.store.as_ref();
    let chat = authorize_chat(store, chat_id, sender)
        .await
        .map_err(rejection)?
        .ok_or(SendRejection::Forbidden)?;

    if rejoin_group && chat.chat_type == ChatType::EventGroup {
        store
            .upsert_active_member(chat_id, sender)
            .await
            .map_err(rejection)?;
    }

    let member = store
        .member_state(chat_id, sender)
        .await
        .map_err(rejection)?
        .filter(|member| member.active)
        .ok_or(SendRejection::NotMember)?;
    if member.is_blocked {
        return Err(SendRejection::Blocked);
    }
    Ok(chat)
}

/// Persists exactly once per `(sender, chat, client_temp_id)` inside the
/// dedup window. The flag is true when a fresh row was written.
async fn persist(
    ctx: &ApiContext,
    sender: UserId,
    chat_id: ChatId,
    content: &str,
    client_temp_id: Option<&str>,
) -> Result<(MessagePayload, bool), SendRejection> {
    match ctx.recent_sends.claim(sender, chat_id, client_temp_id).await {
        Claim::Duplicate(message) => {
            tracing::info!(
                user_id = %sender,
                chat_id = %chat_id,
                message_id = %message.id,
                "duplicate send collapsed onto persisted message"
            );
            Ok((message, false))
        }
        Claim::Fresh(ticket) => {
            let message = ctx
                .store
                .create_message(chat_id, sender, content)
                .await
                .map_err(rejection)?;
            ticket.complete(&message);
            Ok((message, true))
        }
    }
}

async fn notify_members(ctx: &ApiContext, message: &MessagePayload) {
    let draft = NotificationDraft {
        kind: NotificationKind::NewMessage,
        title: "New message".to_string(),
        body: "New message in your chat".to_string(),
        payload: serde_json::json!({
            "chat_id": message.chat_id,
            "message_id": message.id,
            "sender_id": message.sender_id,
        }),
    };
    match ctx
        .notifications
        .notify_chat_members(message.chat_id, message.sender_id, &draft)
        .await
    {
        Ok(written) => tracing::debug!(chat_id = %message.chat_id, written, "queued notifications"),
        Err(err) => tracing::warn!(
            chat_id = %message.chat_id,
            error = %err,
            "notification fan-out failed"
        ),
    }
}

fn status_event(message: &MessagePayload, status: MessageStatus) -> ServerEvent {
    ServerEvent::MessageStatus(MessageStatusPayload {
        message_id: message.id,
        chat_id: message.chat_id,
        status,
    })
}

/// Realtime send: persist, broadcast `message:new`, move to DELIVERED and
/// broadcast the status, then fan out notifications. Rejections happen
/// before anything is written.
pub async fn send_realtime(
    ctx: &ApiContext,
    sender: UserId,
    chat_id: ChatId,
    content: &str,
    client_temp_id: Option<&str>,
) -> Result<MessagePayload, SendRejection> {
    if !ctx.socket_limiter.check(sender).await {
        return Err(SendRejection::RateLimited);
    }
    let content = sanitize_text(content, MAX_MESSAGE_CHARS);
    if content.is_empty() {
        return Err(SendRejection::EmptyContent);
    }
    admit(ctx, sender, chat_id, false).await?;

    let (message, fresh) = persist(ctx, sender, chat_id, &content, client_temp_id).await?;
    if !fresh {
        return Ok(message);
    }

    let reached = ctx
        .rooms
        .publish(chat_id, ServerEvent::MessageNew(message.clone()));
    tracing::debug!(
        user_id = %sender,
        chat_id = %chat_id,
        message_id = %message.id,
        reached,
        "message broadcast"
    );

    match ctx.store.mark_delivered(message.id).await {
        Ok(true) => {
            ctx.rooms
                .publish(chat_id, status_event(&message, MessageStatus::Delivered));
        }
        Ok(false) => {}
        Err(err) => tracing::warn!(
            message_id = %message.id,
            error = %err,
            "failed to record delivery"
        ),
    }

    notify_members(ctx, &message).await;
    Ok(message)
}

/// HTTP fallback send: persists at SENT and notifies, without broadcasting
/// or advancing delivery state.
pub async fn post_message(
    ctx: &ApiContext,
    sender: UserId,
    chat_id: ChatId,
    content: &str,
    client_temp_id: Option<&str>,
) -> Result<MessagePayload, ApiError> {
    let content = sanitize_text(content, MAX_MESSAGE_CHARS);
    if content.is_empty() {
        return Err(SendRejection::EmptyContent.into_http());
    }
    admit(ctx, sender, chat_id, true)
        .await
        .map_err(SendRejection::into_http)?;

    let (message, fresh) = persist(ctx, sender, chat_id, &content, client_temp_id)
        .await
        .map_err(SendRejection::into_http)?;
    if fresh {
        notify_members(ctx, &message).await;
    }
    Ok(message)
}

/// Seen acknowledgement. Returns the broadcast status when a transition
/// happened; repeating it is a no-op.
pub async fn mark_seen(
    ctx: &ApiContext,
    user_id: UserId,
    chat_id: ChatId,
    message_id: MessageId,
) -> Result<Option<MessageStatusPayload>, ApiError> {
    let store = ctx.store.as_ref();
    if authorize_chat(store, chat_id, user_id)
        .await
        .map_err(store_error)?
        .is_none()
    {
        return Err(ApiError::forbidden());
    }
    if !store
        .mark_seen(chat_id, message_id)
        .await
        .map_err(store_error)?
    {
        return Ok(None);
    }
    let status = MessageStatusPayload {
        message_id,
        chat_id,
        status: MessageStatus::Seen,
    };
    ctx.rooms
        .publish(chat_id, ServerEvent::MessageStatus(status.clone()));
    Ok(Some(status))
}

#[cfg(test)]
#[path = "tests/delivery_tests.rs"]
mod tests;
