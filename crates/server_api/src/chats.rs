use shared::{
    domain::{ChatId, EventId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{ChatSummary, MessagePayload},
};
use storage::{Backend, NewReport, Page};

use crate::{
    access::{authorize_chat, visible_event_chats},
    sanitize::{sanitize_text, MAX_BLOCK_REASON_CHARS, MAX_REPORT_REASON_CHARS},
    store_error, unavailable, ApiContext,
};

const DEFAULT_BLOCK_REASON: &str = "Blocked by user";

/// Lists the event's chats, provisioning the group chat on first access.
pub async fn list_event_chats(
    ctx: &ApiContext,
    user_id: UserId,
    event_id: EventId,
) -> Result<Vec<ChatSummary>, ApiError> {
    let store = ctx.store.as_ref();
    if !store
        .can_access_event(event_id, user_id)
        .await
        .map_err(store_error)?
    {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "Not allowed to access event chats",
        ));
    }
    store
        .ensure_event_group_chat(event_id, user_id)
        .await
        .map_err(store_error)?;
    let chats = visible_event_chats(store, event_id, user_id)
        .await
        .map_err(store_error)?;
    Ok(chats.iter().map(|chat| chat.summary()).collect())
}

pub async fn create_direct_chat(
    ctx: &ApiContext,
    creator_id: UserId,
    event_id: EventId,
    participant_id: UserId,
) -> Result<ChatId, ApiError> {
    let store = ctx.store.as_ref();
    if store.backend() == Backend::Document {
        return Err(unavailable());
    }
    if !store.user_exists(participant_id).await.map_err(store_error)? {
        return Err(ApiError::not_found("Participant user not found"));
    }
    if store.event_creator(event_id).await.map_err(store_error)? != Some(creator_id) {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "Only event creator can create direct chats",
        ));
    }
    if !store
        .is_joined_participant(event_id, participant_id)
        .await
        .map_err(store_error)?
    {
        return Err(ApiError::not_found("Participant not found in this event"));
    }

    let chat_id = store
        .create_direct_chat(event_id, creator_id, participant_id)
        .await
        .map_err(store_error)?;
    tracing::info!(
        event_id = %event_id,
        chat_id = %chat_id,
        user_id = %creator_id,
        participant_id = %participant_id,
        "direct chat created"
    );
    Ok(chat_id)
}

/// One history page: the `page.limit` messages before the `page.offset`
/// most recent, oldest first.
pub async fn list_messages(
    ctx: &ApiContext,
    user_id: UserId,
    chat_id: ChatId,
    page: Page,
) -> Result<Vec<MessagePayload>, ApiError> {
    let store = ctx.store.as_ref();
    if authorize_chat(store, chat_id, user_id)
        .await
        .map_err(store_error)?
        .is_none()
    {
        return Err(ApiError::new(ErrorCode::Forbidden, "Unauthorized chat access"));
    }
    store.list_messages(chat_id, page).await.map_err(store_error)
}

pub async fn block_user(
    ctx: &ApiContext,
    blocker_id: UserId,
    chat_id: ChatId,
    target_id: UserId,
    reason: Option<&str>,
) -> Result<(), ApiError> {
    let store = ctx.store.as_ref();
    if store.backend() == Backend::Document {
        return Err(unavailable());
    }
    if !store.user_exists(target_id).await.map_err(store_error)? {
        return Err(ApiError::not_found("Target user not found"));
    }
    if store
        .member_state(chat_id, blocker_id)
        .await
        .map_err(store_error)?
        .is_none()
    {
        return Err(ApiError::new(ErrorCode::Forbidden, "Not a chat member"));
    }

    let reason = sanitize_text(reason.unwrap_or_default(), MAX_BLOCK_REASON_CHARS);
    let reason = if reason.is_empty() {
        DEFAULT_BLOCK_REASON.to_string()
    } else {
        reason
    };
    store
        .block_member(chat_id, target_id, blocker_id, Some(&reason))
        .await
        .map_err(store_error)?;
    tracing::warn!(
        chat_id = %chat_id,
        user_id = %blocker_id,
        target_id = %target_id,
        "user blocked in chat"
    );
    Ok(())
}

pub async fn report_user(
    ctx: &ApiContext,
    reporter_id: UserId,
    chat_id: ChatId,
    target_id: UserId,
    reason: Option<&str>,
) -> Result<(), ApiError> {
    let store = ctx.store.as_ref();
    if store.backend() == Backend::Document {
        return Err(unavailable());
    }
    if !store.user_exists(target_id).await.map_err(store_error)? {
        return Err(ApiError::not_found("Target user not found"));
    }
    let reason = sanitize_text(reason.unwrap_or_default(), MAX_REPORT_REASON_CHARS);
    if reason.is_empty() {
        return Err(ApiError::validation("Report reason is required"));
    }
    let chat = store
        .find_chat(chat_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::not_found("Chat not found"))?;

    store
        .report_user(NewReport {
            reporter_id,
            reported_user_id: target_id,
            event_id: chat.event_id,
            chat_id,
            reason,
        })
        .await
        .map_err(store_error)?;
    tracing::warn!(
        chat_id = %chat_id,
        user_id = %reporter_id,
        target_id = %target_id,
        "user reported"
    );
    Ok(())
}

#[cfg(test)]
#[path = "tests/chats_tests.rs"]
mod tests;
