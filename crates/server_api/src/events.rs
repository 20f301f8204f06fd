use shared::{
    domain::{ChatId, EventId, NotificationKind, UserId},
    error::ApiError,
};
use storage::NotificationDraft;

use crate::{store_error, ApiContext};

/// Joins the event, provisions its group chat with the caller as an active
/// member and tells the creator. Returns the group chat id.
pub async fn join_event(
    ctx: &ApiContext,
    user_id: UserId,
    event_id: EventId,
) -> Result<ChatId, ApiError> {
    let store = ctx.store.as_ref();
    let creator = store
        .event_creator(event_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::not_found("Event not found"))?;

    store
        .join_event(event_id, user_id)
        .await
        .map_err(store_error)?;
    let group_chat = store
        .ensure_event_group_chat(event_id, user_id)
        .await
        .map_err(store_error)?;

    if creator != user_id {
        let draft = NotificationDraft {
            kind: NotificationKind::EventJoined,
            title: "New event participant".to_string(),
            body: format!("User {user_id} joined your event"),
            payload: serde_json::json!({
                "event_id": event_id,
                "participant_id": user_id,
            }),
        };
        if let Err(err) = ctx.notifications.notify_user(creator, &draft).await {
            tracing::warn!(event_id = %event_id, error = %err, "join notification failed");
        }
    }

    tracing::info!(event_id = %event_id, user_id = %user_id, chat_id = %group_chat, "joined event");
    Ok(group_chat)
}

/// Leaves the event and every chat under it. Live subscriptions the user
/// holds on those chats end immediately.
pub async fn leave_event(
    ctx: &ApiContext,
    user_id: UserId,
    event_id: EventId,
) -> Result<(), ApiError> {
    let store = ctx.store.as_ref();
    let creator = store
        .event_creator(event_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::not_found("Event not found"))?;
    if creator == user_id {
        return Err(ApiError::validation(
            "Event creator cannot leave their own event",
        ));
    }

    let chats: Vec<ChatId> = store
        .list_event_chats(event_id)
        .await
        .map_err(store_error)?
        .into_iter()
        .map(|chat| chat.id)
        .collect();
    store
        .leave_event(event_id, user_id)
        .await
        .map_err(store_error)?;
    ctx.rooms.evict(user_id, &chats);

    tracing::info!(event_id = %event_id, user_id = %user_id, "left event");
    Ok(())
}
