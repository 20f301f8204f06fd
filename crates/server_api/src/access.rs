use shared::domain::{ChatId, ChatType, EventId, UserId};
use storage::{ChatRecord, ChatStore, StoreResult};

/// Event-level access plus the chat-level rule for direct chats: those are
/// only open to users holding a membership row, so other event participants
/// cannot read or join them.
///
/// Returns `None` both for unknown chats and for chats the user may not
/// see; callers must not distinguish the two.
pub async fn authorize_chat(
    store: &dyn ChatStore,
    chat_id: ChatId,
    user_id: UserId,
) -> StoreResult<Option<ChatRecord>> {
    if !store.can_access_chat(chat_id, user_id).await? {
        return Ok(None);
    }
    let Some(chat) = store.find_chat(chat_id).await? else {
        return Ok(None);
    };
    if chat.chat_type == ChatType::Direct && store.member_state(chat_id, user_id).await?.is_none()
    {
        return Ok(None);
    }
    Ok(Some(chat))
}

/// Chats of an event the user may see: every group chat plus the direct
/// chats they belong to.
pub async fn visible_event_chats(
    store: &dyn ChatStore,
    event_id: EventId,
    user_id: UserId,
) -> StoreResult<Vec<ChatRecord>> {
    let mut visible = Vec::new();
    for chat in store.list_event_chats(event_id).await? {
        if chat.chat_type == ChatType::Direct
            && store.member_state(chat.id, user_id).await?.is_none()
        {
            continue;
        }
        visible.push(chat);
    }
    Ok(visible)
}
