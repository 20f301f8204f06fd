use super::*;

async fn seeded(store: &DocumentStore) -> (UserId, UserId, EventId) {
    let creator = store.create_user("creator").await.expect("creator");
    let guest = store.create_user("guest").await.expect("guest");
    let event = store.create_event(creator, "hike").await.expect("event");
    store.join_event(event, guest).await.expect("join");
    (creator, guest, event)
}

#[tokio::test]
async fn group_chat_is_synthesized_from_event() {
    let store = DocumentStore::in_memory();
    let (creator, guest, event) = seeded(&store).await;

    let chat = store.ensure_event_group_chat(event, guest).await.expect("chat");
    assert_eq!(chat, ChatId::event_group(event));
    assert_eq!(chat.to_string(), format!("event:{}", event.0));

    let chats = store.list_event_chats(event).await.expect("chats");
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].created_by, Some(creator));

    let state = store.member_state(chat, guest).await.expect("state");
    assert_eq!(state.map(|s| s.active), Some(true));
}

#[tokio::test]
async fn stored_chat_ids_are_invalid_in_document_mode() {
    let store = DocumentStore::in_memory();
    let (creator, _guest, _event) = seeded(&store).await;
    let err = store
        .create_message(ChatId::Stored(1), creator, "hi")
        .await
        .expect_err("stored id");
    assert!(matches!(err, StoreError::InvalidChatId(_)));
}

#[tokio::test]
async fn relational_only_operations_are_unsupported() {
    let store = DocumentStore::in_memory();
    let (creator, guest, event) = seeded(&store).await;
    let chat = ChatId::event_group(event);

    assert!(matches!(
        store.create_direct_chat(event, creator, guest).await,
        Err(StoreError::Unsupported(_))
    ));
    assert!(matches!(
        store.block_member(chat, guest, creator, None).await,
        Err(StoreError::Unsupported(_))
    ));
    assert!(matches!(
        store
            .report_user(NewReport {
                reporter_id: creator,
                reported_user_id: guest,
                event_id: event,
                chat_id: chat,
                reason: "spam".into(),
            })
            .await,
        Err(StoreError::Unsupported(_))
    ));
}

#[tokio::test]
async fn fan_out_reaches_creator_and_joined_participants() {
    let store = DocumentStore::in_memory();
    let (creator, guest, event) = seeded(&store).await;
    let gone = store.create_user("gone").await.expect("gone");
    store.join_event(event, gone).await.expect("join");
    store.leave_event(event, gone).await.expect("leave");

    let draft = NotificationDraft {
        kind: NotificationKind::NewMessage,
        title: "New message".into(),
        body: "hey".into(),
        payload: serde_json::json!({}),
    };
    let written = store
        .notify_chat_members(ChatId::event_group(event), guest, &draft)
        .await
        .expect("notify");
    assert_eq!(written, 1);
    assert_eq!(store.list_notifications(creator, 10).await.expect("c").len(), 1);
    assert!(store.list_notifications(gone, 10).await.expect("g").is_empty());
}

#[tokio::test]
async fn snapshot_survives_reopen() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("docs").join("chat.json");

    let store = DocumentStore::open(Some(path.clone())).await.expect("open");
    let (_creator, guest, event) = seeded(&store).await;
    let chat = ChatId::event_group(event);
    let sent = store.create_message(chat, guest, "persisted").await.expect("message");
    assert!(store.mark_delivered(sent.id).await.expect("delivered"));
    drop(store);

    let reopened = DocumentStore::open(Some(path)).await.expect("reopen");
    let messages = reopened
        .list_messages(chat, Page::default())
        .await
        .expect("messages");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "persisted");
    assert_eq!(messages[0].status, MessageStatus::Delivered);

    let next = reopened.create_message(chat, guest, "after").await.expect("next");
    assert!(next.id > sent.id);
}

#[tokio::test]
async fn failed_snapshot_write_leaves_collections_unchanged() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("chat.json");

    let store = DocumentStore::open(Some(path.clone())).await.expect("open");
    let (_creator, guest, event) = seeded(&store).await;
    let chat = ChatId::event_group(event);
    let kept = store.create_message(chat, guest, "kept").await.expect("message");

    std::fs::remove_file(&path).expect("remove snapshot");
    std::fs::create_dir(&path).expect("block snapshot path");

    let err = store
        .create_message(chat, guest, "ghost")
        .await
        .expect_err("snapshot write must fail");
    assert!(matches!(err, StoreError::Io(_)));
    assert!(store.mark_delivered(kept.id).await.is_err());

    let messages = store.list_messages(chat, Page::default()).await.expect("messages");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "kept");
    assert_eq!(messages[0].status, MessageStatus::Sent);
}
