use super::*;

async fn seeded() -> (SqlStore, UserId, UserId, EventId) {
    let store = SqlStore::in_memory().await.expect("db");
    let creator = store.create_user("creator").await.expect("creator");
    let guest = store.create_user("guest").await.expect("guest");
    let event = store.create_event(creator, "picnic").await.expect("event");
    store.join_event(event, guest).await.expect("join");
    (store, creator, guest, event)
}

#[test]
fn sqlite_path_skips_memory_and_foreign_urls() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(sqlite_path("sqlite://file:chat?mode=memory&cache=shared"), None);
    assert_eq!(sqlite_path("postgres://localhost/chat"), None);
    assert_eq!(
        sqlite_path("sqlite://data/chat.db?mode=rwc"),
        Some(PathBuf::from("data/chat.db"))
    );
    assert_eq!(sqlite_path("sqlite:chat.db"), Some(PathBuf::from("chat.db")));
}

#[tokio::test]
async fn creates_database_file_and_parent_directory() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db_path = temp.path().join("nested").join("chat.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let store = SqlStore::connect(&database_url, 2).await.expect("db");
    store.health_check().await.expect("health");
    drop(store);

    assert!(db_path.exists(), "database file should exist: {}", db_path.display());
}

#[tokio::test]
async fn create_user_is_idempotent_per_username() {
    let store = SqlStore::in_memory().await.expect("db");
    let first = store.create_user("alice").await.expect("first");
    let second = store.create_user("alice").await.expect("second");
    assert_eq!(first, second);
    assert!(store.user_exists(first).await.expect("exists"));
    assert!(!store.user_exists(UserId(999)).await.expect("missing"));
}

#[tokio::test]
async fn group_chat_converges_to_one_row() {
    let (store, creator, guest, event) = seeded().await;

    let (a, b) = tokio::join!(
        store.ensure_event_group_chat(event, creator),
        store.ensure_event_group_chat(event, guest),
    );
    let a = a.expect("creator chat");
    let b = b.expect("guest chat");
    assert_eq!(a, b);

    let chats = store.list_event_chats(event).await.expect("chats");
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].chat_type, ChatType::EventGroup);
    assert_eq!(chats[0].created_by, Some(creator));

    let state = store.member_state(a, guest).await.expect("state").expect("member");
    assert!(state.active);
    assert!(!state.is_blocked);
}

#[tokio::test]
async fn group_chat_for_unknown_event_is_not_found() {
    let store = SqlStore::in_memory().await.expect("db");
    let user = store.create_user("solo").await.expect("user");
    let err = store
        .ensure_event_group_chat(EventId(77), user)
        .await
        .expect_err("unknown event");
    assert!(matches!(err, StoreError::NotFound("event")));
}

#[tokio::test]
async fn leaving_event_deactivates_membership_and_rejoin_restores_it() {
    let (store, _creator, guest, event) = seeded().await;
    let chat = store.ensure_event_group_chat(event, guest).await.expect("chat");

    store.leave_event(event, guest).await.expect("leave");
    assert!(!store.can_access_chat(chat, guest).await.expect("access"));
    let state = store.member_state(chat, guest).await.expect("state").expect("row kept");
    assert!(!state.active);

    store.join_event(event, guest).await.expect("rejoin");
    store.upsert_active_member(chat, guest).await.expect("re-add");
    assert!(store.can_access_chat(chat, guest).await.expect("access"));
    let state = store.member_state(chat, guest).await.expect("state").expect("row");
    assert!(state.active);
}

#[tokio::test]
async fn direct_chat_has_exactly_two_members() {
    let (store, creator, guest, event) = seeded().await;
    let outsider = store.create_user("outsider").await.expect("outsider");
    store.join_event(event, outsider).await.expect("join");

    let chat = store
        .create_direct_chat(event, creator, guest)
        .await
        .expect("direct");
    let record = store.find_chat(chat).await.expect("find").expect("chat");
    assert_eq!(record.chat_type, ChatType::Direct);
    assert_eq!(record.event_id, event);

    assert!(store.member_state(chat, creator).await.expect("c").is_some());
    assert!(store.member_state(chat, guest).await.expect("g").is_some());
    assert!(store.member_state(chat, outsider).await.expect("o").is_none());
}

#[tokio::test]
async fn blocking_survives_membership_upsert() {
    let (store, creator, guest, event) = seeded().await;
    let chat = store.ensure_event_group_chat(event, guest).await.expect("chat");

    store
        .block_member(chat, guest, creator, Some("spam"))
        .await
        .expect("block");
    store.upsert_active_member(chat, guest).await.expect("upsert");

    let state = store.member_state(chat, guest).await.expect("state").expect("row");
    assert!(state.is_blocked);
    assert_eq!(state.blocked_by, Some(creator));
    assert_eq!(state.blocked_reason.as_deref(), Some("spam"));
}

#[tokio::test]
async fn synthesized_chat_ids_are_rejected() {
    let (store, creator, _guest, event) = seeded().await;
    let err = store
        .list_messages(ChatId::event_group(event), Page::default())
        .await
        .expect_err("synthesized id");
    assert!(matches!(err, StoreError::InvalidChatId(_)));
    let err = store
        .can_access_chat(ChatId::event_group(event), creator)
        .await
        .expect_err("synthesized id");
    assert!(matches!(err, StoreError::InvalidChatId(_)));
}

#[tokio::test]
async fn fan_out_skips_sender_and_inactive_members() {
    let (store, creator, guest, event) = seeded().await;
    let late = store.create_user("late").await.expect("late");
    store.join_event(event, late).await.expect("join");

    let chat = store.ensure_event_group_chat(event, creator).await.expect("chat");
    store.upsert_active_member(chat, guest).await.expect("guest");
    store.upsert_active_member(chat, late).await.expect("late");
    store.leave_event(event, late).await.expect("leave");

    let draft = NotificationDraft {
        kind: NotificationKind::NewMessage,
        title: "New message".into(),
        body: "hello".into(),
        payload: serde_json::json!({ "chat_id": chat.to_string() }),
    };
    let written = store
        .notify_chat_members(chat, guest, &draft)
        .await
        .expect("notify");
    assert_eq!(written, 1);

    let inbox = store.list_notifications(creator, 30).await.expect("inbox");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].payload["chat_id"], chat.to_string());
    assert!(store.list_notifications(late, 30).await.expect("late").is_empty());
}

#[tokio::test]
async fn report_is_recorded_against_chat_event() {
    let (store, creator, guest, event) = seeded().await;
    let chat = store.ensure_event_group_chat(event, guest).await.expect("chat");
    store
        .report_user(NewReport {
            reporter_id: guest,
            reported_user_id: creator,
            event_id: event,
            chat_id: chat,
            reason: "rude".into(),
        })
        .await
        .expect("report");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_reports WHERE chat_id = ?1")
        .bind(chat.stored_id())
        .fetch_one(store.pool())
        .await
        .expect("count");
    assert_eq!(count, 1);
}
