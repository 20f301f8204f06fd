use std::time::Duration;

use shared::protocol::ServerEvent;
use storage::Page;

use super::*;
use crate::{
    test_support::{document, relational, relational_with, Scenario},
    ChatLimits,
};

#[tokio::test]
async fn realtime_send_broadcasts_new_then_delivered() {
    for Scenario {
        ctx,
        creator,
        guest,
        group_chat,
        ..
    } in [relational().await, document().await]
    {
        let mut creator_room = ctx.rooms.subscribe(group_chat, creator);

        let sent = send_realtime(&ctx, guest, group_chat, "hello", Some("tmp-1"))
            .await
            .expect("send");
        assert_eq!(sent.status, MessageStatus::Sent);
        assert_eq!(sent.content, "hello");

        match creator_room.next().await {
            Some(ServerEvent::MessageNew(message)) => {
                assert_eq!(message.id, sent.id);
                assert_eq!(message.status, MessageStatus::Sent);
            }
            other => panic!("expected message:new, got {other:?}"),
        }
        match creator_room.next().await {
            Some(ServerEvent::MessageStatus(status)) => {
                assert_eq!(status.message_id, sent.id);
                assert_eq!(status.status, MessageStatus::Delivered);
            }
            other => panic!("expected message:status, got {other:?}"),
        }

        let stored = ctx.store.get_message(sent.id).await.expect("get").expect("stored");
        assert_eq!(stored.status, MessageStatus::Delivered);

        let inbox = ctx.store.list_notifications(creator, 30).await.expect("inbox");
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::NewMessage);
    }
}

#[tokio::test]
async fn blocked_member_cannot_send_and_nothing_is_persisted() {
    let Scenario {
        ctx,
        creator,
        guest,
        group_chat,
        ..
    } = relational().await;
    ctx.store
        .block_member(group_chat, guest, creator, Some("spam"))
        .await
        .expect("block");

    let err = send_realtime(&ctx, guest, group_chat, "let me in", None)
        .await
        .expect_err("blocked");
    assert_eq!(err, SendRejection::Blocked);

    let err = post_message(&ctx, guest, group_chat, "let me in", None)
        .await
        .expect_err("blocked over http");
    assert_eq!(err.code, ErrorCode::Forbidden);
    assert_eq!(err.message, "You are blocked in this chat");

    let history = ctx
        .store
        .list_messages(group_chat, Page::default())
        .await
        .expect("history");
    assert!(history.is_empty());
}

#[tokio::test]
async fn outsiders_and_empty_content_are_rejected() {
    let Scenario {
        ctx,
        guest,
        event,
        group_chat,
        ..
    } = relational().await;
    let outsider = ctx.store.create_user("outsider").await.expect("outsider");

    assert_eq!(
        send_realtime(&ctx, outsider, group_chat, "hi", None).await,
        Err(SendRejection::Forbidden)
    );
    assert_eq!(
        send_realtime(&ctx, guest, group_chat, "  <p> </p> ", None).await,
        Err(SendRejection::EmptyContent)
    );
    assert_eq!(
        send_realtime(&ctx, guest, ChatId::event_group(event), "hi", None).await,
        Err(SendRejection::InvalidChat)
    );
}

#[tokio::test]
async fn realtime_send_requires_an_active_membership_row() {
    let Scenario {
        ctx,
        event,
        group_chat,
        ..
    } = relational().await;
    let late = ctx.store.create_user("late").await.expect("late");
    ctx.store.join_event(event, late).await.expect("join");

    assert_eq!(
        send_realtime(&ctx, late, group_chat, "hi", None).await,
        Err(SendRejection::NotMember)
    );

    // The HTTP path re-adds group members before checking.
    let message = post_message(&ctx, late, group_chat, "hi", None)
        .await
        .expect("http send");
    assert_eq!(message.sender_id, late);
}

#[tokio::test]
async fn http_post_neither_broadcasts_nor_delivers() {
    let Scenario {
        ctx,
        creator,
        guest,
        group_chat,
        ..
    } = relational().await;
    let mut room = ctx.rooms.subscribe(group_chat, creator);

    let message = post_message(&ctx, guest, group_chat, "<i>fallback</i>", None)
        .await
        .expect("post");
    assert_eq!(message.content, "fallback");
    assert_eq!(message.status, MessageStatus::Sent);

    let stored = ctx.store.get_message(message.id).await.expect("get").expect("row");
    assert_eq!(stored.status, MessageStatus::Sent);
    let pending = tokio::time::timeout(Duration::from_millis(50), room.next()).await;
    assert!(pending.is_err(), "http path must not broadcast");

    let inbox = ctx.store.list_notifications(creator, 30).await.expect("inbox");
    assert_eq!(inbox.len(), 1);
}

#[tokio::test]
async fn fallback_retry_with_same_temp_id_is_stored_once() {
    let Scenario {
        ctx,
        guest,
        group_chat,
        ..
    } = relational().await;

    let first = send_realtime(&ctx, guest, group_chat, "once", Some("tmp-9"))
        .await
        .expect("socket");
    let retry = post_message(&ctx, guest, group_chat, "once", Some("tmp-9"))
        .await
        .expect("http retry");
    assert_eq!(first.id, retry.id);

    let history = ctx
        .store
        .list_messages(group_chat, Page::default())
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn socket_rate_limit_is_independent_of_http() {
    let Scenario {
        ctx,
        guest,
        group_chat,
        ..
    } = relational_with(ChatLimits {
        socket_messages_per_minute: 2,
        ..ChatLimits::default()
    })
    .await;

    for n in 0..2 {
        send_realtime(&ctx, guest, group_chat, &format!("m{n}"), None)
            .await
            .expect("within budget");
    }
    assert_eq!(
        send_realtime(&ctx, guest, group_chat, "m2", None).await,
        Err(SendRejection::RateLimited)
    );
    post_message(&ctx, guest, group_chat, "m2", None)
        .await
        .expect("http path has its own budget");
}

#[tokio::test]
async fn seen_is_idempotent_and_broadcast_once() {
    for Scenario {
        ctx,
        creator,
        guest,
        group_chat,
        ..
    } in [relational().await, document().await]
    {
        let sent = send_realtime(&ctx, guest, group_chat, "read me", None)
            .await
            .expect("send");
        let mut room = ctx.rooms.subscribe(group_chat, guest);

        let status = mark_seen(&ctx, creator, group_chat, sent.id)
            .await
            .expect("seen")
            .expect("transition");
        assert_eq!(status.status, MessageStatus::Seen);
        assert_eq!(room.next().await, Some(ServerEvent::MessageStatus(status)));

        assert_eq!(mark_seen(&ctx, creator, group_chat, sent.id).await, Ok(None));
        let stored = ctx.store.get_message(sent.id).await.expect("get").expect("row");
        assert_eq!(stored.status, MessageStatus::Seen);
    }
}

#[tokio::test]
async fn seen_requires_chat_access() {
    let Scenario {
        ctx,
        guest,
        group_chat,
        ..
    } = document().await;
    let sent = send_realtime(&ctx, guest, group_chat, "secret", None)
        .await
        .expect("send");
    let outsider = ctx.store.create_user("outsider").await.expect("outsider");
    let err = mark_seen(&ctx, outsider, group_chat, sent.id)
        .await
        .expect_err("forbidden");
    assert_eq!(err.code, ErrorCode::Forbidden);
}
