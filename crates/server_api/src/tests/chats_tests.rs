use shared::domain::ChatType;

use super::*;
use crate::{
    delivery::post_message,
    test_support::{document, relational, Scenario},
};

#[tokio::test]
async fn listing_provisions_a_single_group_chat() {
    let Scenario {
        ctx,
        creator,
        guest,
        event,
        group_chat,
    } = relational().await;

    let first = list_event_chats(&ctx, guest, event).await.expect("guest list");
    let second = list_event_chats(&ctx, creator, event).await.expect("creator list");
    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, group_chat);
    assert_eq!(first[0].chat_type, ChatType::EventGroup);
}

#[tokio::test]
async fn document_mode_lists_the_synthesized_chat() {
    let Scenario {
        ctx, guest, event, ..
    } = document().await;
    let chats = list_event_chats(&ctx, guest, event).await.expect("list");
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].id.to_string(), format!("event:{}", event.0));
}

#[tokio::test]
async fn non_participants_cannot_list_or_read() {
    for Scenario {
        ctx,
        event,
        group_chat,
        ..
    } in [relational().await, document().await]
    {
        let stranger = ctx.store.create_user("stranger").await.expect("stranger");
        let err = list_event_chats(&ctx, stranger, event).await.expect_err("list");
        assert_eq!(err.code, ErrorCode::Forbidden);
        let err = list_messages(&ctx, stranger, group_chat, Page::default())
            .await
            .expect_err("read");
        assert_eq!(err.code, ErrorCode::Forbidden);
    }
}

#[tokio::test]
async fn malformed_chat_ids_are_validation_errors() {
    let Scenario {
        ctx, guest, event, ..
    } = relational().await;
    let err = list_messages(&ctx, guest, ChatId::event_group(event), Page::default())
        .await
        .expect_err("synthesized id in relational mode");
    assert_eq!(err.code, ErrorCode::Validation);

    let Scenario { ctx, guest, .. } = document().await;
    let err = list_messages(&ctx, guest, ChatId::Stored(1), Page::default())
        .await
        .expect_err("row id in document mode");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn posted_message_round_trips_through_history() {
    let Scenario {
        ctx,
        guest,
        group_chat,
        ..
    } = relational().await;
    let posted = post_message(&ctx, guest, group_chat, "see you there", None)
        .await
        .expect("post");
    let history = list_messages(&ctx, guest, group_chat, Page::default())
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, posted.id);
    assert_eq!(history[0].content, "see you there");
    assert_eq!(history[0].sender_id, guest);
}

#[tokio::test]
async fn direct_chat_rules() {
    let Scenario {
        ctx,
        creator,
        guest,
        event,
        ..
    } = relational().await;
    let stranger = ctx.store.create_user("stranger").await.expect("stranger");

    let err = create_direct_chat(&ctx, guest, event, creator)
        .await
        .expect_err("only creator");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let err = create_direct_chat(&ctx, creator, event, stranger)
        .await
        .expect_err("not joined");
    assert_eq!(err.code, ErrorCode::NotFound);

    let err = create_direct_chat(&ctx, creator, event, UserId(9999))
        .await
        .expect_err("unknown user");
    assert_eq!(err.code, ErrorCode::NotFound);

    let chat = create_direct_chat(&ctx, creator, event, guest)
        .await
        .expect("direct");
    post_message(&ctx, guest, chat, "private", None)
        .await
        .expect("guest posts");

    ctx.store.join_event(event, stranger).await.expect("join");
    let err = list_messages(&ctx, stranger, chat, Page::default())
        .await
        .expect_err("not in direct chat");
    assert_eq!(err.code, ErrorCode::Forbidden);
    let err = post_message(&ctx, stranger, chat, "hi", None)
        .await
        .expect_err("cannot post into direct chat");
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn block_requires_membership_and_defaults_reason() {
    let Scenario {
        ctx,
        creator,
        guest,
        group_chat,
        ..
    } = relational().await;
    let stranger = ctx.store.create_user("stranger").await.expect("stranger");

    let err = block_user(&ctx, stranger, group_chat, guest, None)
        .await
        .expect_err("not a member");
    assert_eq!(err.code, ErrorCode::Forbidden);

    block_user(&ctx, creator, group_chat, guest, Some("   "))
        .await
        .expect("block");
    let state = ctx
        .store
        .member_state(group_chat, guest)
        .await
        .expect("state")
        .expect("row");
    assert!(state.is_blocked);
    assert_eq!(state.blocked_reason.as_deref(), Some("Blocked by user"));

    // Blocked members still read history.
    list_messages(&ctx, guest, group_chat, Page::default())
        .await
        .expect("read while blocked");
}

#[tokio::test]
async fn report_validation() {
    let Scenario {
        ctx,
        creator,
        guest,
        group_chat,
        ..
    } = relational().await;

    let err = report_user(&ctx, guest, group_chat, creator, Some("  "))
        .await
        .expect_err("reason required");
    assert_eq!(err.code, ErrorCode::Validation);

    let err = report_user(&ctx, guest, ChatId::Stored(404), creator, Some("rude"))
        .await
        .expect_err("unknown chat");
    assert_eq!(err.code, ErrorCode::NotFound);

    report_user(&ctx, guest, group_chat, creator, Some("rude"))
        .await
        .expect("report");
}

#[tokio::test]
async fn relational_only_features_are_unavailable_in_document_mode() {
    let Scenario {
        ctx,
        creator,
        guest,
        event,
        group_chat,
    } = document().await;

    for err in [
        create_direct_chat(&ctx, creator, event, guest).await.expect_err("direct"),
        block_user(&ctx, creator, group_chat, guest, None).await.expect_err("block"),
        report_user(&ctx, creator, group_chat, guest, Some("x")).await.expect_err("report"),
    ] {
        assert_eq!(err.code, ErrorCode::Unavailable);
    }
}
