use std::sync::Arc;

use shared::domain::{ChatId, EventId, UserId};
use storage::{DocumentStore, SqlStore, StoreHandles};

use crate::{ApiContext, ChatLimits};

pub(crate) struct Scenario {
    pub ctx: ApiContext,
    pub creator: UserId,
    pub guest: UserId,
    pub event: EventId,
    pub group_chat: ChatId,
}

pub(crate) async fn relational() -> Scenario {
    let store = SqlStore::in_memory().await.expect("db");
    scenario(StoreHandles::from_store(Arc::new(store)), ChatLimits::default()).await
}

pub(crate) async fn document() -> Scenario {
    scenario(
        StoreHandles::from_store(Arc::new(DocumentStore::in_memory())),
        ChatLimits::default(),
    )
    .await
}

pub(crate) async fn relational_with(limits: ChatLimits) -> Scenario {
    let store = SqlStore::in_memory().await.expect("db");
    scenario(StoreHandles::from_store(Arc::new(store)), limits).await
}

async fn scenario(handles: StoreHandles, limits: ChatLimits) -> Scenario {
    let ctx = ApiContext::new(handles, limits);
    let creator = ctx.store.create_user("creator").await.expect("creator");
    let guest = ctx.store.create_user("guest").await.expect("guest");
    let event = ctx.store.create_event(creator, "board games").await.expect("event");
    ctx.store.join_event(event, guest).await.expect("join");
    let group_chat = ctx
        .store
        .ensure_event_group_chat(event, creator)
        .await
        .expect("group chat");
    ctx.store
        .upsert_active_member(group_chat, guest)
        .await
        .expect("guest member");
    Scenario {
        ctx,
        creator,
        guest,
        event,
        group_chat,
    }
}
