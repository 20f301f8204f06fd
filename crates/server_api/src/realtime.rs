use std::collections::HashMap;

use shared::{
    domain::{ChatId, EventId, UserId},
    error::ApiError,
    protocol::{ClientEvent, RawClientFrame, ServerEvent, SocketAck},
};
use storage::{Backend, ChatRecord, StoreError};
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    access::authorize_chat,
    delivery::{mark_seen, send_realtime},
    rooms::{is_revoked, Subscription},
    ApiContext,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinRejection {
    #[error("Invalid chat room")]
    InvalidRoom,
    #[error("Forbidden")]
    Forbidden,
    #[error("Join failed")]
    Failed,
}

fn join_failure(err: StoreError) -> JoinRejection {
    match err {
        StoreError::InvalidChatId(_) => JoinRejection::InvalidRoom,
        other => {
            tracing::error!(error = %other, "join aborted by store failure");
            JoinRejection::Failed
        }
    }
}

/// Result of one inbound frame: an optional direct reply to the sender and,
/// after a successful join, the room subscription to start forwarding.
#[derive(Default)]
pub struct FrameOutcome {
    pub reply: Option<ServerEvent>,
    pub subscription: Option<Subscription>,
}

impl FrameOutcome {
    fn reply(event: ServerEvent) -> Self {
        Self {
            reply: Some(event),
            subscription: None,
        }
    }

    fn ack(ack: Option<u64>, build: impl FnOnce(u64) -> SocketAck) -> Self {
        Self {
            reply: ack.map(|ack| ServerEvent::Ack(build(ack))),
            subscription: None,
        }
    }
}

/// Per-connection realtime state. The user identity is fixed at connect
/// time; every event is authorized against the store afresh.
pub struct ChatSession {
    ctx: ApiContext,
    user_id: UserId,
    joined: HashMap<ChatId, watch::Receiver<bool>>,
}

impl ChatSession {
    pub fn new(ctx: ApiContext, user_id: UserId) -> Self {
        Self {
            ctx,
            user_id,
            joined: HashMap::new(),
        }
    }

    /// Handles one text frame. Never fails: malformed input turns into an
    /// `error` event or a negative ack.
    pub async fn handle_text(&mut self, text: &str) -> FrameOutcome {
        let frame: RawClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(user_id = %self.user_id, error = %err, "unparseable frame");
                return FrameOutcome::reply(ServerEvent::Error(ApiError::validation(
                    "Malformed frame",
                )));
            }
        };
        match serde_json::from_value::<ClientEvent>(frame.event) {
            Ok(event) => self.dispatch(frame.ack, event).await,
            Err(err) => {
                tracing::warn!(user_id = %self.user_id, error = %err, "invalid event payload");
                FrameOutcome::ack(frame.ack, |ack| SocketAck::rejected(ack, "Invalid payload"))
            }
        }
    }

    pub async fn dispatch(&mut self, ack: Option<u64>, event: ClientEvent) -> FrameOutcome {
        match event {
            ClientEvent::JoinChat { event_id, chat_id } => match self.join(event_id, chat_id).await {
                Ok(subscription) => FrameOutcome {
                    reply: ack.map(|ack| ServerEvent::Ack(SocketAck::ok(ack))),
                    subscription,
                },
                Err(rejection) => {
                    tracing::warn!(
                        user_id = %self.user_id,
                        event_id = %event_id,
                        chat_id = %chat_id,
                        %rejection,
                        "join rejected"
                    );
                    FrameOutcome::ack(ack, |ack| SocketAck::rejected(ack, rejection.to_string()))
                }
            },
            ClientEvent::SendMessage {
                chat_id,
                content,
                client_temp_id,
            } => {
                let result = send_realtime(
                    &self.ctx,
                    self.user_id,
                    chat_id,
                    &content,
                    client_temp_id.as_deref(),
                )
                .await;
                match result {
                    Ok(message) => {
                        FrameOutcome::ack(ack, |ack| SocketAck::sent(ack, message, client_temp_id))
                    }
                    Err(rejection) => {
                        tracing::warn!(
                            user_id = %self.user_id,
                            chat_id = %chat_id,
                            %rejection,
                            "send rejected"
                        );
                        FrameOutcome::ack(ack, |ack| {
                            SocketAck::rejected(ack, rejection.to_string())
                        })
                    }
                }
            }
            ClientEvent::MarkSeen {
                chat_id,
                message_id,
            } => {
                if let Err(err) = mark_seen(&self.ctx, self.user_id, chat_id, message_id).await {
                    tracing::debug!(
                        user_id = %self.user_id,
                        chat_id = %chat_id,
                        message_id = %message_id,
                        error = %err,
                        "seen ignored"
                    );
                }
                FrameOutcome::ack(ack, SocketAck::ok)
            }
        }
    }

    async fn authorize_join(
        &self,
        event_id: EventId,
        chat_id: ChatId,
    ) -> Result<ChatRecord, JoinRejection> {
        let store = self.ctx.store.as_ref();
        // Room shape is checked before any access lookup.
        let well_formed = match (store.backend(), chat_id.synthesized_event()) {
            (Backend::Document, Some(synthesized)) => synthesized == event_id,
            (Backend::Document, None) => false,
            (Backend::Relational, synthesized) => synthesized.is_none(),
        };
        if !well_formed {
            return Err(JoinRejection::InvalidRoom);
        }
        if !store
            .can_access_event(event_id, self.user_id)
            .await
            .map_err(join_failure)?
        {
            return Err(JoinRejection::Forbidden);
        }
        let chat = authorize_chat(store, chat_id, self.user_id)
            .await
            .map_err(join_failure)?
            .ok_or(JoinRejection::Forbidden)?;
        if chat.event_id != event_id {
            return Err(JoinRejection::InvalidRoom);
        }
        store
            .upsert_active_member(chat_id, self.user_id)
            .await
            .map_err(join_failure)?;
        Ok(chat)
    }

    /// Joins the room. A repeated join on a live subscription is
    /// acknowledged without subscribing twice.
    async fn join(
        &mut self,
        event_id: EventId,
        chat_id: ChatId,
    ) -> Result<Option<Subscription>, JoinRejection> {
        self.authorize_join(event_id, chat_id).await?;
        tracing::info!(
            user_id = %self.user_id,
            event_id = %event_id,
            chat_id = %chat_id,
            "joined chat"
        );

        if self
            .joined
            .get(&chat_id)
            .is_some_and(|revoked| !is_revoked(revoked))
        {
            return Ok(None);
        }
        let subscription = self.ctx.rooms.subscribe(chat_id, self.user_id);
        self.joined.insert(chat_id, subscription.revocation());
        Ok(Some(subscription))
    }
}

#[cfg(test)]
#[path = "tests/realtime_tests.rs"]
mod tests;
