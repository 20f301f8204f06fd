use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use server_api::{ChatSession, Subscription};
use shared::{domain::UserId, protocol::ServerEvent};
use tokio::{sync::mpsc, task::JoinSet};

use crate::{
    app_state::AppState,
    auth::{authenticate, header_token},
    error::HttpError,
};

const OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    token: Option<String>,
}

/// Authenticates before upgrading; a bad token never gets a socket.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let token = q.token.as_deref().or_else(|| header_token(&headers));
    let user_id = authenticate(&state, token).await?;
    Ok(ws.on_upgrade(move |socket| ws_connection(state, socket, user_id)))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket, user_id: UserId) {
    tracing::info!(user_id = %user_id, "realtime client connected");

    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(err) => {
                    tracing::error!(error = %err, "failed to encode server event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut session = ChatSession::new(state.api.clone(), user_id);
    let mut rooms = JoinSet::new();

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let outcome = session.handle_text(&text).await;
                if let Some(subscription) = outcome.subscription {
                    rooms.spawn(forward_room(subscription, outbound.clone()));
                }
                if let Some(reply) = outcome.reply {
                    if outbound.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    rooms.abort_all();
    send_task.abort();
    tracing::info!(user_id = %user_id, "realtime client disconnected");
}

async fn forward_room(mut subscription: Subscription, outbound: mpsc::Sender<ServerEvent>) {
    while let Some(event) = subscription.next().await {
        if outbound.send(event).await.is_err() {
            return;
        }
    }
    tracing::debug!(chat_id = %subscription.chat_id, "room subscription ended");
}
