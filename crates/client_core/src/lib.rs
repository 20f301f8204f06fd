use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use futures::{SinkExt, Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ChatId, EventId, MessageId, NotificationId},
    error::{ApiError, ErrorCode},
    protocol::{
        ChatSummary, ClientEvent as WireEvent, ClientFrame, JoinEventResponse, ListChatsResponse,
        ListMessagesResponse, ListNotificationsResponse, MessagePayload, MessageStatusPayload,
        NotificationPayload, NotificationResponse, PostMessageRequest, PostMessageResponse,
        ServerEvent, SocketAck,
    },
};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

pub mod error;
pub use error::{ClientError, Result};

/// How long a realtime send may wait for its ack before the HTTP fallback.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(2500);
const ACK_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    MessageNew(MessagePayload),
    MessageStatus(MessageStatusPayload),
    ServerError(ApiError),
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPath {
    Socket,
    Http,
}

/// A persisted message together with the temp id the caller can use to
/// reconcile its optimistic copy.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message: MessagePayload,
    pub client_temp_id: String,
    pub path: SendPath,
}

/// Ack waiters keyed by ack id. `None` once the connection is gone.
type PendingAcks = Arc<Mutex<Option<HashMap<u64, oneshot::Sender<SocketAck>>>>>;

struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    pending: PendingAcks,
    tasks: [JoinHandle<()>; 2],
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ChatClient {
    http: Client,
    base_url: String,
    token: String,
    send_timeout: Duration,
    next_ack: AtomicU64,
    connection: Mutex<Option<Connection>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(server_url: &str, token: impl Into<String>) -> Result<Self> {
        Self::with_send_timeout(server_url, token, DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_send_timeout(
        server_url: &str,
        token: impl Into<String>,
        send_timeout: Duration,
    ) -> Result<Self> {
        let base_url = server_url.trim().trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidServerUrl(base_url));
        }
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            http: Client::new(),
            base_url,
            token: token.into(),
            send_timeout,
            next_ack: AtomicU64::new(0),
            connection: Mutex::new(None),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.connection)
            .as_ref()
            .is_some_and(|conn| lock(&conn.pending).is_some())
    }

    fn ws_url(&self) -> Result<Url> {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ClientError::InvalidServerUrl(self.base_url.clone()));
        };
        let mut url = Url::parse(&format!("{ws_base}/ws"))?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url)
    }

    /// Opens the realtime connection, replacing any previous one.
    pub async fn connect(&self) -> Result<()> {
        let ws_url = self.ws_url()?;
        let (stream, _) = connect_async(ws_url.as_str()).await?;
        let (mut sink, source) = stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let pending: PendingAcks = Arc::new(Mutex::new(Some(HashMap::new())));

        let writer = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });
        let reader = tokio::spawn(read_events(source, pending.clone(), self.events.clone()));

        *lock(&self.connection) = Some(Connection {
            outbound,
            pending,
            tasks: [writer, reader],
        });
        info!(server = %self.base_url, "realtime connected");
        Ok(())
    }

    pub fn disconnect(&self) {
        if lock(&self.connection).take().is_some() {
            info!(server = %self.base_url, "realtime disconnected");
        }
    }

    fn emit(&self, event: WireEvent) -> Result<(u64, oneshot::Receiver<SocketAck>)> {
        let ack = self.next_ack.fetch_add(1, Ordering::Relaxed) + 1;
        let text = serde_json::to_string(&ClientFrame {
            ack: Some(ack),
            event,
        })?;

        let guard = lock(&self.connection);
        let conn = guard.as_ref().ok_or(ClientError::NotConnected)?;
        let (tx, rx) = oneshot::channel();
        lock(&conn.pending)
            .as_mut()
            .ok_or(ClientError::NotConnected)?
            .insert(ack, tx);
        if conn.outbound.send(text).is_err() {
            forget_ack(&conn.pending, ack);
            return Err(ClientError::NotConnected);
        }
        Ok((ack, rx))
    }

    fn forget(&self, ack: u64) {
        if let Some(conn) = lock(&self.connection).as_ref() {
            forget_ack(&conn.pending, ack);
        }
    }

    async fn request(&self, event: WireEvent, wait: Duration) -> Result<SocketAck> {
        let (ack, rx) = self.emit(event)?;
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => {
                self.forget(ack);
                Err(ClientError::Timeout)
            }
        }
    }

    pub async fn join(&self, event_id: EventId, chat_id: ChatId) -> Result<()> {
        let ack = self
            .request(WireEvent::JoinChat { event_id, chat_id }, ACK_TIMEOUT)
            .await?;
        if !ack.ok {
            return Err(ClientError::Rejected(ack.error.unwrap_or_default()));
        }
        debug!(chat_id = %chat_id, "joined chat room");
        Ok(())
    }

    /// Socket first; on timeout, negative ack, or a closed connection the
    /// same temp id is posted over HTTP so the server can drop a duplicate.
    pub async fn send_message(&self, chat_id: ChatId, content: &str) -> Result<SentMessage> {
        let client_temp_id = Uuid::new_v4().to_string();

        match self.send_over_socket(chat_id, content, &client_temp_id).await {
            Ok(message) => {
                return Ok(SentMessage {
                    message,
                    client_temp_id,
                    path: SendPath::Socket,
                })
            }
            Err(err) => {
                warn!(chat_id = %chat_id, error = %err, "realtime send failed; using http");
            }
        }

        let message = self
            .post_message(chat_id, content, Some(&client_temp_id))
            .await?;
        Ok(SentMessage {
            message,
            client_temp_id,
            path: SendPath::Http,
        })
    }

    async fn send_over_socket(
        &self,
        chat_id: ChatId,
        content: &str,
        client_temp_id: &str,
    ) -> Result<MessagePayload> {
        let ack = self
            .request(
                WireEvent::SendMessage {
                    chat_id,
                    content: content.to_string(),
                    client_temp_id: Some(client_temp_id.to_string()),
                },
                self.send_timeout,
            )
            .await?;
        if !ack.ok {
            return Err(ClientError::Rejected(ack.error.unwrap_or_default()));
        }
        ack.message
            .ok_or_else(|| ClientError::Rejected("acknowledgement without message".into()))
    }

    pub async fn mark_seen(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        let ack = self
            .request(WireEvent::MarkSeen { chat_id, message_id }, ACK_TIMEOUT)
            .await?;
        if !ack.ok {
            debug!(chat_id = %chat_id, message_id = %message_id, "seen not applied");
        }
        Ok(())
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn history(
        &self,
        chat_id: ChatId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MessagePayload>> {
        let response = self
            .authorized(self.http.get(self.url(&format!("/chats/{chat_id}/messages"))))
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        Ok(read_json::<ListMessagesResponse>(response).await?.messages)
    }

    pub async fn post_message(
        &self,
        chat_id: ChatId,
        content: &str,
        client_temp_id: Option<&str>,
    ) -> Result<MessagePayload> {
        let response = self
            .authorized(self.http.post(self.url(&format!("/chats/{chat_id}/messages"))))
            .json(&PostMessageRequest {
                content: content.to_string(),
                client_temp_id: client_temp_id.map(str::to_string),
            })
            .send()
            .await?;
        Ok(read_json::<PostMessageResponse>(response).await?.message)
    }

    pub async fn join_event(&self, event_id: EventId) -> Result<JoinEventResponse> {
        let response = self
            .authorized(self.http.post(self.url(&format!("/events/{event_id}/join"))))
            .send()
            .await?;
        read_json(response).await
    }

    pub async fn list_event_chats(&self, event_id: EventId) -> Result<Vec<ChatSummary>> {
        let response = self
            .authorized(self.http.get(self.url(&format!("/events/{event_id}/chats"))))
            .send()
            .await?;
        Ok(read_json::<ListChatsResponse>(response).await?.chats)
    }

    pub async fn notifications(&self, limit: u32) -> Result<Vec<NotificationPayload>> {
        let response = self
            .authorized(self.http.get(self.url("/notifications")))
            .query(&[("limit", limit)])
            .send()
            .await?;
        Ok(read_json::<ListNotificationsResponse>(response)
            .await?
            .notifications)
    }

    pub async fn mark_notification_read(
        &self,
        notification_id: NotificationId,
    ) -> Result<NotificationPayload> {
        let response = self
            .authorized(
                self.http
                    .patch(self.url(&format!("/notifications/{notification_id}/read"))),
            )
            .send()
            .await?;
        Ok(read_json::<NotificationResponse>(response)
            .await?
            .notification)
    }
}

fn forget_ack(pending: &PendingAcks, ack: u64) {
    if let Some(waiters) = lock(pending).as_mut() {
        waiters.remove(&ack);
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let error = response
        .json::<ApiError>()
        .await
        .unwrap_or_else(|_| ApiError::new(ErrorCode::Internal, status.to_string()));
    Err(ClientError::Api {
        status: status.as_u16(),
        error,
    })
}

async fn read_events<S>(mut source: S, pending: PendingAcks, events: broadcast::Sender<ClientEvent>)
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = source.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!(error = %err, "realtime connection failed");
                break;
            }
        };
        match serde_json::from_str::<ServerEvent>(&text) {
            Ok(ServerEvent::Ack(ack)) => {
                let waiter = lock(&pending)
                    .as_mut()
                    .and_then(|waiters| waiters.remove(&ack.ack));
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(ack);
                    }
                    None => debug!(ack = ack.ack, "late or unknown ack"),
                }
            }
            Ok(ServerEvent::MessageNew(message)) => {
                let _ = events.send(ClientEvent::MessageNew(message));
            }
            Ok(ServerEvent::MessageStatus(status)) => {
                let _ = events.send(ClientEvent::MessageStatus(status));
            }
            Ok(ServerEvent::Error(err)) => {
                let _ = events.send(ClientEvent::ServerError(err));
            }
            Err(err) => warn!(error = %err, "unrecognized server frame"),
        }
    }
    lock(&pending).take();
    let _ = events.send(ClientEvent::Disconnected);
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
