use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChatId, ChatType, EventId, MessageId, MessageStatus, NotificationId, NotificationKind, UserId},
    error::ApiError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub status: MessageStatus,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub chat_type: ChatType,
    pub event_id: EventId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStatusPayload {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

/// Events a realtime client may emit. Each is wrapped in a [`ClientFrame`]
/// that optionally names an acknowledgement slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientEvent {
    #[serde(rename = "chat:join")]
    JoinChat { event_id: EventId, chat_id: ChatId },
    #[serde(rename = "message:send")]
    SendMessage {
        chat_id: ChatId,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_temp_id: Option<String>,
    },
    #[serde(rename = "message:seen")]
    MarkSeen {
        chat_id: ChatId,
        message_id: MessageId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
    pub event: ClientEvent,
}

/// Frame as read off the wire, before the event body is validated. Keeping
/// the body loose lets the server still answer the ack slot when the event
/// itself is malformed.
#[derive(Debug, Clone, Deserialize)]
pub struct RawClientFrame {
    #[serde(default)]
    pub ack: Option<u64>,
    pub event: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketAck {
    pub ack: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessagePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_temp_id: Option<String>,
}

impl SocketAck {
    pub fn ok(ack: u64) -> Self {
        Self {
            ack,
            ok: true,
            error: None,
            message: None,
            client_temp_id: None,
        }
    }

    pub fn rejected(ack: u64, error: impl Into<String>) -> Self {
        Self {
            ack,
            ok: false,
            error: Some(error.into()),
            message: None,
            client_temp_id: None,
        }
    }

    pub fn sent(ack: u64, message: MessagePayload, client_temp_id: Option<String>) -> Self {
        Self {
            ack,
            ok: true,
            error: None,
            message: Some(message),
            client_temp_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "ack")]
    Ack(SocketAck),
    #[serde(rename = "message:new")]
    MessageNew(MessagePayload),
    #[serde(rename = "message:status")]
    MessageStatus(MessageStatusPayload),
    #[serde(rename = "error")]
    Error(ApiError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListChatsResponse {
    pub chats: Vec<ChatSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMessagesResponse {
    pub messages: Vec<MessagePayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_temp_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageResponse {
    pub message: MessagePayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectChatResponse {
    #[serde(rename = "chatId")]
    pub chat_id: ChatId,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModerationRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinEventResponse {
    pub message: String,
    pub event_id: EventId,
    pub group_chat_id: ChatId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListNotificationsResponse {
    pub notifications: Vec<NotificationPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub notification: NotificationPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_uses_event_names_on_the_wire() {
        let frame: ClientFrame = serde_json::from_value(serde_json::json!({
            "ack": 4,
            "event": {
                "type": "message:send",
                "payload": { "chat_id": "event:9", "content": "hi", "client_temp_id": "tmp-1" }
            }
        }))
        .expect("frame");
        assert_eq!(frame.ack, Some(4));
        assert_eq!(
            frame.event,
            ClientEvent::SendMessage {
                chat_id: ChatId::EventGroup(EventId(9)),
                content: "hi".into(),
                client_temp_id: Some("tmp-1".into()),
            }
        );
    }

    #[test]
    fn join_without_chat_id_is_rejected() {
        let result = serde_json::from_value::<ClientEvent>(serde_json::json!({
            "type": "chat:join",
            "payload": { "event_id": 3 }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn status_event_serializes_with_tag() {
        let event = ServerEvent::MessageStatus(MessageStatusPayload {
            message_id: MessageId(5),
            chat_id: ChatId::Stored(2),
            status: MessageStatus::Delivered,
        });
        let json = serde_json::to_value(&event).expect("json");
        assert_eq!(json["type"], "message:status");
        assert_eq!(json["payload"]["status"], "DELIVERED");
        assert_eq!(json["payload"]["chat_id"], "2");
    }
}
