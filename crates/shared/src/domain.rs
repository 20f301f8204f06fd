use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(EventId);
id_newtype!(MessageId);
id_newtype!(NotificationId);

const EVENT_GROUP_PREFIX: &str = "event:";

/// Address of a chat room.
///
/// Relational deployments store chats as rows and address them by row id.
/// Document deployments have no chat table: the single group chat of an
/// event is derived from the event id and rendered as `event:{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatId {
    Stored(i64),
    EventGroup(EventId),
}

impl ChatId {
    pub fn event_group(event_id: EventId) -> Self {
        Self::EventGroup(event_id)
    }

    /// Event this id names directly, if it is a synthesized group id.
    pub fn synthesized_event(&self) -> Option<EventId> {
        match self {
            Self::EventGroup(event_id) => Some(*event_id),
            Self::Stored(_) => None,
        }
    }

    pub fn stored_id(&self) -> Option<i64> {
        match self {
            Self::Stored(id) => Some(*id),
            Self::EventGroup(_) => None,
        }
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stored(id) => write!(f, "{id}"),
            Self::EventGroup(event_id) => write!(f, "{EVENT_GROUP_PREFIX}{}", event_id.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid chat id: {0:?}")]
pub struct InvalidChatId(pub String);

impl FromStr for ChatId {
    type Err = InvalidChatId;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let parsed = match raw.strip_prefix(EVENT_GROUP_PREFIX) {
            Some(event) => parse_positive(event).map(|id| Self::EventGroup(EventId(id))),
            None => parse_positive(raw).map(Self::Stored),
        };
        parsed.ok_or_else(|| InvalidChatId(raw.to_string()))
    }
}

fn parse_positive(raw: &str) -> Option<i64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<i64>().ok().filter(|id| *id > 0)
}

impl Serialize for ChatId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChatId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatType {
    EventGroup,
    Direct,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventGroup => "EVENT_GROUP",
            Self::Direct => "DIRECT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "EVENT_GROUP" => Some(Self::EventGroup),
            "DIRECT" => Some(Self::Direct),
            _ => None,
        }
    }
}

/// Delivery state of a persisted message. Transitions only move forward:
/// `Sent -> Delivered -> Seen`, or `Sent -> Seen` when the acknowledgement
/// arrives before the delivery update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Seen => "SEEN",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SENT" => Some(Self::Sent),
            "DELIVERED" => Some(Self::Delivered),
            "SEEN" => Some(Self::Seen),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        next > self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    Joined,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    NewMessage,
    EventJoined,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewMessage => "NEW_MESSAGE",
            Self::EventJoined => "EVENT_JOINED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "NEW_MESSAGE" => Some(Self::NewMessage),
            "EVENT_JOINED" => Some(Self::EventJoined),
            _ => None,
        }
    }
}
