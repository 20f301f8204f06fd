use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{
        ChatId, ChatType, EventId, MessageId, MessageStatus, NotificationId, NotificationKind,
        ParticipantStatus, UserId,
    },
    protocol::{MessagePayload, NotificationPayload},
};
use tokio::sync::RwLock;

use crate::{
    Backend, ChatRecord, ChatStore, MemberState, NewReport, NotificationDraft, NotificationSink,
    Page, StoreError, StoreResult,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserDoc {
    id: UserId,
    username: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventDoc {
    id: EventId,
    creator_id: UserId,
    title: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ParticipantDoc {
    event_id: EventId,
    user_id: UserId,
    status: ParticipantStatus,
    joined_at: DateTime<Utc>,
    #[serde(default)]
    left_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageDoc {
    id: MessageId,
    chat_id: ChatId,
    event_id: EventId,
    sender_id: UserId,
    content: String,
    status: MessageStatus,
    sent_at: DateTime<Utc>,
    #[serde(default)]
    delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    seen_at: Option<DateTime<Utc>>,
}

impl MessageDoc {
    fn payload(&self) -> MessagePayload {
        MessagePayload {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            content: self.content.clone(),
            status: self.status,
            sent_at: self.sent_at,
            delivered_at: self.delivered_at,
            seen_at: self.seen_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NotificationDoc {
    id: NotificationId,
    user_id: UserId,
    kind: NotificationKind,
    title: String,
    body: String,
    payload: serde_json::Value,
    is_read: bool,
    created_at: DateTime<Utc>,
    #[serde(default)]
    read_at: Option<DateTime<Utc>>,
}

impl NotificationDoc {
    fn payload(&self) -> NotificationPayload {
        NotificationPayload {
            id: self.id,
            kind: self.kind,
            title: self.title.clone(),
            body: self.body.clone(),
            payload: self.payload.clone(),
            is_read: self.is_read,
            created_at: self.created_at,
            read_at: self.read_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Collections {
    next_id: i64,
    users: Vec<UserDoc>,
    events: Vec<EventDoc>,
    participants: Vec<ParticipantDoc>,
    messages: Vec<MessageDoc>,
    notifications: Vec<NotificationDoc>,
}

impl Collections {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn event(&self, event_id: EventId) -> Option<&EventDoc> {
        self.events
            .iter()
            .find(|event| event.id == event_id && event.deleted_at.is_none())
    }

    fn is_joined(&self, event_id: EventId, user_id: UserId) -> bool {
        self.participants.iter().any(|p| {
            p.event_id == event_id && p.user_id == user_id && p.status == ParticipantStatus::Joined
        })
    }

    fn can_access_event(&self, event_id: EventId, user_id: UserId) -> bool {
        match self.event(event_id) {
            Some(event) => event.creator_id == user_id || self.is_joined(event_id, user_id),
            None => false,
        }
    }

    /// Creator plus joined participants: the implicit members of the
    /// event's group chat.
    fn group_members(&self, event_id: EventId) -> Vec<UserId> {
        let Some(event) = self.event(event_id) else {
            return Vec::new();
        };
        let mut members = vec![event.creator_id];
        for participant in &self.participants {
            if participant.event_id == event_id
                && participant.status == ParticipantStatus::Joined
                && !members.contains(&participant.user_id)
            {
                members.push(participant.user_id);
            }
        }
        members
    }

    fn group_chat(&self, event_id: EventId) -> Option<ChatRecord> {
        self.event(event_id).map(|event| ChatRecord {
            id: ChatId::event_group(event.id),
            chat_type: ChatType::EventGroup,
            event_id: event.id,
            created_by: Some(event.creator_id),
            created_at: event.created_at,
        })
    }

    fn push_notification(&mut self, user_id: UserId, draft: &NotificationDraft) {
        let id = NotificationId(self.allocate_id());
        self.notifications.push(NotificationDoc {
            id,
            user_id,
            kind: draft.kind,
            title: draft.title.clone(),
            body: draft.body.clone(),
            payload: draft.payload.clone(),
            is_read: false,
            created_at: Utc::now(),
            read_at: None,
        });
    }
}

/// Document-oriented store used when no relational database is configured.
///
/// Collections live in memory and, when a snapshot path is given, are
/// rewritten to that JSON file after every mutation. There is no chat
/// collection: each event has exactly one implicit group chat addressed as
/// `event:{id}`, and its members are the event creator plus joined
/// participants.
pub struct DocumentStore {
    collections: RwLock<Collections>,
    snapshot_path: Option<PathBuf>,
}

impl DocumentStore {
    pub fn in_memory() -> Self {
        Self {
            collections: RwLock::new(Collections::default()),
            snapshot_path: None,
        }
    }

    pub async fn open(snapshot_path: Option<PathBuf>) -> StoreResult<Self> {
        let collections = match &snapshot_path {
            Some(path) if tokio::fs::try_exists(path).await? => {
                let bytes = tokio::fs::read(path).await?;
                let collections: Collections = serde_json::from_slice(&bytes)?;
                tracing::info!(
                    path = %path.display(),
                    events = collections.events.len(),
                    messages = collections.messages.len(),
                    "loaded document snapshot"
                );
                collections
            }
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                Collections::default()
            }
            None => Collections::default(),
        };
        Ok(Self {
            collections: RwLock::new(collections),
            snapshot_path,
        })
    }

    /// Applies `apply` under the write lock. With a snapshot path the change
    /// is staged on a copy and only becomes visible once the snapshot write
    /// succeeds, so a failed write leaves the collections untouched.
    async fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut Collections) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut docs = self.collections.write().await;
        if self.snapshot_path.is_none() {
            return apply(&mut docs);
        }
        let mut staged = docs.clone();
        let out = apply(&mut staged)?;
        self.persist(&staged).await?;
        *docs = staged;
        Ok(out)
    }

    async fn persist(&self, collections: &Collections) -> StoreResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(collections)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn group_event(chat_id: ChatId) -> StoreResult<EventId> {
    chat_id
        .synthesized_event()
        .ok_or_else(|| StoreError::InvalidChatId(chat_id.to_string()))
}

#[async_trait]
impl ChatStore for DocumentStore {
    fn backend(&self) -> Backend {
        Backend::Document
    }

    async fn health_check(&self) -> StoreResult<()> {
        let _guard = self.collections.read().await;
        Ok(())
    }

    async fn create_user(&self, username: &str) -> StoreResult<UserId> {
        self.mutate(|docs| {
            if let Some(user) = docs.users.iter().find(|u| u.username == username) {
                return Ok(user.id);
            }
            let id = UserId(docs.allocate_id());
            docs.users.push(UserDoc {
                id,
                username: username.to_string(),
                created_at: Utc::now(),
            });
            Ok(id)
        })
        .await
    }

    async fn user_exists(&self, user_id: UserId) -> StoreResult<bool> {
        let docs = self.collections.read().await;
        Ok(docs.users.iter().any(|u| u.id == user_id))
    }

    async fn create_event(&self, creator_id: UserId, title: &str) -> StoreResult<EventId> {
        self.mutate(|docs| {
            let id = EventId(docs.allocate_id());
            docs.events.push(EventDoc {
                id,
                creator_id,
                title: title.to_string(),
                created_at: Utc::now(),
                deleted_at: None,
            });
            Ok(id)
        })
        .await
    }

    async fn event_creator(&self, event_id: EventId) -> StoreResult<Option<UserId>> {
        let docs = self.collections.read().await;
        Ok(docs.event(event_id).map(|event| event.creator_id))
    }

    async fn join_event(&self, event_id: EventId, user_id: UserId) -> StoreResult<()> {
        self.mutate(|docs| {
            let now = Utc::now();
            let existing = docs
                .participants
                .iter_mut()
                .find(|p| p.event_id == event_id && p.user_id == user_id);
            match existing {
                Some(participant) => {
                    participant.status = ParticipantStatus::Joined;
                    participant.joined_at = now;
                    participant.left_at = None;
                }
                None => docs.participants.push(ParticipantDoc {
                    event_id,
                    user_id,
                    status: ParticipantStatus::Joined,
                    joined_at: now,
                    left_at: None,
                }),
            }
            Ok(())
        })
        .await
    }

    async fn leave_event(&self, event_id: EventId, user_id: UserId) -> StoreResult<()> {
        self.mutate(|docs| {
            for participant in docs
                .participants
                .iter_mut()
                .filter(|p| p.event_id == event_id && p.user_id == user_id)
            {
                participant.status = ParticipantStatus::Left;
                participant.left_at = Some(Utc::now());
            }
            Ok(())
        })
        .await
    }

    async fn is_joined_participant(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreResult<bool> {
        let docs = self.collections.read().await;
        Ok(docs.event(event_id).is_some() && docs.is_joined(event_id, user_id))
    }

    async fn can_access_event(&self, event_id: EventId, user_id: UserId) -> StoreResult<bool> {
        let docs = self.collections.read().await;
        Ok(docs.can_access_event(event_id, user_id))
    }

    async fn can_access_chat(&self, chat_id: ChatId, user_id: UserId) -> StoreResult<bool> {
        let event_id = group_event(chat_id)?;
        let docs = self.collections.read().await;
        Ok(docs.can_access_event(event_id, user_id))
    }

    async fn ensure_event_group_chat(
        &self,
        event_id: EventId,
        _user_id: UserId,
    ) -> StoreResult<ChatId> {
        let docs = self.collections.read().await;
        docs.group_chat(event_id)
            .map(|chat| chat.id)
            .ok_or(StoreError::NotFound("event"))
    }

    async fn find_chat(&self, chat_id: ChatId) -> StoreResult<Option<ChatRecord>> {
        let event_id = group_event(chat_id)?;
        let docs = self.collections.read().await;
        Ok(docs.group_chat(event_id))
    }

    async fn list_event_chats(&self, event_id: EventId) -> StoreResult<Vec<ChatRecord>> {
        let docs = self.collections.read().await;
        Ok(docs.group_chat(event_id).into_iter().collect())
    }

    async fn create_direct_chat(
        &self,
        _event_id: EventId,
        _creator_id: UserId,
        _participant_id: UserId,
    ) -> StoreResult<ChatId> {
        Err(StoreError::Unsupported("direct chats"))
    }

    async fn upsert_active_member(&self, chat_id: ChatId, _user_id: UserId) -> StoreResult<()> {
        group_event(chat_id).map(|_| ())
    }

    async fn member_state(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> StoreResult<Option<MemberState>> {
        let event_id = group_event(chat_id)?;
        let docs = self.collections.read().await;
        Ok(docs.can_access_event(event_id, user_id).then_some(MemberState {
            active: true,
            is_blocked: false,
            blocked_by: None,
            blocked_reason: None,
        }))
    }

    async fn block_member(
        &self,
        _chat_id: ChatId,
        _target_id: UserId,
        _blocked_by: UserId,
        _reason: Option<&str>,
    ) -> StoreResult<()> {
        Err(StoreError::Unsupported("chat blocking"))
    }

    async fn report_user(&self, _report: NewReport) -> StoreResult<()> {
        Err(StoreError::Unsupported("user reports"))
    }

    async fn list_messages(&self, chat_id: ChatId, page: Page) -> StoreResult<Vec<MessagePayload>> {
        group_event(chat_id)?;
        let docs = self.collections.read().await;
        let mut matching: Vec<&MessageDoc> =
            docs.messages.iter().filter(|m| m.chat_id == chat_id).collect();
        matching.sort_by(|a, b| (b.sent_at, b.id).cmp(&(a.sent_at, a.id)));
        let mut messages: Vec<MessagePayload> = matching
            .into_iter()
            .skip(usize::try_from(page.offset).unwrap_or(0))
            .take(usize::try_from(page.limit).unwrap_or(0))
            .map(MessageDoc::payload)
            .collect();
        messages.reverse();
        Ok(messages)
    }

    async fn create_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
    ) -> StoreResult<MessagePayload> {
        let event_id = group_event(chat_id)?;
        self.mutate(|docs| {
            if docs.event(event_id).is_none() {
                return Err(StoreError::NotFound("chat"));
            }
            let doc = MessageDoc {
                id: MessageId(docs.allocate_id()),
                chat_id,
                event_id,
                sender_id,
                content: content.to_string(),
                status: MessageStatus::Sent,
                sent_at: Utc::now(),
                delivered_at: None,
                seen_at: None,
            };
            let payload = doc.payload();
            docs.messages.push(doc);
            Ok(payload)
        })
        .await
    }

    async fn get_message(&self, message_id: MessageId) -> StoreResult<Option<MessagePayload>> {
        let docs = self.collections.read().await;
        Ok(docs
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .map(MessageDoc::payload))
    }

    async fn mark_delivered(&self, message_id: MessageId) -> StoreResult<bool> {
        self.mutate(|docs| {
            let Some(message) = docs
                .messages
                .iter_mut()
                .find(|m| m.id == message_id && m.status == MessageStatus::Sent)
            else {
                return Ok(false);
            };
            message.status = MessageStatus::Delivered;
            message.delivered_at = Some(Utc::now());
            Ok(true)
        })
        .await
    }

    async fn mark_seen(&self, chat_id: ChatId, message_id: MessageId) -> StoreResult<bool> {
        group_event(chat_id)?;
        self.mutate(|docs| {
            let Some(message) = docs.messages.iter_mut().find(|m| {
                m.id == message_id
                    && m.chat_id == chat_id
                    && m.status.can_transition_to(MessageStatus::Seen)
            }) else {
                return Ok(false);
            };
            message.status = MessageStatus::Seen;
            message.seen_at = Some(Utc::now());
            Ok(true)
        })
        .await
    }

    async fn list_notifications(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> StoreResult<Vec<NotificationPayload>> {
        let docs = self.collections.read().await;
        let mut mine: Vec<&NotificationDoc> = docs
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .collect();
        mine.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(mine
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(NotificationDoc::payload)
            .collect())
    }

    async fn mark_notification_read(
        &self,
        user_id: UserId,
        notification_id: NotificationId,
    ) -> StoreResult<Option<NotificationPayload>> {
        self.mutate(|docs| {
            let Some(notification) = docs
                .notifications
                .iter_mut()
                .find(|n| n.id == notification_id && n.user_id == user_id)
            else {
                return Ok(None);
            };
            notification.is_read = true;
            notification.read_at.get_or_insert_with(Utc::now);
            Ok(Some(notification.payload()))
        })
        .await
    }
}

#[async_trait]
impl NotificationSink for DocumentStore {
    async fn notify_chat_members(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        draft: &NotificationDraft,
    ) -> StoreResult<u64> {
        let event_id = group_event(chat_id)?;
        self.mutate(|docs| {
            let recipients: Vec<UserId> = docs
                .group_members(event_id)
                .into_iter()
                .filter(|user| *user != sender_id)
                .collect();
            for user in &recipients {
                docs.push_notification(*user, draft);
            }
            Ok(recipients.len() as u64)
        })
        .await
    }

    async fn notify_user(&self, user_id: UserId, draft: &NotificationDraft) -> StoreResult<()> {
        self.mutate(|docs| {
            docs.push_notification(user_id, draft);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
#[path = "tests/document_tests.rs"]
mod tests;
