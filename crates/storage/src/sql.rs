use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{
        ChatId, ChatType, EventId, MessageId, MessageStatus, NotificationId, NotificationKind,
        UserId,
    },
    protocol::{MessagePayload, NotificationPayload},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};

use crate::{
    Backend, ChatRecord, ChatStore, MemberState, NewReport, NotificationDraft, NotificationSink,
    Page, StoreError, StoreResult,
};

const MESSAGE_COLUMNS: &str =
    "id, chat_id, sender_id, content, status, sent_at, delivered_at, seen_at";
const NOTIFICATION_COLUMNS: &str =
    "id, type, title, body, payload, is_read, created_at, read_at";

/// Relational store backed by SQLite through sqlx.
#[derive(Clone)]
pub struct SqlStore {
    pool: Pool<Sqlite>,
}

impl SqlStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to an in-memory url opens its own empty database.
        let pool_options = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };
        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

fn stored_chat(chat_id: ChatId) -> StoreResult<i64> {
    chat_id
        .stored_id()
        .ok_or_else(|| StoreError::InvalidChatId(chat_id.to_string()))
}

fn message_from_row(r: &SqliteRow) -> StoreResult<MessagePayload> {
    Ok(MessagePayload {
        id: MessageId(r.try_get("id")?),
        chat_id: ChatId::Stored(r.try_get("chat_id")?),
        sender_id: UserId(r.try_get("sender_id")?),
        content: r.try_get("content")?,
        status: MessageStatus::parse(r.try_get::<&str, _>("status")?)
            .unwrap_or(MessageStatus::Sent),
        sent_at: r.try_get("sent_at")?,
        delivered_at: r.try_get("delivered_at")?,
        seen_at: r.try_get("seen_at")?,
    })
}

fn notification_from_row(r: &SqliteRow) -> StoreResult<NotificationPayload> {
    let payload: String = r.try_get("payload")?;
    Ok(NotificationPayload {
        id: NotificationId(r.try_get("id")?),
        kind: NotificationKind::parse(r.try_get::<&str, _>("type")?)
            .unwrap_or(NotificationKind::NewMessage),
        title: r.try_get("title")?,
        body: r.try_get("body")?,
        payload: serde_json::from_str(&payload)?,
        is_read: r.try_get("is_read")?,
        created_at: r.try_get("created_at")?,
        read_at: r.try_get("read_at")?,
    })
}

fn chat_from_row(r: &SqliteRow) -> StoreResult<ChatRecord> {
    Ok(ChatRecord {
        id: ChatId::Stored(r.try_get("id")?),
        chat_type: ChatType::parse(r.try_get::<&str, _>("type")?).unwrap_or(ChatType::Direct),
        event_id: EventId(r.try_get("event_id")?),
        created_by: r.try_get::<Option<i64>, _>("created_by")?.map(UserId),
        created_at: r.try_get("created_at")?,
    })
}

#[async_trait]
impl ChatStore for SqlStore {
    fn backend(&self) -> Backend {
        Backend::Relational
    }

    async fn health_check(&self) -> StoreResult<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn create_user(&self, username: &str) -> StoreResult<UserId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (username, created_at) VALUES (?1, ?2)
             ON CONFLICT(username) DO UPDATE SET username = excluded.username
             RETURNING id",
        )
        .bind(username)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(id))
    }

    async fn user_exists(&self, user_id: UserId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM users WHERE id = ?1 AND deleted_at IS NULL")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn create_event(&self, creator_id: UserId, title: &str) -> StoreResult<EventId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO events (creator_id, title, created_at) VALUES (?1, ?2, ?3) RETURNING id",
        )
        .bind(creator_id.0)
        .bind(title)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(EventId(id))
    }

    async fn event_creator(&self, event_id: EventId) -> StoreResult<Option<UserId>> {
        let creator: Option<i64> = sqlx::query_scalar(
            "SELECT creator_id FROM events WHERE id = ?1 AND deleted_at IS NULL",
        )
        .bind(event_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(creator.map(UserId))
    }

    async fn join_event(&self, event_id: EventId, user_id: UserId) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO event_participants (event_id, user_id, status, joined_at)
             VALUES (?1, ?2, 'JOINED', ?3)
             ON CONFLICT(event_id, user_id) DO UPDATE SET
                 status = 'JOINED', joined_at = excluded.joined_at, left_at = NULL, deleted_at = NULL",
        )
        .bind(event_id.0)
        .bind(user_id.0)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn leave_event(&self, event_id: EventId, user_id: UserId) -> StoreResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE event_participants SET status = 'LEFT', left_at = ?3
             WHERE event_id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
        )
        .bind(event_id.0)
        .bind(user_id.0)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE chat_members SET left_at = ?3, updated_at = ?3
             WHERE user_id = ?2
               AND left_at IS NULL
               AND chat_id IN (SELECT id FROM chats WHERE event_id = ?1)",
        )
        .bind(event_id.0)
        .bind(user_id.0)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn is_joined_participant(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM event_participants
             WHERE event_id = ?1 AND user_id = ?2 AND status = 'JOINED' AND deleted_at IS NULL",
        )
        .bind(event_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn can_access_event(&self, event_id: EventId, user_id: UserId) -> StoreResult<bool> {
        let allowed: i64 = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM events e
                 WHERE e.id = ?1
                   AND e.deleted_at IS NULL
                   AND (e.creator_id = ?2 OR EXISTS (
                        SELECT 1 FROM event_participants p
                        WHERE p.event_id = e.id
                          AND p.user_id = ?2
                          AND p.status = 'JOINED'
                          AND p.deleted_at IS NULL))
             )",
        )
        .bind(event_id.0)
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(allowed != 0)
    }

    async fn can_access_chat(&self, chat_id: ChatId, user_id: UserId) -> StoreResult<bool> {
        let chat_id = stored_chat(chat_id)?;
        let allowed: i64 = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM chats c
                 INNER JOIN events e ON e.id = c.event_id
                 WHERE c.id = ?1
                   AND c.deleted_at IS NULL
                   AND e.deleted_at IS NULL
                   AND (e.creator_id = ?2 OR EXISTS (
                        SELECT 1 FROM event_participants p
                        WHERE p.event_id = e.id
                          AND p.user_id = ?2
                          AND p.status = 'JOINED'
                          AND p.deleted_at IS NULL))
             )",
        )
        .bind(chat_id)
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(allowed != 0)
    }

    async fn ensure_event_group_chat(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreResult<ChatId> {
        let Some(creator_id) = self.event_creator(event_id).await? else {
            return Err(StoreError::NotFound("event"));
        };

        // The partial unique index on (event_id) for live group chats turns a
        // concurrent second insert into a no-op.
        let inserted: Option<i64> = sqlx::query_scalar(
            "INSERT INTO chats (event_id, type, created_by, created_at)
             VALUES (?1, 'EVENT_GROUP', ?2, ?3)
             ON CONFLICT DO NOTHING
             RETURNING id",
        )
        .bind(event_id.0)
        .bind(user_id.0)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        let id = match inserted {
            Some(id) => {
                // The creator belongs to the group chat from the moment it exists.
                sqlx::query(
                    "INSERT INTO chat_members (chat_id, user_id, joined_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)
                     ON CONFLICT(chat_id, user_id) DO NOTHING",
                )
                .bind(id)
                .bind(creator_id.0)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
                id
            }
            None => {
                sqlx::query_scalar(
                    "SELECT id FROM chats
                     WHERE event_id = ?1 AND type = 'EVENT_GROUP' AND deleted_at IS NULL",
                )
                .bind(event_id.0)
                .fetch_one(&self.pool)
                .await?
            }
        };

        let chat_id = ChatId::Stored(id);
        self.upsert_active_member(chat_id, user_id).await?;
        Ok(chat_id)
    }

    async fn find_chat(&self, chat_id: ChatId) -> StoreResult<Option<ChatRecord>> {
        let chat_id = stored_chat(chat_id)?;
        let row = sqlx::query(
            "SELECT id, type, event_id, created_by, created_at
             FROM chats WHERE id = ?1 AND deleted_at IS NULL",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(chat_from_row).transpose()
    }

    async fn list_event_chats(&self, event_id: EventId) -> StoreResult<Vec<ChatRecord>> {
        let rows = sqlx::query(
            "SELECT id, type, event_id, created_by, created_at
             FROM chats
             WHERE event_id = ?1 AND deleted_at IS NULL
             ORDER BY created_at ASC, id ASC",
        )
        .bind(event_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chat_from_row).collect()
    }

    async fn create_direct_chat(
        &self,
        event_id: EventId,
        creator_id: UserId,
        participant_id: UserId,
    ) -> StoreResult<ChatId> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO chats (event_id, type, created_by, created_at)
             VALUES (?1, 'DIRECT', ?2, ?3)
             RETURNING id",
        )
        .bind(event_id.0)
        .bind(creator_id.0)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        for member in [creator_id, participant_id] {
            sqlx::query(
                "INSERT INTO chat_members (chat_id, user_id, joined_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(chat_id, user_id) DO NOTHING",
            )
            .bind(id)
            .bind(member.0)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(ChatId::Stored(id))
    }

    async fn upsert_active_member(&self, chat_id: ChatId, user_id: UserId) -> StoreResult<()> {
        let chat_id = stored_chat(chat_id)?;
        sqlx::query(
            "INSERT INTO chat_members (chat_id, user_id, joined_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(chat_id, user_id) DO UPDATE SET
                 left_at = NULL, deleted_at = NULL, updated_at = excluded.updated_at",
        )
        .bind(chat_id)
        .bind(user_id.0)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn member_state(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> StoreResult<Option<MemberState>> {
        let chat_id = stored_chat(chat_id)?;
        let row = sqlx::query(
            "SELECT left_at IS NULL AS active, is_blocked, blocked_by, blocked_reason
             FROM chat_members
             WHERE chat_id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
        )
        .bind(chat_id)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            Ok(MemberState {
                active: r.try_get("active")?,
                is_blocked: r.try_get("is_blocked")?,
                blocked_by: r.try_get::<Option<i64>, _>("blocked_by")?.map(UserId),
                blocked_reason: r.try_get("blocked_reason")?,
            })
        })
        .transpose()
    }

    async fn block_member(
        &self,
        chat_id: ChatId,
        target_id: UserId,
        blocked_by: UserId,
        reason: Option<&str>,
    ) -> StoreResult<()> {
        let chat_id = stored_chat(chat_id)?;
        sqlx::query(
            "INSERT INTO chat_members
                 (chat_id, user_id, joined_at, is_blocked, blocked_by, blocked_reason, updated_at)
             VALUES (?1, ?2, ?5, 1, ?3, ?4, ?5)
             ON CONFLICT(chat_id, user_id) DO UPDATE SET
                 is_blocked = 1, blocked_by = ?3, blocked_reason = ?4, updated_at = ?5",
        )
        .bind(chat_id)
        .bind(target_id.0)
        .bind(blocked_by.0)
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn report_user(&self, report: NewReport) -> StoreResult<()> {
        let chat_id = stored_chat(report.chat_id)?;
        sqlx::query(
            "INSERT INTO user_reports
                 (reporter_id, reported_user_id, event_id, chat_id, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(report.reporter_id.0)
        .bind(report.reported_user_id.0)
        .bind(report.event_id.0)
        .bind(chat_id)
        .bind(&report.reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(&self, chat_id: ChatId, page: Page) -> StoreResult<Vec<MessagePayload>> {
        let chat_id = stored_chat(chat_id)?;
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE chat_id = ?1 AND deleted_at IS NULL
             ORDER BY sent_at DESC, id DESC
             LIMIT ?2 OFFSET ?3"
        ))
        .bind(chat_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn create_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
    ) -> StoreResult<MessagePayload> {
        let chat_id = stored_chat(chat_id)?;
        let row = sqlx::query(&format!(
            "INSERT INTO messages (chat_id, sender_id, content, status, sent_at)
             VALUES (?1, ?2, ?3, 'SENT', ?4)
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(chat_id)
        .bind(sender_id.0)
        .bind(content)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        message_from_row(&row)
    }

    async fn get_message(&self, message_id: MessageId) -> StoreResult<Option<MessagePayload>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1 AND deleted_at IS NULL"
        ))
        .bind(message_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn mark_delivered(&self, message_id: MessageId) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE messages SET status = 'DELIVERED', delivered_at = ?2
             WHERE id = ?1 AND status = 'SENT' AND deleted_at IS NULL",
        )
        .bind(message_id.0)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_seen(&self, chat_id: ChatId, message_id: MessageId) -> StoreResult<bool> {
        let chat_id = stored_chat(chat_id)?;
        let result = sqlx::query(
            "UPDATE messages SET status = 'SEEN', seen_at = ?3
             WHERE id = ?1
               AND chat_id = ?2
               AND status IN ('SENT', 'DELIVERED')
               AND deleted_at IS NULL",
        )
        .bind(message_id.0)
        .bind(chat_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_notifications(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> StoreResult<Vec<NotificationPayload>> {
        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS}
             FROM notifications
             WHERE user_id = ?1 AND deleted_at IS NULL
             ORDER BY created_at DESC, id DESC
             LIMIT ?2"
        ))
        .bind(user_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn mark_notification_read(
        &self,
        user_id: UserId,
        notification_id: NotificationId,
    ) -> StoreResult<Option<NotificationPayload>> {
        let row = sqlx::query(&format!(
            "UPDATE notifications SET is_read = 1, read_at = COALESCE(read_at, ?3)
             WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL
             RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(notification_id.0)
        .bind(user_id.0)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(notification_from_row).transpose()
    }
}

#[async_trait]
impl NotificationSink for SqlStore {
    async fn notify_chat_members(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        draft: &NotificationDraft,
    ) -> StoreResult<u64> {
        let chat_id = stored_chat(chat_id)?;
        let result = sqlx::query(
            "INSERT INTO notifications (user_id, type, title, body, payload, created_at)
             SELECT cm.user_id, ?3, ?4, ?5, ?6, ?7
             FROM chat_members cm
             WHERE cm.chat_id = ?1
               AND cm.user_id <> ?2
               AND cm.left_at IS NULL
               AND cm.deleted_at IS NULL",
        )
        .bind(chat_id)
        .bind(sender_id.0)
        .bind(draft.kind.as_str())
        .bind(&draft.title)
        .bind(&draft.body)
        .bind(draft.payload.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn notify_user(&self, user_id: UserId, draft: &NotificationDraft) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO notifications (user_id, type, title, body, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(user_id.0)
        .bind(draft.kind.as_str())
        .bind(&draft.title)
        .bind(&draft.body)
        .bind(draft.payload.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> StoreResult<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent)?;
            Ok(())
        }
        _ => Ok(()),
    }
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/sql_tests.rs"]
mod tests;
