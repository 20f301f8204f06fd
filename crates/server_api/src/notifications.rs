use shared::{
    domain::{NotificationId, UserId},
    error::ApiError,
    protocol::NotificationPayload,
};
use storage::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

use crate::{store_error, ApiContext};

/// Newest first, `limit` clamped to `[1, 100]` and defaulting to 30.
pub async fn list_notifications(
    ctx: &ApiContext,
    user_id: UserId,
    limit: Option<i64>,
) -> Result<Vec<NotificationPayload>, ApiError> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    ctx.store
        .list_notifications(user_id, limit)
        .await
        .map_err(store_error)
}

pub async fn mark_notification_read(
    ctx: &ApiContext,
    user_id: UserId,
    notification_id: NotificationId,
) -> Result<NotificationPayload, ApiError> {
    ctx.store
        .mark_notification_read(user_id, notification_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ApiError::not_found("Notification not found"))
}
