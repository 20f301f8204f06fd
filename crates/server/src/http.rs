use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Extension, Json,
};
use serde::Deserialize;
use server_api::{chats, delivery, events, notifications};
use shared::{
    domain::{ChatId, EventId, NotificationId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        DirectChatResponse, JoinEventResponse, ListChatsResponse, ListMessagesResponse,
        ListNotificationsResponse, ModerationRequest, NotificationResponse, PostMessageRequest,
        PostMessageResponse, StatusMessageResponse,
    },
};
use storage::Page;

use crate::{
    app_state::AppState,
    auth::AuthUser,
    error::{http_error, invalid_chat_id, HttpError},
};

#[derive(Debug, Deserialize)]
pub(crate) struct PageQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LimitQuery {
    limit: Option<i64>,
}

fn parse_chat_id(raw: &str) -> Result<ChatId, HttpError> {
    raw.parse().map_err(|_| invalid_chat_id())
}

fn status_message(message: &str) -> Json<StatusMessageResponse> {
    Json(StatusMessageResponse {
        message: message.to_string(),
    })
}

pub(crate) async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state.api.store.health_check().await.map_err(|err| {
        tracing::error!(error = %err, "health check failed");
        http_error(ApiError::new(ErrorCode::Unavailable, "Store unavailable"))
    })?;
    Ok("ok")
}

pub(crate) async fn list_event_chats(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(event_id): Path<i64>,
) -> Result<Json<ListChatsResponse>, HttpError> {
    let chats = chats::list_event_chats(&state.api, user_id, EventId(event_id))
        .await
        .map_err(http_error)?;
    Ok(Json(ListChatsResponse { chats }))
}

pub(crate) async fn create_direct_chat(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path((event_id, participant_id)): Path<(i64, i64)>,
) -> Result<(StatusCode, Json<DirectChatResponse>), HttpError> {
    let chat_id = chats::create_direct_chat(
        &state.api,
        user_id,
        EventId(event_id),
        UserId(participant_id),
    )
    .await
    .map_err(http_error)?;
    Ok((
        StatusCode::CREATED,
        Json(DirectChatResponse {
            chat_id,
            message: "Direct chat created".into(),
        }),
    ))
}

pub(crate) async fn join_event(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(event_id): Path<i64>,
) -> Result<(StatusCode, Json<JoinEventResponse>), HttpError> {
    let event_id = EventId(event_id);
    let group_chat_id = events::join_event(&state.api, user_id, event_id)
        .await
        .map_err(http_error)?;
    Ok((
        StatusCode::CREATED,
        Json(JoinEventResponse {
            message: "Joined event".into(),
            event_id,
            group_chat_id,
        }),
    ))
}

pub(crate) async fn leave_event(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(event_id): Path<i64>,
) -> Result<Json<StatusMessageResponse>, HttpError> {
    events::leave_event(&state.api, user_id, EventId(event_id))
        .await
        .map_err(http_error)?;
    Ok(status_message("Left event"))
}

pub(crate) async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(chat_id): Path<String>,
    Query(q): Query<PageQuery>,
) -> Result<Json<ListMessagesResponse>, HttpError> {
    let chat_id = parse_chat_id(&chat_id)?;
    let messages = chats::list_messages(&state.api, user_id, chat_id, Page::clamped(q.limit, q.offset))
        .await
        .map_err(http_error)?;
    Ok(Json(ListMessagesResponse { messages }))
}

pub(crate) async fn post_message(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(chat_id): Path<String>,
    body: Result<Json<PostMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PostMessageResponse>), HttpError> {
    let chat_id = parse_chat_id(&chat_id)?;
    let Json(req) =
        body.map_err(|_| http_error(ApiError::validation("Message content is required")))?;
    let message = delivery::post_message(
        &state.api,
        user_id,
        chat_id,
        &req.content,
        req.client_temp_id.as_deref(),
    )
    .await
    .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(PostMessageResponse { message })))
}

/// Per-sender HTTP send limit. Runs after authentication.
pub(crate) async fn http_send_limit(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    req: Request,
    next: Next,
) -> Result<Response, HttpError> {
    if !state.api.http_limiter.check(user_id).await {
        tracing::warn!(user_id = %user_id, "http send rate limit exceeded");
        return Err(http_error(ApiError::new(
            ErrorCode::RateLimited,
            "Too many messages sent. Please slow down.",
        )));
    }
    Ok(next.run(req).await)
}

pub(crate) async fn block_user(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path((chat_id, target_id)): Path<(String, i64)>,
    body: Option<Json<ModerationRequest>>,
) -> Result<Json<StatusMessageResponse>, HttpError> {
    let chat_id = parse_chat_id(&chat_id)?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    chats::block_user(
        &state.api,
        user_id,
        chat_id,
        UserId(target_id),
        req.reason.as_deref(),
    )
    .await
    .map_err(http_error)?;
    Ok(status_message("User blocked in chat"))
}

pub(crate) async fn report_user(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path((chat_id, target_id)): Path<(String, i64)>,
    body: Option<Json<ModerationRequest>>,
) -> Result<(StatusCode, Json<StatusMessageResponse>), HttpError> {
    let chat_id = parse_chat_id(&chat_id)?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    chats::report_user(
        &state.api,
        user_id,
        chat_id,
        UserId(target_id),
        req.reason.as_deref(),
    )
    .await
    .map_err(http_error)?;
    Ok((StatusCode::CREATED, status_message("User reported successfully")))
}

pub(crate) async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<ListNotificationsResponse>, HttpError> {
    let notifications = notifications::list_notifications(&state.api, user_id, q.limit)
        .await
        .map_err(http_error)?;
    Ok(Json(ListNotificationsResponse { notifications }))
}

pub(crate) async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(notification_id): Path<i64>,
) -> Result<Json<NotificationResponse>, HttpError> {
    let notification =
        notifications::mark_notification_read(&state.api, user_id, NotificationId(notification_id))
            .await
            .map_err(http_error)?;
    Ok(Json(NotificationResponse { notification }))
}
