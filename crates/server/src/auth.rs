use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use server_api::{auth::bearer_token, store_error};
use shared::domain::UserId;

use crate::{
    app_state::AppState,
    error::{http_error, unauthorized, HttpError},
};

/// Caller identity resolved by [`require_user`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct AuthUser(pub(crate) UserId);

pub(crate) fn header_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
}

/// Verifies the token and that its user still exists.
pub(crate) async fn authenticate(state: &AppState, token: Option<&str>) -> Result<UserId, HttpError> {
    let token = token.ok_or_else(unauthorized)?;
    let user_id = state.jwt.verify(token).map_err(|err| {
        tracing::debug!(error = %err, "rejected token");
        unauthorized()
    })?;
    let known = state
        .api
        .store
        .user_exists(user_id)
        .await
        .map_err(|err| http_error(store_error(err)))?;
    if !known {
        tracing::debug!(user_id = %user_id, "token for unknown user");
        return Err(unauthorized());
    }
    Ok(user_id)
}

pub(crate) async fn require_user(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let user_id = authenticate(&state, header_token(req.headers())).await?;
    req.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(req).await)
}
