use axum::{http::StatusCode, Json};
use shared::error::{ApiError, ErrorCode};

pub(crate) type HttpError = (StatusCode, Json<ApiError>);

pub(crate) fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn http_error(err: ApiError) -> HttpError {
    (status_for(err.code), Json(err))
}

pub(crate) fn unauthorized() -> HttpError {
    http_error(ApiError::new(ErrorCode::Unauthorized, "Unauthorized"))
}

pub(crate) fn invalid_chat_id() -> HttpError {
    http_error(ApiError::validation("Invalid chat id"))
}
