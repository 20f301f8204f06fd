use shared::error::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("server url must start with http:// or https://: {0}")]
    InvalidServerUrl(String),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {}", error.message)]
    Api { status: u16, error: ApiError },
    #[error("websocket failure: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("realtime connection is not open")]
    NotConnected,
    #[error("timed out waiting for acknowledgement")]
    Timeout,
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
