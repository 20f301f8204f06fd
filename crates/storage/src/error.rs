use shared::domain::InvalidChatId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid chat id: {0}")]
    InvalidChatId(String),
    #[error("{0} requires the relational store")]
    Unsupported(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl From<InvalidChatId> for StoreError {
    fn from(err: InvalidChatId) -> Self {
        Self::InvalidChatId(err.0)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
