#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unexpected original version while writing migration record")]
    UnexpectedOriginalVersion,

    #[error("invalid migration status `{0}`")]
    InvalidStatus(String),

    #[error("invalid migration event type `{0}`")]
    InvalidEventType(String),

    #[cfg(feature = "pg")]
    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),

    #[error("std::num `{0}`")]
    TryFromInt(#[from] std::num::TryFromIntError),

    #[error("{0}")]
    Any(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
