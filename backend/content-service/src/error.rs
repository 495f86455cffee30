use thiserror::Error;

/// Result type for content-service operations.
pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Cache store unreachable or returned garbage. Callers fail open and
    /// serve from the canonical store instead of surfacing this.
    #[error("cache error: {0}")]
    Cache(String),

    #[error("event bus error: {0}")]
    EventBus(#[from] event_bus::EventBusError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Cache(err.to_string())
    }
}
