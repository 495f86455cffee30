use thiserror::Error;

/// Result type for media-service operations.
pub type Result<T> = std::result::Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("object storage error: {0}")]
    Storage(String),

    #[error("event bus error: {0}")]
    EventBus(#[from] event_bus::EventBusError),

    #[error("configuration error: {0}")]
    Config(String),
}
