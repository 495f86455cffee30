use thiserror::Error;

/// Result type for search-service operations.
pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("event bus error: {0}")]
    EventBus(#[from] event_bus::EventBusError),

    #[error("configuration error: {0}")]
    Config(String),
}
