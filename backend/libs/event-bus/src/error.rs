use std::time::Duration;
use thiserror::Error;

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, EventBusError>;

#[derive(Debug, Error)]
pub enum EventBusError {
    /// Broker unreachable or the channel failed mid-operation.
    #[error("broker connection error: {0}")]
    Connection(#[from] lapin::Error),

    /// Event payload could not be serialized.
    #[error("event serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Publish did not complete within the configured timeout. The event is
    /// dropped; there is no durable retry queue at this layer.
    #[error("publish timed out after {0:?}")]
    PublishTimeout(Duration),
}
