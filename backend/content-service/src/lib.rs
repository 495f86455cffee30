/// Content Service Library
///
/// Owns the canonical post store for the Pulse platform. Every mutation is
/// fanned out to the other services as a domain event and synchronously
/// invalidates the read-path cache.
///
/// # Modules
///
/// - `models`: Canonical post data structures
/// - `db`: Database access layer and post repository
/// - `cache`: Read-through post caching and invalidation
/// - `events`: Domain event publishing after canonical writes
/// - `services`: Business logic layer called by the request layer
/// - `error`: Error types and handling
/// - `config`: Configuration management
/// - `metrics`: Cache observability counters
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod metrics;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
