use std::time::Duration;

/// Configuration for the media service, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    /// How long to wait for in-flight handlers when shutting down.
    pub shutdown_drain: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
}

impl Config {
    pub fn from_env() -> crate::Result<Self> {
        Ok(Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgresql://localhost/pulse".to_string()),
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            },
            storage: StorageConfig {
                bucket: std::env::var("MEDIA_BUCKET")
                    .map_err(|_| crate::MediaError::Config("MEDIA_BUCKET must be set".into()))?,
            },
            shutdown_drain: Duration::from_secs(
                std::env::var("SHUTDOWN_DRAIN_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
            ),
        })
    }
}
