use std::sync::Arc;

use event_bus::{EventBus, EventBusConfig};
use media_service::db::{MediaRepo, PgMediaRepo};
use media_service::events::spawn_post_deleted_consumer;
use media_service::storage::{ObjectStorage, S3ObjectStorage};
use media_service::Config;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_service=debug,event_bus=info".into()),
        )
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!("connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;

    let repo = PgMediaRepo::new(pool);
    repo.ensure_tables().await?;

    let storage = S3ObjectStorage::from_env(&config.storage).await;

    // Fatal when the broker stays unreachable: without the event subsystem
    // deleted posts would leak their stored objects.
    let bus = EventBus::connect(EventBusConfig::from_env()).await?;

    let repo: Arc<dyn MediaRepo> = Arc::new(repo);
    let storage: Arc<dyn ObjectStorage> = Arc::new(storage);
    let subscription = spawn_post_deleted_consumer(&bus, repo, storage).await?;
    info!("media-service consuming post deletion events");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining consumer");

    subscription.shutdown(config.shutdown_drain).await;
    bus.close().await;

    Ok(())
}
