use content_service::cache::PostCache;
use content_service::db::{self, PostRepo};
use content_service::events::PostEventPublisher;
use content_service::services::PostService;
use content_service::Config;
use event_bus::{EventBus, EventBusConfig};
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "content_service=debug,event_bus=info".into()),
        )
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env();

    info!("connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    db::ensure_content_tables(&pool).await?;

    info!("connecting to cache store...");
    let redis_client = redis::Client::open(config.cache.url.clone())?;
    let redis = ConnectionManager::new(redis_client).await?;

    // Fatal when the broker stays unreachable: running without the event
    // subsystem would silently starve the derived stores.
    let bus = EventBus::connect(EventBusConfig::from_env()).await?;

    // The request layer (mounted by the gateway) drives this service; the
    // process keeps the shared handles alive until shutdown.
    let _service = Arc::new(PostService::new(
        PostRepo::new(pool),
        PostCache::new(redis),
        PostEventPublisher::new(bus.clone()),
    ));

    info!(
        exchange = %bus.config().exchange,
        "content-service ready, post mutations fan out as domain events"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, closing broker connection");
    bus.close().await;

    Ok(())
}
