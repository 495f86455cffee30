use std::sync::Arc;

use event_bus::{EventBus, EventBusConfig};
use search_service::events::spawn_post_consumers;
use search_service::index::{PgSearchIndex, SearchIndex};
use search_service::Config;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "search_service=debug,event_bus=info".into()),
        )
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env();

    info!("connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;

    let index = PgSearchIndex::new(pool);
    index.ensure_tables().await?;

    // Fatal when the broker stays unreachable: an index that cannot consume
    // events only drifts from the canonical store.
    let bus = EventBus::connect(EventBusConfig::from_env()).await?;

    let index: Arc<dyn SearchIndex> = Arc::new(index);
    let subscriptions = spawn_post_consumers(&bus, index).await?;
    info!("search-service consuming post events");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining consumers");

    for subscription in subscriptions {
        subscription.shutdown(config.shutdown_drain).await;
    }
    bus.close().await;

    Ok(())
}
