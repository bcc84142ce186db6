//! Processing Runtime - incremental stats aggregator
//!
//! Bootstraps the stats snapshot and ticks the watermark aggregator on a
//! fixed interval until CTRL+C.
//!
//! Usage:
//!   cargo run --release --bin processing
//!
//! Environment variables:
//!   STORAGE_DB_PATH - SQLite database written by the storage runtime
//!   PROCESSING_STATS_PATH - Snapshot file (default: data/stats.json)
//!   PROCESSING_INTERVAL_SECS - Tick interval (default: 5)
//!   PROCESSING_SETTLE_MS - How far the watermark trails the clock (default: 2000)

use dotenv::dotenv;
use dronetrack::processing::{spawn_scheduler, StatsAggregator};
use dronetrack::storage_core::{EventStore, SqliteEventStore};
use dronetrack::AppConfig;
use log::{error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Processing Runtime");

    let config = AppConfig::from_env()?;
    info!("   ├─ Database: {}", config.storage.db_path.display());
    info!("   ├─ Stats: {}", config.processing.stats_path.display());
    info!("   ├─ Interval: {}s", config.processing.interval.as_secs());
    info!("   └─ Settle: {}ms", config.processing.settle.as_millis());

    let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::open(&config.storage.db_path)?);
    let aggregator = Arc::new(
        StatsAggregator::bootstrap(store, &config.processing.stats_path)
            .await?
            .with_settle(config.processing.settle),
    );

    let shutdown = CancellationToken::new();
    let scheduler = spawn_scheduler(aggregator.clone(), config.processing.interval, shutdown.clone());

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
    }

    shutdown.cancel();
    if let Err(e) = scheduler.await {
        error!("❌ Scheduler task failed: {}", e);
    }

    let stats = aggregator.current().await;
    info!(
        "✅ Processing runtime stopped ({} drone_position, {} target_acquisition)",
        stats.num_drone_positions, stats.num_target_acquisitions
    );
    Ok(())
}
