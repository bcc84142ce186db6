//! Storage Runtime - durable persister
//!
//! Consumes the event log with a durable consumer group and writes every
//! event into SQLite, committing each offset only after its row is written.
//!
//! Usage:
//!   cargo run --release --bin storage
//!
//! Environment variables:
//!   BROKER_BACKEND - `file` or `jetstream` (default: file)
//!   STORAGE_DB_PATH - SQLite database path (default: data/events.db)
//!   STORAGE_CONSUMER_GROUP - Consumer group name (default: event_group)

use dotenv::dotenv;
use dronetrack::broker::open_log;
use dronetrack::storage_core::{DurablePersister, EventStore, PersisterState, SqliteEventStore};
use dronetrack::AppConfig;
use log::{error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Storage Runtime");

    let config = AppConfig::from_env()?;
    info!("   ├─ Database: {}", config.storage.db_path.display());
    info!("   ├─ Consumer group: {}", config.storage.consumer_group);
    info!("   └─ Topic: {}", config.broker.topic);

    let log = open_log(&config.broker).await?;
    let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::open(&config.storage.db_path)?);

    let persister = Arc::new(DurablePersister::new(log, store, &config.storage));
    let mut state = persister.subscribe_state();

    let shutdown = CancellationToken::new();
    let worker = persister.clone().spawn(shutdown.clone());

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
    }

    shutdown.cancel();
    if let Err(e) = state.wait_for(|s| *s == PersisterState::Stopped).await {
        error!("❌ Persister state channel closed: {}", e);
    }
    if let Err(e) = worker.await {
        error!("❌ Persister task failed: {}", e);
    }

    let counters = persister.counters();
    info!(
        "✅ Storage runtime stopped ({} persisted, {} malformed skipped, {} deferred)",
        counters.persisted(),
        counters.skipped_malformed(),
        counters.deferred()
    );
    Ok(())
}
