//! Periodic stats ticks

use super::aggregator::{StatsAggregator, TickOutcome};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Tick the aggregator every `period` until `shutdown` is cancelled
///
/// Ticks that fall due while one is still running are dropped, not queued.
/// The first tick fires immediately.
pub async fn run_scheduler(aggregator: Arc<StatsAggregator>, period: Duration, shutdown: CancellationToken) {
    log::info!("⏰ Starting stats scheduler (interval: {}s)", period.as_secs_f64());

    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = timer.tick() => {}
        }

        match aggregator.tick().await {
            TickOutcome::Updated { .. } => {}
            TickOutcome::StoreUnavailable => log::debug!("🔁 Store unavailable, retrying next tick"),
            TickOutcome::SnapshotWriteFailed => log::debug!("🔁 Snapshot not written, retrying next tick"),
            TickOutcome::Skipped => {}
        }
    }

    log::info!("🛑 Stats scheduler stopped");
}

pub fn spawn_scheduler(
    aggregator: Arc<StatsAggregator>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_scheduler(aggregator, period, shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_core::SqliteEventStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_scheduler_ticks_until_cancelled() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteEventStore::open(dir.path().join("events.db")).unwrap());
        let aggregator = Arc::new(
            StatsAggregator::bootstrap(store, dir.path().join("stats.json"))
                .await
                .unwrap(),
        );
        let origin = aggregator.current().await.last_updated;

        let shutdown = CancellationToken::new();
        let handle = spawn_scheduler(aggregator.clone(), Duration::from_millis(10), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(aggregator.current().await.last_updated > origin);
    }
}
