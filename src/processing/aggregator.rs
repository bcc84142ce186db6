use super::stats::StatsSnapshot;
use crate::error::PipelineError;
use crate::events::{now_micros, EventKind};
use crate::snapshot::{read_json, JsonSnapshot, SnapshotError};
use crate::storage_core::EventStore;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Totals and watermark advanced
    Updated {
        drone_positions: usize,
        target_acquisitions: usize,
        watermark: DateTime<Utc>,
    },
    /// A range query failed; nothing changed
    StoreUnavailable,
    /// Queries succeeded but the snapshot could not be written; nothing changed
    SnapshotWriteFailed,
    /// Another tick was still running
    Skipped,
}

/// Owner of the stats snapshot
///
/// Only one tick runs at a time; a tick that finds another in progress
/// returns `Skipped` instead of waiting.
pub struct StatsAggregator {
    store: Arc<dyn EventStore>,
    file: JsonSnapshot<StatsSnapshot>,
    state: Mutex<StatsSnapshot>,
    settle: chrono::Duration,
}

impl StatsAggregator {
    /// Load the snapshot at `path`, creating the origin snapshot if absent
    ///
    /// An unreadable snapshot is replaced by the origin snapshot so the next
    /// tick recounts the full history.
    pub async fn bootstrap(store: Arc<dyn EventStore>, path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let file: JsonSnapshot<StatsSnapshot> = JsonSnapshot::new(path);

        let initial = match file.load().await {
            Ok(stats) => {
                log::info!(
                    "📊 Loaded stats snapshot (watermark {})",
                    crate::events::format_event_time(&stats.last_updated)
                );
                stats
            }
            Err(SnapshotError::Missing(_)) => {
                log::info!("📊 No stats snapshot at {}, starting from origin", file.path().display());
                let origin = StatsSnapshot::origin();
                file.replace(&origin).await?;
                origin
            }
            Err(SnapshotError::Corrupt { reason, .. }) => {
                log::warn!(
                    "⚠️  Stats snapshot {} unreadable ({}), resetting to origin",
                    file.path().display(),
                    reason
                );
                let origin = StatsSnapshot::origin();
                file.replace(&origin).await?;
                origin
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            store,
            file,
            state: Mutex::new(initial),
            settle: chrono::Duration::zero(),
        })
    }

    /// Hold the watermark `settle` behind the tick time
    ///
    /// Range reads key on the event's own timestamp, which is stamped before
    /// the row reaches the store. A row is only counted if it is persisted
    /// within `settle` of that timestamp; later rows fall below the watermark.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = chrono::Duration::from_std(settle).unwrap_or_else(|_| chrono::Duration::zero());
        self
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// In-memory copy of the last successfully written snapshot
    pub async fn current(&self) -> StatsSnapshot {
        self.state.lock().await.clone()
    }

    pub async fn tick(&self) -> TickOutcome {
        self.tick_at(now_micros()).await
    }

    /// Fold `[watermark, now - settle)` into the totals and move the watermark
    /// to `now - settle`
    ///
    /// A cutoff earlier than the watermark is clamped so the watermark never
    /// moves backwards.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickOutcome {
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(_) => {
                log::warn!("⏭️  Stats tick skipped: previous tick still running");
                return TickOutcome::Skipped;
            }
        };

        let watermark = state.last_updated;
        let now = (now - self.settle).max(watermark);
        let mut next = state.clone();
        let mut fetched = [0usize; 2];

        for (slot, kind) in EventKind::ALL.into_iter().enumerate() {
            match self.store.range_query(kind, watermark, now).await {
                Ok(events) => {
                    fetched[slot] = events.len();
                    next.absorb(kind, &events);
                }
                Err(e) => {
                    log::warn!("⚠️  Stats tick deferred, {} query failed: {}", kind, e);
                    return TickOutcome::StoreUnavailable;
                }
            }
        }

        next.last_updated = now;
        if let Err(e) = self.file.replace(&next).await {
            log::error!("❌ Failed to write stats snapshot: {}", e);
            return TickOutcome::SnapshotWriteFailed;
        }
        *state = next;

        log::info!(
            "📈 Stats updated: +{} drone_position, +{} target_acquisition (totals {}/{})",
            fetched[0],
            fetched[1],
            state.num_drone_positions,
            state.num_target_acquisitions
        );

        TickOutcome::Updated {
            drone_positions: fetched[0],
            target_acquisitions: fetched[1],
            watermark: now,
        }
    }

    /// Read the persisted snapshot
    pub async fn get_stats(&self) -> Result<StatsSnapshot, PipelineError> {
        read_stats(self.file.path())
    }
}

/// Read a stats snapshot without owning the aggregator
pub fn read_stats(path: &Path) -> Result<StatsSnapshot, PipelineError> {
    match read_json::<StatsSnapshot>(path) {
        Ok(stats) => Ok(stats),
        Err(SnapshotError::Missing(_)) => {
            log::error!("❌ Statistics file does not exist: {}", path.display());
            Err(PipelineError::NotFound("Statistics do not exist".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
