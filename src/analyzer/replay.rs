use crate::broker::EventLog;
use crate::error::PipelineError;
use crate::events::{EventEnvelope, EventKind, EventPayload};
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

/// Per-kind totals from one full pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventCounts {
    pub num_drone_position: u64,
    pub num_target_acquisition: u64,
}

impl EventCounts {
    pub fn get(&self, kind: EventKind) -> u64 {
        match kind {
            EventKind::DronePosition => self.num_drone_position,
            EventKind::TargetAcquisition => self.num_target_acquisition,
        }
    }
}

/// What a scan went through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub records: u64,
    pub malformed: u64,
}

pub struct ReplayReader {
    log: Arc<dyn EventLog>,
    idle_timeout: Duration,
}

impl ReplayReader {
    pub fn new(log: Arc<dyn EventLog>, idle_timeout: Duration) -> Self {
        Self { log, idle_timeout }
    }

    /// Visit every decodable envelope from the earliest retained record
    ///
    /// Stops when `visit` breaks or when no record arrives within the idle
    /// timeout. Malformed records are counted in the summary and skipped.
    pub async fn scan<F>(&self, mut visit: F) -> Result<ScanSummary, PipelineError>
    where
        F: FnMut(EventEnvelope) -> ControlFlow<()> + Send,
    {
        let mut reader = self.log.ephemeral_reader(self.idle_timeout).await?;
        let mut summary = ScanSummary::default();

        while let Some(record) = reader.next_record().await? {
            summary.records += 1;
            let envelope = match EventEnvelope::decode(&record.data) {
                Ok(envelope) => envelope,
                Err(e) => {
                    summary.malformed += 1;
                    log::debug!("⚠️  Replay skipping offset {}: {}", record.offset, e);
                    continue;
                }
            };

            if visit(envelope).is_break() {
                break;
            }
        }

        Ok(summary)
    }

    /// The zero-based `index`th event of `kind`, in log order
    pub async fn get_by_index(&self, kind: EventKind, index: usize) -> Result<EventPayload, PipelineError> {
        let mut seen = 0usize;
        let mut found = None;

        self.scan(|envelope| {
            if envelope.kind() != kind {
                return ControlFlow::Continue(());
            }
            if seen == index {
                found = Some(envelope.payload);
                return ControlFlow::Break(());
            }
            seen += 1;
            ControlFlow::Continue(())
        })
        .await?;

        found.ok_or_else(|| PipelineError::NotFound(format!("No {} message found at index {}", kind, index)))
    }

    /// Count events of each kind in one pass
    pub async fn get_counts(&self) -> Result<EventCounts, PipelineError> {
        let mut counts = EventCounts::default();

        let summary = self
            .scan(|envelope| {
                match envelope.kind() {
                    EventKind::DronePosition => counts.num_drone_position += 1,
                    EventKind::TargetAcquisition => counts.num_target_acquisition += 1,
                }
                ControlFlow::Continue(())
            })
            .await?;

        log::info!(
            "🔢 Counted {} drone_position, {} target_acquisition ({} malformed skipped)",
            counts.num_drone_position,
            counts.num_target_acquisition,
            summary.malformed
        );
        Ok(counts)
    }
}
