use crate::events::time::serde_event_time;
use crate::events::EventKind;
use crate::storage_core::PersistedEvent;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Running totals plus the watermark they are valid up to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub num_drone_positions: u64,
    pub num_target_acquisitions: u64,
    pub max_signal_strength: i32,
    pub max_certainty: i32,
    #[serde(with = "serde_event_time")]
    pub last_updated: DateTime<Utc>,
}

impl StatsSnapshot {
    /// Sentinel watermark before any real event
    pub fn origin_watermark() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Zero counters at the origin watermark
    pub fn origin() -> Self {
        Self {
            num_drone_positions: 0,
            num_target_acquisitions: 0,
            max_signal_strength: 0,
            max_certainty: 0,
            last_updated: Self::origin_watermark(),
        }
    }

    /// Fold one range of events of `kind` into the totals
    pub fn absorb(&mut self, kind: EventKind, events: &[PersistedEvent]) {
        let (count, max) = match kind {
            EventKind::DronePosition => (&mut self.num_drone_positions, &mut self.max_signal_strength),
            EventKind::TargetAcquisition => (&mut self.num_target_acquisitions, &mut self.max_certainty),
        };

        *count += events.len() as u64;
        for event in events {
            *max = (*max).max(event.payload.metric_value());
        }
    }
}
