//! Event contracts shared by every stage of the pipeline
//!
//! The wire envelope is `{"kind": ..., "emitted_at": ..., "payload": {...}}`.
//! Payload timestamps use microsecond precision in UTC so that a payload
//! survives the log and the store unchanged.

pub mod envelope;
pub mod payloads;
pub mod time;

pub use envelope::{EnvelopeError, EventEnvelope};
pub use payloads::{DronePositionPayload, EventPayload, TargetAcquisitionPayload};
pub use time::{format_event_time, now_micros, parse_event_time};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of event kinds carried by the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DronePosition,
    TargetAcquisition,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::DronePosition, EventKind::TargetAcquisition];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DronePosition => "drone_position",
            EventKind::TargetAcquisition => "target_acquisition",
        }
    }

    /// Table holding persisted events of this kind
    pub fn table_name(&self) -> &'static str {
        match self {
            EventKind::DronePosition => "drone_position_events",
            EventKind::TargetAcquisition => "target_acquisition_events",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventKind(pub String);

impl fmt::Display for UnknownEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let valid: Vec<&str> = EventKind::ALL.iter().map(|k| k.as_str()).collect();
        write!(
            f,
            "Invalid event type '{}'. Must be one of: {}",
            self.0,
            valid.join(", ")
        )
    }
}

impl std::error::Error for UnknownEventKind {}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drone_position" => Ok(EventKind::DronePosition),
            "target_acquisition" => Ok(EventKind::TargetAcquisition),
            other => Err(UnknownEventKind(other.to_string())),
        }
    }
}
