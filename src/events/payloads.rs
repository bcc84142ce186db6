use super::time::serde_event_time;
use super::EventKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DronePositionPayload {
    pub drone_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub signal_strength: i32,
    #[serde(with = "serde_event_time")]
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetAcquisitionPayload {
    pub drone_id: String,
    pub target_id: String,
    pub acquisition_type: String,
    pub target_type: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub certainty: i32,
    #[serde(with = "serde_event_time")]
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
}

/// A decoded payload tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    DronePosition(DronePositionPayload),
    TargetAcquisition(TargetAcquisitionPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::DronePosition(_) => EventKind::DronePosition,
            EventPayload::TargetAcquisition(_) => EventKind::TargetAcquisition,
        }
    }

    pub fn trace_id(&self) -> &str {
        match self {
            EventPayload::DronePosition(p) => &p.trace_id,
            EventPayload::TargetAcquisition(p) => &p.trace_id,
        }
    }

    pub fn drone_id(&self) -> &str {
        match self {
            EventPayload::DronePosition(p) => &p.drone_id,
            EventPayload::TargetAcquisition(p) => &p.drone_id,
        }
    }

    /// The kind's tracked numeric field: signal strength or certainty
    pub fn metric_value(&self) -> i32 {
        match self {
            EventPayload::DronePosition(p) => p.signal_strength,
            EventPayload::TargetAcquisition(p) => p.certainty,
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Decode a raw JSON payload for a known kind
    pub fn from_json(kind: EventKind, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EventKind::DronePosition => EventPayload::DronePosition(serde_json::from_value(value)?),
            EventKind::TargetAcquisition => {
                EventPayload::TargetAcquisition(serde_json::from_value(value)?)
            }
        })
    }
}
