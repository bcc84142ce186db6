//! Threshold classification of single events

use crate::events::{EventKind, EventPayload};
use serde::{Deserialize, Serialize};

/// Values strictly below a threshold are anomalous
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalyThresholds {
    pub signal_strength: i32,
    pub certainty: i32,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            signal_strength: 60,
            certainty: 70,
        }
    }
}

impl AnomalyThresholds {
    pub fn for_kind(&self, kind: EventKind) -> i32 {
        match kind {
            EventKind::DronePosition => self.signal_strength,
            EventKind::TargetAcquisition => self.certainty,
        }
    }
}

/// A flagged event as stored in the anomaly datastore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub drone_id: String,
    pub event_id: String,
    pub trace_id: String,
    pub event_type: EventKind,
    pub anomaly_type: String,
    pub description: String,
    pub detected_value: i32,
    pub threshold: i32,
}

pub struct AnomalyDetector {
    thresholds: AnomalyThresholds,
}

impl AnomalyDetector {
    pub fn new(thresholds: AnomalyThresholds) -> Self {
        Self { thresholds }
    }

    pub fn with_defaults() -> Self {
        Self::new(AnomalyThresholds::default())
    }

    /// Classify one event
    ///
    /// # Rules
    /// - **Low Signal Strength**: drone_position with `signal_strength < threshold`
    /// - **Low Certainty**: target_acquisition with `certainty < threshold`
    pub fn classify(&self, payload: &EventPayload) -> Option<AnomalyRecord> {
        let kind = payload.kind();
        let value = payload.metric_value();
        let threshold = self.thresholds.for_kind(kind);

        if value >= threshold {
            return None;
        }

        let anomaly_type = match kind {
            EventKind::DronePosition => "Low Signal Strength",
            EventKind::TargetAcquisition => "Low Certainty",
        };

        Some(AnomalyRecord {
            drone_id: payload.drone_id().to_string(),
            event_id: payload.trace_id().to_string(),
            trace_id: payload.trace_id().to_string(),
            event_type: kind,
            anomaly_type: anomaly_type.to_string(),
            description: format!("Detected: {}; too low (threshold {})", value, threshold),
            detected_value: value,
            threshold,
        })
    }
}
