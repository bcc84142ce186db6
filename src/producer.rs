//! Producer adapter: validated report in, acknowledged envelope out

use crate::broker::EventLog;
use crate::error::PipelineError;
use crate::events::{
    now_micros, DronePositionPayload, EventEnvelope, EventKind, EventPayload, TargetAcquisitionPayload,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Incoming drone position, before the arrival time is stamped
#[derive(Debug, Clone, Deserialize)]
pub struct DronePositionReport {
    pub drone_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub signal_strength: i32,
    #[serde(default)]
    pub trace_id: Option<String>,
}

/// Incoming target acquisition, before the arrival time is stamped
#[derive(Debug, Clone, Deserialize)]
pub struct TargetAcquisitionReport {
    pub drone_id: String,
    pub target_id: String,
    pub acquisition_type: String,
    pub target_type: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub certainty: i32,
    #[serde(default)]
    pub trace_id: Option<String>,
}

/// Returned once the log has acknowledged the append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub kind: EventKind,
    pub trace_id: String,
    pub offset: u64,
}

fn resolve_trace_id(trace_id: Option<String>) -> String {
    match trace_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => Uuid::new_v4().to_string(),
    }
}

pub struct EventProducer {
    log: Arc<dyn EventLog>,
}

impl EventProducer {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    pub async fn publish_drone_position(
        &self,
        report: DronePositionReport,
    ) -> Result<PublishReceipt, PipelineError> {
        let payload = DronePositionPayload {
            drone_id: report.drone_id,
            latitude: report.latitude,
            longitude: report.longitude,
            altitude: report.altitude,
            signal_strength: report.signal_strength,
            timestamp: now_micros(),
            trace_id: resolve_trace_id(report.trace_id),
        };
        self.publish(EventPayload::DronePosition(payload)).await
    }

    pub async fn publish_target_acquisition(
        &self,
        report: TargetAcquisitionReport,
    ) -> Result<PublishReceipt, PipelineError> {
        let payload = TargetAcquisitionPayload {
            drone_id: report.drone_id,
            target_id: report.target_id,
            acquisition_type: report.acquisition_type,
            target_type: report.target_type,
            latitude: report.latitude,
            longitude: report.longitude,
            altitude: report.altitude,
            certainty: report.certainty,
            timestamp: now_micros(),
            trace_id: resolve_trace_id(report.trace_id),
        };
        self.publish(EventPayload::TargetAcquisition(payload)).await
    }

    /// Publish without retrying; failures are reported as `TransientIo`
    pub async fn publish(&self, payload: EventPayload) -> Result<PublishReceipt, PipelineError> {
        let envelope = EventEnvelope::new(payload);
        let kind = envelope.kind();
        let trace_id = envelope.payload.trace_id().to_string();

        let bytes = envelope
            .encode()
            .map_err(|e| PipelineError::TransientIo(format!("Failed to encode envelope: {}", e)))?;

        match self.log.append(&bytes).await {
            Ok(offset) => {
                log::info!("📤 Published {} (trace {}) at offset {}", kind, trace_id, offset);
                Ok(PublishReceipt {
                    kind,
                    trace_id,
                    offset,
                })
            }
            Err(e) => {
                log::error!("❌ Publish of {} (trace {}) failed: {}", kind, trace_id, e);
                Err(PipelineError::from(e))
            }
        }
    }
}
