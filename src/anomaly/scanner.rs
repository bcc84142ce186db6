use super::detector::{AnomalyDetector, AnomalyRecord, AnomalyThresholds};
use crate::analyzer::ReplayReader;
use crate::broker::EventLog;
use crate::error::PipelineError;
use crate::events::EventKind;
use crate::snapshot::{read_json, JsonSnapshot, SnapshotError};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Result of reading the flagged set
#[derive(Debug, Clone, PartialEq)]
pub enum AnomalyQuery {
    Records(Vec<AnomalyRecord>),
    /// Nothing matched the filter
    NoContent,
}

/// Full-log scan that keeps the last flagged set on disk
pub struct AnomalyScanner {
    replay: ReplayReader,
    detector: AnomalyDetector,
    datastore: JsonSnapshot<Vec<AnomalyRecord>>,
}

impl AnomalyScanner {
    pub fn new(
        log: Arc<dyn EventLog>,
        idle_timeout: Duration,
        thresholds: AnomalyThresholds,
        datastore_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            replay: ReplayReader::new(log, idle_timeout),
            detector: AnomalyDetector::new(thresholds),
            datastore: JsonSnapshot::new(datastore_path),
        }
    }

    /// Scan the whole log and replace the stored set, returning how many were flagged
    pub async fn rescan(&self) -> Result<usize, PipelineError> {
        log::info!("🔍 Starting anomaly scan");

        let mut flagged = Vec::new();
        let summary = self
            .replay
            .scan(|envelope| {
                if let Some(record) = self.detector.classify(&envelope.payload) {
                    log::debug!("🚩 {} for trace {}", record.anomaly_type, record.trace_id);
                    flagged.push(record);
                }
                ControlFlow::Continue(())
            })
            .await?;

        self.datastore.replace(&flagged).await?;

        log::info!(
            "✅ Anomaly scan complete: {} flagged out of {} records",
            flagged.len(),
            summary.records
        );
        Ok(flagged.len())
    }

    /// Read the last stored set, optionally restricted to one kind
    ///
    /// `kind_filter` must be a known kind name.
    pub async fn query(&self, kind_filter: Option<&str>) -> Result<AnomalyQuery, PipelineError> {
        let records = checked_datastore(self.datastore.load().await, self.datastore.path())?;
        filter_records(records, kind_filter)
    }
}

/// Read a stored anomaly set without a log connection
pub fn read_anomalies(path: &Path, kind_filter: Option<&str>) -> Result<AnomalyQuery, PipelineError> {
    let records = checked_datastore(read_json::<Vec<AnomalyRecord>>(path), path)?;
    filter_records(records, kind_filter)
}

fn checked_datastore(
    loaded: Result<Vec<AnomalyRecord>, SnapshotError>,
    path: &Path,
) -> Result<Vec<AnomalyRecord>, PipelineError> {
    match loaded {
        Ok(records) => Ok(records),
        Err(SnapshotError::Missing(_)) => {
            log::error!("❌ Anomaly datastore not found: {}", path.display());
            Err(PipelineError::NotFound("Anomaly datastore not found".to_string()))
        }
        Err(SnapshotError::Corrupt { reason, .. }) => {
            log::error!("❌ Invalid data in anomaly datastore: {}", reason);
            Err(PipelineError::DataCorruption(
                "Invalid data in anomaly datastore".to_string(),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

fn filter_records(records: Vec<AnomalyRecord>, kind_filter: Option<&str>) -> Result<AnomalyQuery, PipelineError> {
    let filter = match kind_filter {
        Some(raw) => Some(raw.parse::<EventKind>().map_err(|e| {
            log::error!("❌ {}", e);
            PipelineError::from(e)
        })?),
        None => None,
    };

    let matching: Vec<AnomalyRecord> = records
        .into_iter()
        .filter(|record| filter.map_or(true, |kind| record.event_type == kind))
        .collect();

    if matching.is_empty() {
        log::info!("No anomalies found matching criteria");
        return Ok(AnomalyQuery::NoContent);
    }

    log::info!("Returning {} anomalies", matching.len());
    Ok(AnomalyQuery::Records(matching))
}
