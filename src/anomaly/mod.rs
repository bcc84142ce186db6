//! Threshold anomaly detection over the full log
//!
//! - `detector`: static thresholds and per-event classification
//! - `scanner`: bounded full pass that replaces the flagged set on disk

pub mod detector;
pub mod scanner;

pub use detector::{AnomalyDetector, AnomalyRecord, AnomalyThresholds};
pub use scanner::{read_anomalies, AnomalyQuery, AnomalyScanner};
