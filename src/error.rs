//! Caller-facing error taxonomy
//!
//! Component errors (`BrokerError`, `StoreError`, `SnapshotError`) convert
//! into one of these five classes. Persistence paths recover from
//! `TransientIo` on their own; request paths hand the error back to the
//! caller for that call only.

use crate::broker::BrokerError;
use crate::events::{EnvelopeError, UnknownEventKind};
use crate::snapshot::SnapshotError;
use crate::storage_core::StoreError;

#[derive(Debug)]
pub enum PipelineError {
    /// Broker or store unreachable; retry later
    TransientIo(String),
    /// Log entry that is not a valid envelope
    MalformedMessage(String),
    /// Requested index or record does not exist
    NotFound(String),
    /// Caller supplied a value outside the accepted set
    Validation(String),
    /// A snapshot file exists but cannot be read back
    DataCorruption(String),
}

impl PipelineError {
    /// Status a gateway should render for this error
    pub fn http_status(&self) -> u16 {
        match self {
            PipelineError::TransientIo(_) => 503,
            PipelineError::MalformedMessage(_) => 500,
            PipelineError::NotFound(_) => 404,
            PipelineError::Validation(_) => 400,
            // Unreadable datastores surface as missing to callers
            PipelineError::DataCorruption(_) => 404,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            PipelineError::TransientIo(m)
            | PipelineError::MalformedMessage(m)
            | PipelineError::NotFound(m)
            | PipelineError::Validation(m)
            | PipelineError::DataCorruption(m) => m,
        }
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::TransientIo(m) => write!(f, "Service unavailable: {}", m),
            PipelineError::MalformedMessage(m) => write!(f, "Malformed message: {}", m),
            PipelineError::NotFound(m) => write!(f, "Not found: {}", m),
            PipelineError::Validation(m) => write!(f, "Invalid request: {}", m),
            PipelineError::DataCorruption(m) => write!(f, "Invalid datastore: {}", m),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<BrokerError> for PipelineError {
    fn from(err: BrokerError) -> Self {
        PipelineError::TransientIo(err.to_string())
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::TransientIo(err.to_string())
    }
}

impl From<EnvelopeError> for PipelineError {
    fn from(err: EnvelopeError) -> Self {
        PipelineError::MalformedMessage(err.to_string())
    }
}

impl From<UnknownEventKind> for PipelineError {
    fn from(err: UnknownEventKind) -> Self {
        PipelineError::Validation(err.to_string())
    }
}

impl From<SnapshotError> for PipelineError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Missing(_) => PipelineError::NotFound(err.to_string()),
            SnapshotError::Corrupt { .. } => PipelineError::DataCorruption(err.to_string()),
            SnapshotError::Io(_) | SnapshotError::Serialization(_) => {
                PipelineError::TransientIo(err.to_string())
            }
        }
    }
}
