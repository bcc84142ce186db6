use crate::events::{DronePositionPayload, EventKind, EventPayload, TargetAcquisitionPayload};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Database(String),
    /// A row that cannot be mapped back to a payload
    InvalidRow(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::InvalidRow(e) => write!(f, "Invalid row: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// A stored event: the payload plus store-assigned id and creation time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedEvent {
    pub id: i64,
    pub date_created: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Append-only event tables, one per kind
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert one drone position row, returning its id
    async fn insert_drone_position(&self, payload: &DronePositionPayload) -> Result<i64, StoreError>;

    /// Insert one target acquisition row, returning its id
    async fn insert_target_acquisition(&self, payload: &TargetAcquisitionPayload) -> Result<i64, StoreError>;

    /// All events of `kind` with `start <= timestamp < end`
    ///
    /// Ordered by timestamp ascending, ties broken by id. An empty or
    /// inverted range yields no rows.
    async fn range_query(
        &self,
        kind: EventKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PersistedEvent>, StoreError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;

    /// Dispatch to the writer for the payload's kind
    async fn insert(&self, payload: &EventPayload) -> Result<i64, StoreError> {
        match payload {
            EventPayload::DronePosition(p) => self.insert_drone_position(p).await,
            EventPayload::TargetAcquisition(p) => self.insert_target_acquisition(p).await,
        }
    }
}
