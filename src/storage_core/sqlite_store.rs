use super::schema::run_schema_migrations;
use super::store::{EventStore, PersistedEvent, StoreError};
use crate::events::{DronePositionPayload, EventKind, EventPayload, TargetAcquisitionPayload};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// SQLite-backed `EventStore`
///
/// Timestamps are stored as integer microseconds so range bounds compare
/// numerically. Duplicate deliveries produce duplicate rows.
#[derive(Clone)]
pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    /// Open (creating if needed) the database and apply the schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Io(std::io::Error::new(
                        e.kind(),
                        format!("Failed to create database directory {}: {}", parent.display(), e),
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        run_schema_migrations(&conn)?;

        log::info!("✅ Event store ready at {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }
}

fn timestamp_column(row: &Row<'_>) -> rusqlite::Result<DateTime<Utc>> {
    let idx = row.as_ref().column_index("timestamp")?;
    let micros: i64 = row.get(idx)?;
    Utc.timestamp_micros(micros)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

fn drone_position_from_row(row: &Row<'_>) -> rusqlite::Result<PersistedEvent> {
    Ok(PersistedEvent {
        id: row.get("id")?,
        date_created: row.get("date_created")?,
        payload: EventPayload::DronePosition(DronePositionPayload {
            drone_id: row.get("drone_id")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            altitude: row.get("altitude")?,
            signal_strength: row.get("signal_strength")?,
            timestamp: timestamp_column(row)?,
            trace_id: row.get("trace_id")?,
        }),
    })
}

fn target_acquisition_from_row(row: &Row<'_>) -> rusqlite::Result<PersistedEvent> {
    Ok(PersistedEvent {
        id: row.get("id")?,
        date_created: row.get("date_created")?,
        payload: EventPayload::TargetAcquisition(TargetAcquisitionPayload {
            drone_id: row.get("drone_id")?,
            target_id: row.get("target_id")?,
            acquisition_type: row.get("acquisition_type")?,
            target_type: row.get("target_type")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            altitude: row.get("altitude")?,
            certainty: row.get("certainty")?,
            timestamp: timestamp_column(row)?,
            trace_id: row.get("trace_id")?,
        }),
    })
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn insert_drone_position(&self, payload: &DronePositionPayload) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO drone_position_events
             (drone_id, latitude, longitude, altitude, signal_strength, timestamp, trace_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                payload.drone_id,
                payload.latitude,
                payload.longitude,
                payload.altitude,
                payload.signal_strength,
                payload.timestamp.timestamp_micros(),
                payload.trace_id,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn insert_target_acquisition(&self, payload: &TargetAcquisitionPayload) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO target_acquisition_events
             (drone_id, target_id, acquisition_type, target_type, latitude, longitude,
              altitude, certainty, timestamp, trace_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                payload.drone_id,
                payload.target_id,
                payload.acquisition_type,
                payload.target_type,
                payload.latitude,
                payload.longitude,
                payload.altitude,
                payload.certainty,
                payload.timestamp.timestamp_micros(),
                payload.trace_id,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn range_query(
        &self,
        kind: EventKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PersistedEvent>, StoreError> {
        if start >= end {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let sql = format!(
            "SELECT * FROM {} WHERE timestamp >= ?1 AND timestamp < ?2 ORDER BY timestamp ASC, id ASC",
            kind.table_name()
        );
        let mut stmt = conn.prepare(&sql)?;

        let from_row = match kind {
            EventKind::DronePosition => drone_position_from_row,
            EventKind::TargetAcquisition => target_acquisition_from_row,
        };
        let events = stmt
            .query_map(params![start.timestamp_micros(), end.timestamp_micros()], from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
