//! Consume-write-commit loop
//!
//! Each record is decoded, written to the store, and only then committed.
//! A crash between write and commit redelivers the record (duplicate row);
//! a crash before the write redelivers it too. A committed record is never
//! seen again by this group.
//!
//! ```text
//! STARTING ─▶ CONSUMING ─▶ PROCESSING_MESSAGE ─▶ CONSUMING ─▶ ... ─▶ STOPPED
//!                               │
//!                               ├─ malformed   → log, commit, skip
//!                               └─ store error → reject, back off, redeliver
//! ```

use super::store::EventStore;
use crate::broker::{DurableConsumer, EventLog, LogRecord};
use crate::config::StorageConfig;
use crate::error_handler::ExponentialBackoff;
use crate::events::{EventEnvelope, EventKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersisterState {
    Starting,
    Consuming,
    ProcessingMessage,
    Stopped,
}

/// What happened to one consumed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Written and committed
    Persisted {
        kind: EventKind,
        row_id: i64,
        trace_id: String,
    },
    /// Not a valid envelope; committed without writing
    SkippedMalformed,
    /// Store write failed; left uncommitted for redelivery
    Deferred,
}

#[derive(Debug, Default)]
pub struct PersisterCounters {
    persisted: AtomicU64,
    skipped_malformed: AtomicU64,
    deferred: AtomicU64,
}

impl PersisterCounters {
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    pub fn skipped_malformed(&self) -> u64 {
        self.skipped_malformed.load(Ordering::Relaxed)
    }

    pub fn deferred(&self) -> u64 {
        self.deferred.load(Ordering::Relaxed)
    }
}

pub struct DurablePersister {
    log: Arc<dyn EventLog>,
    store: Arc<dyn EventStore>,
    group: String,
    poll_wait: Duration,
    backoff_initial: Duration,
    backoff_max: Duration,
    state: watch::Sender<PersisterState>,
    counters: PersisterCounters,
}

impl DurablePersister {
    pub fn new(log: Arc<dyn EventLog>, store: Arc<dyn EventStore>, config: &StorageConfig) -> Self {
        let (state, _) = watch::channel(PersisterState::Starting);
        Self {
            log,
            store,
            group: config.consumer_group.clone(),
            poll_wait: config.poll_wait,
            backoff_initial: config.backoff_initial,
            backoff_max: config.backoff_max,
            state,
            counters: PersisterCounters::default(),
        }
    }

    pub fn state(&self) -> PersisterState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<PersisterState> {
        self.state.subscribe()
    }

    pub fn counters(&self) -> &PersisterCounters {
        &self.counters
    }

    fn set_state(&self, next: PersisterState) {
        self.state.send_replace(next);
    }

    /// Run the loop on its own task until `shutdown` is cancelled
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Consume until `shutdown` is cancelled
    ///
    /// Never returns early on broker or store errors; those are retried with
    /// backoff. A record already being processed is finished before the loop
    /// observes cancellation.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.set_state(PersisterState::Starting);
        log::info!(
            "🚀 Persister starting: group '{}' on {} → {}",
            self.group,
            self.log.describe(),
            self.store.backend_type()
        );

        let mut backoff = ExponentialBackoff::new(self.backoff_initial, self.backoff_max);

        let mut consumer = match self.open_consumer(&mut backoff, &shutdown).await {
            Some(consumer) => consumer,
            None => {
                self.set_state(PersisterState::Stopped);
                log::info!("🛑 Persister stopped before consuming");
                return;
            }
        };

        self.set_state(PersisterState::Consuming);
        log::info!("📥 Consuming from group '{}'", self.group);

        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = consumer.poll(self.poll_wait) => polled,
            };

            match polled {
                Ok(Some(record)) => match self.process_record(consumer.as_mut(), record).await {
                    MessageOutcome::Deferred => {
                        if pause(&mut backoff, &shutdown).await {
                            break;
                        }
                    }
                    _ => backoff.reset(),
                },
                Ok(None) => {}
                Err(e) => {
                    log::error!("❌ Poll failed for group '{}': {}", self.group, e);
                    if pause(&mut backoff, &shutdown).await {
                        break;
                    }
                    match self.log.durable_consumer(&self.group).await {
                        Ok(reopened) => {
                            log::info!("🔄 Reattached consumer group '{}'", self.group);
                            consumer = reopened;
                        }
                        Err(e) => log::warn!("⚠️  Reattach failed, keeping current consumer: {}", e),
                    }
                }
            }
        }

        self.set_state(PersisterState::Stopped);
        log::info!(
            "🛑 Persister stopped: {} persisted, {} malformed skipped, {} deferred",
            self.counters.persisted(),
            self.counters.skipped_malformed(),
            self.counters.deferred()
        );
    }

    async fn open_consumer(
        &self,
        backoff: &mut ExponentialBackoff,
        shutdown: &CancellationToken,
    ) -> Option<Box<dyn DurableConsumer>> {
        loop {
            let opened = tokio::select! {
                _ = shutdown.cancelled() => return None,
                opened = self.log.durable_consumer(&self.group) => opened,
            };

            match opened {
                Ok(consumer) => {
                    backoff.reset();
                    return Some(consumer);
                }
                Err(e) => {
                    log::error!("❌ Cannot open consumer group '{}': {}", self.group, e);
                    if pause(backoff, shutdown).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Decode, write and commit one record
    pub async fn process_record(
        &self,
        consumer: &mut dyn DurableConsumer,
        record: LogRecord,
    ) -> MessageOutcome {
        self.set_state(PersisterState::ProcessingMessage);
        let outcome = self.handle(consumer, &record).await;
        self.set_state(PersisterState::Consuming);
        outcome
    }

    async fn handle(&self, consumer: &mut dyn DurableConsumer, record: &LogRecord) -> MessageOutcome {
        let envelope = match EventEnvelope::decode(&record.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("⚠️  Skipping malformed message at offset {}: {}", record.offset, e);
                if let Err(e) = consumer.commit(record.offset).await {
                    log::warn!("⚠️  Commit of skipped offset {} failed: {}", record.offset, e);
                }
                self.counters.skipped_malformed.fetch_add(1, Ordering::Relaxed);
                return MessageOutcome::SkippedMalformed;
            }
        };

        let kind = envelope.kind();
        let trace_id = envelope.payload.trace_id().to_string();

        match self.store.insert(&envelope.payload).await {
            Ok(row_id) => {
                // Write is durable; a failed commit only means a duplicate on redelivery
                if let Err(e) = consumer.commit(record.offset).await {
                    log::warn!("⚠️  Commit of offset {} failed after write: {}", record.offset, e);
                }
                self.counters.persisted.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "💾 Persisted {} row {} (offset {}, trace {})",
                    kind,
                    row_id,
                    record.offset,
                    trace_id
                );
                MessageOutcome::Persisted {
                    kind,
                    row_id,
                    trace_id,
                }
            }
            Err(e) => {
                log::error!(
                    "❌ Store write failed for {} at offset {} (trace {}): {}",
                    kind,
                    record.offset,
                    trace_id,
                    e
                );
                if let Err(e) = consumer.reject(record.offset).await {
                    log::warn!("⚠️  Reject of offset {} failed: {}", record.offset, e);
                }
                self.counters.deferred.fetch_add(1, Ordering::Relaxed);
                MessageOutcome::Deferred
            }
        }
    }
}

/// Back off unless shut down first; true means shutdown was requested
async fn pause(backoff: &mut ExponentialBackoff, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = backoff.wait() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::FileLog;
    use crate::events::{now_micros, DronePositionPayload, EventPayload, TargetAcquisitionPayload};
    use crate::storage_core::{PersistedEvent, SqliteEventStore, StoreError};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::AtomicBool;
    use tempfile::tempdir;

    fn storage_config() -> StorageConfig {
        StorageConfig {
            db_path: "unused.db".into(),
            consumer_group: "event_group".to_string(),
            poll_wait: Duration::from_millis(20),
            backoff_initial: Duration::from_millis(5),
            backoff_max: Duration::from_millis(20),
        }
    }

    fn position_envelope(signal_strength: i32) -> Vec<u8> {
        EventEnvelope::new(EventPayload::DronePosition(DronePositionPayload {
            drone_id: "drone-1".to_string(),
            latitude: 1.0,
            longitude: 2.0,
            altitude: 3.0,
            signal_strength,
            timestamp: now_micros(),
            trace_id: format!("trace-{}", signal_strength),
        }))
        .encode()
        .unwrap()
    }

    /// Store that fails while `down` is set
    struct FlakyStore {
        inner: SqliteEventStore,
        down: AtomicBool,
    }

    #[async_trait]
    impl EventStore for FlakyStore {
        async fn insert_drone_position(&self, payload: &DronePositionPayload) -> Result<i64, StoreError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Database("database is locked".to_string()));
            }
            self.inner.insert_drone_position(payload).await
        }

        async fn insert_target_acquisition(&self, payload: &TargetAcquisitionPayload) -> Result<i64, StoreError> {
            self.inner.insert_target_acquisition(payload).await
        }

        async fn range_query(
            &self,
            kind: EventKind,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<PersistedEvent>, StoreError> {
            self.inner.range_query(kind, start, end).await
        }

        fn backend_type(&self) -> &'static str {
            "Flaky"
        }
    }

    #[tokio::test]
    async fn test_malformed_record_is_committed_and_skipped() {
        let dir = tempdir().unwrap();
        let log: Arc<dyn EventLog> = Arc::new(FileLog::open(dir.path(), "events").unwrap());
        let store = Arc::new(SqliteEventStore::open(dir.path().join("events.db")).unwrap());
        let persister = DurablePersister::new(log.clone(), store, &storage_config());

        log.append(b"{not json").await.unwrap();
        log.append(&position_envelope(75)).await.unwrap();

        let mut consumer = log.durable_consumer("event_group").await.unwrap();
        let bad = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(
            persister.process_record(consumer.as_mut(), bad).await,
            MessageOutcome::SkippedMalformed
        );

        let good = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        match persister.process_record(consumer.as_mut(), good).await {
            MessageOutcome::Persisted { kind, trace_id, .. } => {
                assert_eq!(kind, EventKind::DronePosition);
                assert_eq!(trace_id, "trace-75");
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert_eq!(persister.counters().skipped_malformed(), 1);
        assert_eq!(persister.counters().persisted(), 1);
        assert_eq!(persister.state(), PersisterState::Consuming);
    }

    #[tokio::test]
    async fn test_failed_write_is_not_committed() {
        let dir = tempdir().unwrap();
        let log: Arc<dyn EventLog> = Arc::new(FileLog::open(dir.path(), "events").unwrap());
        let store = Arc::new(FlakyStore {
            inner: SqliteEventStore::open(dir.path().join("events.db")).unwrap(),
            down: AtomicBool::new(true),
        });
        let persister = DurablePersister::new(log.clone(), store.clone(), &storage_config());

        log.append(&position_envelope(40)).await.unwrap();

        let mut consumer = log.durable_consumer("event_group").await.unwrap();
        let record = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(
            persister.process_record(consumer.as_mut(), record).await,
            MessageOutcome::Deferred
        );

        store.down.store(false, Ordering::SeqCst);
        let again = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(again.offset, 0);
        assert!(matches!(
            persister.process_record(consumer.as_mut(), again).await,
            MessageOutcome::Persisted { .. }
        ));
        assert_eq!(persister.counters().deferred(), 1);
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let dir = tempdir().unwrap();
        let log: Arc<dyn EventLog> = Arc::new(
            FileLog::open(dir.path(), "events")
                .unwrap()
                .with_poll_interval(Duration::from_millis(5)),
        );
        let store = Arc::new(SqliteEventStore::open(dir.path().join("events.db")).unwrap());
        let persister = Arc::new(DurablePersister::new(log.clone(), store.clone(), &storage_config()));

        let shutdown = CancellationToken::new();
        let handle = persister.clone().spawn(shutdown.clone());

        for strength in [10, 20, 30] {
            log.append(&position_envelope(strength)).await.unwrap();
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while persister.counters().persisted() < 3 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(persister.counters().persisted(), 3);
        assert_eq!(persister.state(), PersisterState::Stopped);
    }
}
