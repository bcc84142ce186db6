//! End-to-end flow over a local file log:
//! producer → log → persister → SQLite → stats, plus replay and anomaly scans

use dronetrack::analyzer::ReplayReader;
use dronetrack::anomaly::{AnomalyQuery, AnomalyScanner, AnomalyThresholds};
use dronetrack::broker::{EventLog, FileLog};
use dronetrack::config::StorageConfig;
use dronetrack::events::now_micros;
use dronetrack::processing::{StatsAggregator, StatsSnapshot, TickOutcome};
use dronetrack::producer::{DronePositionReport, EventProducer, TargetAcquisitionReport};
use dronetrack::storage_core::{DurablePersister, EventStore, MessageOutcome, SqliteEventStore};
use dronetrack::{EventKind, PipelineError};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

struct Harness {
    dir: TempDir,
    log: Arc<dyn EventLog>,
    store: Arc<SqliteEventStore>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let log: Arc<dyn EventLog> = Arc::new(
            FileLog::open(dir.path().join("log"), "events")
                .unwrap()
                .with_poll_interval(Duration::from_millis(5)),
        );
        let store = Arc::new(SqliteEventStore::open(dir.path().join("events.db")).unwrap());
        Self { dir, log, store }
    }

    fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            db_path: self.dir.path().join("events.db"),
            consumer_group: "event_group".to_string(),
            poll_wait: Duration::from_millis(20),
            backoff_initial: Duration::from_millis(5),
            backoff_max: Duration::from_millis(50),
        }
    }

    fn persister(&self) -> DurablePersister {
        DurablePersister::new(self.log.clone(), self.store.clone(), &self.storage_config())
    }

    fn producer(&self) -> EventProducer {
        EventProducer::new(self.log.clone())
    }

    fn scanner(&self) -> AnomalyScanner {
        AnomalyScanner::new(
            self.log.clone(),
            Duration::from_millis(50),
            AnomalyThresholds::default(),
            self.dir.path().join("anomalies.json"),
        )
    }

    async fn persisted(&self, kind: EventKind) -> usize {
        self.store
            .range_query(
                kind,
                StatsSnapshot::origin_watermark(),
                now_micros() + chrono::Duration::seconds(1),
            )
            .await
            .unwrap()
            .len()
    }
}

fn position(signal_strength: i32) -> DronePositionReport {
    DronePositionReport {
        drone_id: "drone-1".to_string(),
        latitude: 49.2,
        longitude: -123.1,
        altitude: 150.0,
        signal_strength,
        trace_id: None,
    }
}

fn acquisition(certainty: i32) -> TargetAcquisitionReport {
    TargetAcquisitionReport {
        drone_id: "drone-1".to_string(),
        target_id: "target-1".to_string(),
        acquisition_type: "visual".to_string(),
        target_type: "vehicle".to_string(),
        latitude: 49.2,
        longitude: -123.1,
        altitude: 0.0,
        certainty,
        trace_id: None,
    }
}

async fn wait_for_persisted(persister: &DurablePersister, expected: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while persister.counters().persisted() < expected && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_malformed_entry_between_valid_entries() {
    let harness = Harness::new();
    let producer = harness.producer();

    producer.publish_drone_position(position(70)).await.unwrap();
    harness.log.append(br#"{"kind":"drone_position","emitted_at":"2024-01-01T00:00:00Z","payload":{"drone_id":"x"}}"#).await.unwrap();
    producer.publish_drone_position(position(80)).await.unwrap();

    let persister = Arc::new(harness.persister());
    let shutdown = CancellationToken::new();
    let worker = persister.clone().spawn(shutdown.clone());

    wait_for_persisted(&persister, 2).await;
    shutdown.cancel();
    worker.await.unwrap();

    assert_eq!(harness.persisted(EventKind::DronePosition).await, 2);
    assert_eq!(persister.counters().skipped_malformed(), 1);
}

#[tokio::test]
async fn test_crash_before_commit_redelivers() {
    let harness = Harness::new();
    harness.producer().publish_drone_position(position(65)).await.unwrap();

    // Written, then the process dies before committing
    let mut consumer = harness.log.durable_consumer("event_group").await.unwrap();
    let record = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
    let envelope = dronetrack::EventEnvelope::decode(&record.data).unwrap();
    harness.store.insert(&envelope.payload).await.unwrap();
    drop(consumer);

    // Restarted persister sees the same record again
    let persister = harness.persister();
    let mut consumer = harness.log.durable_consumer("event_group").await.unwrap();
    let again = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
    assert_eq!(again.offset, record.offset);
    assert!(matches!(
        persister.process_record(consumer.as_mut(), again).await,
        MessageOutcome::Persisted { .. }
    ));

    // At least once, never zero
    assert_eq!(harness.persisted(EventKind::DronePosition).await, 2);

    // Committed now: a fresh consumer has nothing left
    let mut consumer = harness.log.durable_consumer("event_group").await.unwrap();
    assert!(consumer.poll(Duration::from_millis(30)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_persisted_events_feed_stats() {
    let harness = Harness::new();
    let producer = harness.producer();

    for value in [40, 95, 70] {
        producer.publish_drone_position(position(value)).await.unwrap();
    }
    producer.publish_target_acquisition(acquisition(88)).await.unwrap();

    let persister = Arc::new(harness.persister());
    let shutdown = CancellationToken::new();
    let worker = persister.clone().spawn(shutdown.clone());
    wait_for_persisted(&persister, 4).await;

    let aggregator = StatsAggregator::bootstrap(harness.store.clone(), harness.dir.path().join("stats.json"))
        .await
        .unwrap();

    let first = aggregator.tick().await;
    assert!(matches!(
        first,
        TickOutcome::Updated {
            drone_positions: 3,
            target_acquisitions: 1,
            ..
        }
    ));
    let after_first = aggregator.current().await.last_updated;

    producer.publish_target_acquisition(acquisition(60)).await.unwrap();
    wait_for_persisted(&persister, 5).await;
    shutdown.cancel();
    worker.await.unwrap();

    aggregator.tick().await;
    let stats = aggregator.get_stats().await.unwrap();

    assert_eq!(stats.num_drone_positions, 3);
    assert_eq!(stats.num_target_acquisitions, 2);
    assert_eq!(stats.max_signal_strength, 95);
    assert_eq!(stats.max_certainty, 88);
    assert!(stats.last_updated >= after_first);
}

#[tokio::test]
async fn test_anomaly_scenario() {
    let harness = Harness::new();
    let producer = harness.producer();

    producer.publish_drone_position(position(50)).await.unwrap();
    producer.publish_target_acquisition(acquisition(80)).await.unwrap();
    producer.publish_drone_position(position(90)).await.unwrap();

    let scanner = harness.scanner();
    assert_eq!(scanner.rescan().await.unwrap(), 1);

    match scanner.query(Some("drone_position")).await.unwrap() {
        AnomalyQuery::Records(records) => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].detected_value, 50);
            assert_eq!(records[0].anomaly_type, "Low Signal Strength");
        }
        AnomalyQuery::NoContent => panic!("expected the signal_strength=50 record"),
    }
    assert_eq!(
        scanner.query(Some("target_acquisition")).await.unwrap(),
        AnomalyQuery::NoContent
    );
}

#[tokio::test]
async fn test_anomaly_thresholds_are_strict() {
    let harness = Harness::new();
    let producer = harness.producer();

    producer.publish_drone_position(position(59)).await.unwrap();
    producer.publish_drone_position(position(60)).await.unwrap();
    producer.publish_target_acquisition(acquisition(69)).await.unwrap();
    producer.publish_target_acquisition(acquisition(70)).await.unwrap();

    let scanner = harness.scanner();
    assert_eq!(scanner.rescan().await.unwrap(), 2);

    match scanner.query(None).await.unwrap() {
        AnomalyQuery::Records(records) => {
            let values: Vec<i32> = records.iter().map(|r| r.detected_value).collect();
            assert_eq!(values, vec![59, 69]);
        }
        AnomalyQuery::NoContent => panic!("expected two records"),
    }
}

#[tokio::test]
async fn test_get_by_index_scenario() {
    let harness = Harness::new();
    let reader = ReplayReader::new(harness.log.clone(), Duration::from_millis(50));

    harness.producer().publish_drone_position(position(75)).await.unwrap();
    assert!(matches!(
        reader.get_by_index(EventKind::TargetAcquisition, 0).await,
        Err(PipelineError::NotFound(_))
    ));

    let receipt = harness
        .producer()
        .publish_target_acquisition(acquisition(91))
        .await
        .unwrap();
    let found = reader.get_by_index(EventKind::TargetAcquisition, 0).await.unwrap();
    assert_eq!(found.trace_id(), receipt.trace_id);
    assert_eq!(found.metric_value(), 91);

    assert!(matches!(
        reader.get_by_index(EventKind::TargetAcquisition, 1).await,
        Err(PipelineError::NotFound(_))
    ));

    let counts = reader.get_counts().await.unwrap();
    assert_eq!(counts.num_drone_position, 1);
    assert_eq!(counts.num_target_acquisition, 1);
}
