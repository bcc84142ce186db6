//! Drone telemetry event pipeline
//!
//! Position reports and target acquisitions travel through an append-only
//! message log. From there:
//!
//! ```text
//! EventProducer ──append──▶ EventLog ──durable consumer──▶ DurablePersister ──▶ SQLite
//!                              │                                                 │
//!                              ├── ephemeral scan ──▶ ReplayReader               │ range query
//!                              └── ephemeral scan ──▶ AnomalyScanner ──▶ anomalies.json
//!                                                                                ▼
//!                                                     StatsAggregator ──▶ stats.json
//! ```
//!
//! ## Module Organization
//!
//! - `events` - Envelope and payload contracts, wire codec, event-time format
//! - `broker` - Message log abstraction (NATS JetStream and local file backends)
//! - `producer` - Wraps reports into envelopes and publishes them
//! - `storage_core` - Durable persister and the SQLite range-query contract
//! - `analyzer` - Index/count lookups by replaying the log
//! - `anomaly` - Threshold scanner and the flagged-event datastore
//! - `processing` - Watermark-driven incremental statistics
//! - `snapshot` - Single-writer JSON documents with atomic replacement
//! - `config` - Environment-driven configuration
//! - `error` - Caller-facing error taxonomy

pub mod analyzer;
pub mod anomaly;
pub mod broker;
pub mod config;
pub mod error;
pub mod error_handler;
pub mod events;
pub mod processing;
pub mod producer;
pub mod snapshot;
pub mod storage_core;

pub use config::AppConfig;
pub use error::PipelineError;
pub use events::{EventEnvelope, EventKind, EventPayload};
