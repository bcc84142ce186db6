//! Message log abstraction
//!
//! The pipeline only needs three things from a broker:
//! - `append` a record and wait for the acknowledgement
//! - a durable consumer that resumes from its group's committed offset
//! - an ephemeral reader that replays from the earliest retained record
//!   and stops once the log has been idle for a while
//!
//! Two backends implement it: `JetStreamLog` (NATS JetStream at host:port)
//! and `FileLog` (a local JSONL segment, used for development and tests).

pub mod file_log;
pub mod jetstream;

pub use file_log::FileLog;
pub use jetstream::JetStreamLog;

use crate::config::{BrokerBackend, BrokerConfig};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub enum BrokerError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    /// Broker unreachable or refused the operation
    Unavailable(String),
}

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        BrokerError::Io(err)
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err)
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::Io(e) => write!(f, "IO error: {}", e),
            BrokerError::Serialization(e) => write!(f, "Serialization error: {}", e),
            BrokerError::Unavailable(e) => write!(f, "Broker unavailable: {}", e),
        }
    }
}

impl std::error::Error for BrokerError {}

/// One entry read from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Position in the log; strictly increasing in append order
    pub offset: u64,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a record, returning its offset once the log has acknowledged it
    async fn append(&self, data: &[u8]) -> Result<u64, BrokerError>;

    /// Open (or resume) the durable consumer for `group`
    async fn durable_consumer(&self, group: &str) -> Result<Box<dyn DurableConsumer>, BrokerError>;

    /// Open a one-shot reader positioned at the earliest retained record
    async fn ephemeral_reader(&self, idle_timeout: Duration) -> Result<Box<dyn EphemeralReader>, BrokerError>;

    /// Human-readable location for logging
    fn describe(&self) -> String;
}

#[async_trait]
pub trait DurableConsumer: Send {
    /// Wait up to `max_wait` for the next uncommitted record
    async fn poll(&mut self, max_wait: Duration) -> Result<Option<LogRecord>, BrokerError>;

    /// Mark everything up to and including `offset` as processed
    async fn commit(&mut self, offset: u64) -> Result<(), BrokerError>;

    /// Leave `offset` uncommitted and make it eligible for redelivery
    async fn reject(&mut self, offset: u64) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait EphemeralReader: Send {
    /// Next record in log order, or `None` once the idle timeout elapses
    async fn next_record(&mut self) -> Result<Option<LogRecord>, BrokerError>;
}

/// Open the log described by `config`
pub async fn open_log(config: &BrokerConfig) -> Result<Arc<dyn EventLog>, BrokerError> {
    match config.backend {
        BrokerBackend::File => {
            let log = FileLog::open(&config.log_dir, &config.topic)?;
            log::info!("📜 Using file log at {}", log.describe());
            Ok(Arc::new(log))
        }
        BrokerBackend::JetStream => {
            let log = JetStreamLog::connect(&config.url(), &config.topic, config.connect_timeout).await?;
            log::info!("📜 Using JetStream log at {}", log.describe());
            Ok(Arc::new(log))
        }
    }
}
