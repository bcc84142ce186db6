//! Configuration from environment variables
//!
//! Every component gets its own section. The whole value is built once at
//! startup and handed to components by reference.

use crate::anomaly::AnomalyThresholds;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerBackend {
    /// Local append-only JSONL log, for development and tests
    File,
    /// NATS JetStream server at host:port
    JetStream,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub backend: BrokerBackend,
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub log_dir: PathBuf,
    pub connect_timeout: Duration,
}

impl BrokerConfig {
    pub fn url(&self) -> String {
        format!("nats://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub consumer_group: String,
    /// How long a single poll waits for the next message
    pub poll_wait: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub stats_path: PathBuf,
    pub interval: Duration,
    /// Rows younger than this are left for a later tick
    pub settle: Duration,
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// A scan ends once no message has arrived for this long
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    pub datastore_path: PathBuf,
    pub thresholds: AnomalyThresholds,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub storage: StorageConfig,
    pub processing: ProcessingConfig,
    pub analyzer: AnalyzerConfig,
    pub anomaly: AnomalyConfig,
}

impl AppConfig {
    /// Load configuration from the process environment (and `.env`, if the caller loaded it)
    ///
    /// Environment variables:
    /// - `BROKER_BACKEND` (default: file; `file` or `jetstream`)
    /// - `BROKER_HOST` (default: localhost)
    /// - `BROKER_PORT` (default: 4222)
    /// - `BROKER_TOPIC` (default: events)
    /// - `BROKER_LOG_DIR` (default: data/log)
    /// - `BROKER_CONNECT_TIMEOUT_MS` (default: 5000)
    /// - `STORAGE_DB_PATH` (default: data/events.db)
    /// - `STORAGE_CONSUMER_GROUP` (default: event_group)
    /// - `STORAGE_POLL_WAIT_MS` (default: 1000)
    /// - `PROCESSING_STATS_PATH` (default: data/stats.json)
    /// - `PROCESSING_INTERVAL_SECS` (default: 5)
    /// - `PROCESSING_SETTLE_MS` (default: 2000)
    /// - `ANALYZER_IDLE_TIMEOUT_MS` (default: 1000)
    /// - `ANOMALY_DATASTORE_PATH` (default: data/anomalies.json)
    /// - `ANOMALY_SIGNAL_THRESHOLD` (default: 60)
    /// - `ANOMALY_CERTAINTY_THRESHOLD` (default: 70)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let backend = match text("BROKER_BACKEND", "file").to_lowercase().as_str() {
            "file" => BrokerBackend::File,
            "jetstream" | "nats" => BrokerBackend::JetStream,
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "BROKER_BACKEND must be 'file' or 'jetstream', got '{}'",
                    other
                )))
            }
        };

        let topic = text("BROKER_TOPIC", "events");
        if topic.trim().is_empty() {
            return Err(ConfigError::InvalidValue("BROKER_TOPIC cannot be empty".to_string()));
        }

        let broker = BrokerConfig {
            backend,
            host: text("BROKER_HOST", "localhost"),
            port: parse_or(&lookup, "BROKER_PORT", 4222)?,
            topic,
            log_dir: text("BROKER_LOG_DIR", "data/log").into(),
            connect_timeout: Duration::from_millis(parse_or(&lookup, "BROKER_CONNECT_TIMEOUT_MS", 5_000)?),
        };

        let storage = StorageConfig {
            db_path: text("STORAGE_DB_PATH", "data/events.db").into(),
            consumer_group: text("STORAGE_CONSUMER_GROUP", "event_group"),
            poll_wait: Duration::from_millis(parse_or(&lookup, "STORAGE_POLL_WAIT_MS", 1_000)?),
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
        };

        let interval_secs: u64 = parse_or(&lookup, "PROCESSING_INTERVAL_SECS", 5)?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PROCESSING_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        let processing = ProcessingConfig {
            stats_path: text("PROCESSING_STATS_PATH", "data/stats.json").into(),
            interval: Duration::from_secs(interval_secs),
            settle: Duration::from_millis(parse_or(&lookup, "PROCESSING_SETTLE_MS", 2_000)?),
        };

        let analyzer = AnalyzerConfig {
            idle_timeout: Duration::from_millis(parse_or(&lookup, "ANALYZER_IDLE_TIMEOUT_MS", 1_000)?),
        };

        let defaults = AnomalyThresholds::default();
        let anomaly = AnomalyConfig {
            datastore_path: text("ANOMALY_DATASTORE_PATH", "data/anomalies.json").into(),
            thresholds: AnomalyThresholds {
                signal_strength: parse_or(&lookup, "ANOMALY_SIGNAL_THRESHOLD", defaults.signal_strength)?,
                certainty: parse_or(&lookup, "ANOMALY_CERTAINTY_THRESHOLD", defaults.certainty)?,
            },
        };

        Ok(Self {
            broker,
            storage,
            processing,
            analyzer,
            anomaly,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(format!("{} has an invalid value: '{}'", key, raw))
        }),
    }
}
