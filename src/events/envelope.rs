use super::payloads::EventPayload;
use super::time::{format_event_time, now_micros, parse_event_time};
use super::EventKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a log entry could not be turned into an envelope
#[derive(Debug)]
pub enum EnvelopeError {
    InvalidJson(String),
    UnknownKind(String),
    InvalidTimestamp(String),
    InvalidPayload { kind: EventKind, reason: String },
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeError::InvalidJson(e) => write!(f, "Invalid envelope JSON: {}", e),
            EnvelopeError::UnknownKind(k) => write!(f, "Unknown event kind: {}", k),
            EnvelopeError::InvalidTimestamp(t) => write!(f, "Invalid emitted_at: {}", t),
            EnvelopeError::InvalidPayload { kind, reason } => {
                write!(f, "Invalid {} payload: {}", kind, reason)
            }
        }
    }
}

impl std::error::Error for EnvelopeError {}

/// Wire shape of an envelope; `type`/`datetime` are accepted from older producers
#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(alias = "type")]
    kind: String,
    #[serde(alias = "datetime")]
    emitted_at: String,
    payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub emitted_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl EventEnvelope {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            emitted_at: now_micros(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let wire = WireEnvelope {
            kind: self.kind().as_str().to_string(),
            emitted_at: format_event_time(&self.emitted_at),
            payload: self.payload.to_json()?,
        };
        serde_json::to_vec(&wire)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;

        let kind: EventKind = wire
            .kind
            .parse()
            .map_err(|_| EnvelopeError::UnknownKind(wire.kind.clone()))?;

        let emitted_at = parse_event_time(&wire.emitted_at)
            .ok_or_else(|| EnvelopeError::InvalidTimestamp(wire.emitted_at.clone()))?;

        let payload = EventPayload::from_json(kind, wire.payload).map_err(|e| {
            EnvelopeError::InvalidPayload {
                kind,
                reason: e.to_string(),
            }
        })?;

        Ok(Self { emitted_at, payload })
    }
}
