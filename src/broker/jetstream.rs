//! NATS JetStream backend
//!
//! The topic maps to a stream of the same name capturing the subject
//! `<topic>.events`. The stream sequence number serves as the record offset.

use super::{BrokerError, DurableConsumer, EphemeralReader, EventLog, LogRecord};
use async_nats::jetstream::{self, consumer, stream, AckKind, Message};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

fn unavailable(context: &str, err: impl std::fmt::Display) -> BrokerError {
    BrokerError::Unavailable(format!("{}: {}", context, err))
}

pub struct JetStreamLog {
    url: String,
    subject: String,
    context: jetstream::Context,
    stream: stream::Stream,
}

impl JetStreamLog {
    /// Connect to the server and make sure the stream for `topic` exists
    pub async fn connect(url: &str, topic: &str, timeout: Duration) -> Result<Self, BrokerError> {
        log::info!("🔌 Connecting to NATS at {} (timeout {}ms)", url, timeout.as_millis());

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .map_err(|e| unavailable("Failed to connect to NATS", e))?;

        let context = jetstream::new(client);
        let subject = format!("{}.events", topic);

        let stream = context
            .get_or_create_stream(stream::Config {
                name: topic.to_string(),
                subjects: vec![subject.clone()],
                description: Some("Drone telemetry events".to_string()),
                ..Default::default()
            })
            .await
            .map_err(|e| unavailable("Failed to ensure stream", e))?;

        log::info!("✅ Connected to NATS, stream '{}' ready", topic);

        Ok(Self {
            url: url.to_string(),
            subject,
            context,
            stream,
        })
    }
}

fn stream_sequence(msg: &Message) -> Result<u64, BrokerError> {
    msg.info()
        .map(|info| info.stream_sequence)
        .map_err(|e| unavailable("Message without JetStream metadata", e))
}

#[async_trait]
impl EventLog for JetStreamLog {
    async fn append(&self, data: &[u8]) -> Result<u64, BrokerError> {
        let ack = self
            .context
            .publish(self.subject.clone(), Bytes::copy_from_slice(data))
            .await
            .map_err(|e| unavailable("Failed to publish message to JetStream", e))?;

        let ack = ack
            .await
            .map_err(|e| unavailable("Failed to receive JetStream acknowledgment", e))?;

        Ok(ack.sequence)
    }

    async fn durable_consumer(&self, group: &str) -> Result<Box<dyn DurableConsumer>, BrokerError> {
        let consumer = self
            .stream
            .get_or_create_consumer(
                group,
                consumer::pull::Config {
                    durable_name: Some(group.to_string()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    deliver_policy: consumer::DeliverPolicy::All,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| unavailable("Failed to create consumer", e))?;

        log::info!("📥 Durable consumer '{}' attached", group);

        Ok(Box::new(JetStreamConsumer {
            consumer,
            pending: HashMap::new(),
        }))
    }

    async fn ephemeral_reader(&self, idle_timeout: Duration) -> Result<Box<dyn EphemeralReader>, BrokerError> {
        let consumer = self
            .stream
            .create_consumer(consumer::pull::Config {
                deliver_policy: consumer::DeliverPolicy::All,
                ack_policy: consumer::AckPolicy::None,
                ..Default::default()
            })
            .await
            .map_err(|e| unavailable("Failed to create ephemeral consumer", e))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| unavailable("Failed to open message stream", e))?
            .map(|msg| msg.map_err(|e| e.to_string()))
            .boxed();

        Ok(Box::new(JetStreamReader {
            messages,
            idle_timeout,
        }))
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.url, self.subject)
    }
}

struct JetStreamConsumer {
    consumer: consumer::Consumer<consumer::pull::Config>,
    /// Delivered but not yet acked or nacked, by stream sequence
    pending: HashMap<u64, Message>,
}

#[async_trait]
impl DurableConsumer for JetStreamConsumer {
    async fn poll(&mut self, max_wait: Duration) -> Result<Option<LogRecord>, BrokerError> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(1)
            .expires(max_wait)
            .messages()
            .await
            .map_err(|e| unavailable("Failed to fetch messages", e))?;

        while let Some(result) = batch.next().await {
            match result {
                Ok(msg) => {
                    let offset = stream_sequence(&msg)?;
                    let data = msg.payload.to_vec();
                    self.pending.insert(offset, msg);
                    return Ok(Some(LogRecord { offset, data }));
                }
                Err(e) => {
                    log::warn!("⚠️  Error receiving message from batch: {}", e);
                }
            }
        }

        Ok(None)
    }

    async fn commit(&mut self, offset: u64) -> Result<(), BrokerError> {
        if let Some(msg) = self.pending.remove(&offset) {
            msg.ack()
                .await
                .map_err(|e| unavailable("Failed to acknowledge message", e))?;
        }
        Ok(())
    }

    async fn reject(&mut self, offset: u64) -> Result<(), BrokerError> {
        if let Some(msg) = self.pending.remove(&offset) {
            msg.ack_with(AckKind::Nak(None))
                .await
                .map_err(|e| unavailable("Failed to reject message", e))?;
        }
        Ok(())
    }
}

struct JetStreamReader {
    messages: BoxStream<'static, Result<Message, String>>,
    idle_timeout: Duration,
}

#[async_trait]
impl EphemeralReader for JetStreamReader {
    async fn next_record(&mut self) -> Result<Option<LogRecord>, BrokerError> {
        loop {
            match tokio::time::timeout(self.idle_timeout, self.messages.next()).await {
                Err(_) | Ok(None) => return Ok(None),
                Ok(Some(Ok(msg))) => {
                    let offset = stream_sequence(&msg)?;
                    return Ok(Some(LogRecord {
                        offset,
                        data: msg.payload.to_vec(),
                    }));
                }
                Ok(Some(Err(e))) => {
                    log::warn!("⚠️  Error receiving message during replay: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let result = JetStreamLog::connect("nats://127.0.0.1:1", "events", Duration::from_millis(500)).await;
        assert!(matches!(result, Err(BrokerError::Unavailable(_))));
    }
}
