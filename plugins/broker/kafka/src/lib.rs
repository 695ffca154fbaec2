//! Kafka producers on top of librdkafka (`rdkafka::FutureProducer`).
//!
//! Every producer is idempotent with `acks=all`; a batch is sent message
//! by message so broker order matches slice order.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rdkafka::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::util::Timeout;
use serde::Deserialize;

use reelz_api::{BackendError, OutboxMessage, Producer, ProducerFactory};

/// `[broker]` section when `kind = "kafka"`.
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    /// Extra librdkafka properties, applied last.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

fn default_flush_timeout_ms() -> u64 {
    10_000
}

impl KafkaConfig {
    fn client_config(&self, client_id: &str) -> ClientConfig {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", &self.bootstrap_servers)
            .set("client.id", client_id)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", self.message_timeout_ms.to_string());
        for (k, v) in &self.properties {
            cfg.set(k, v);
        }
        cfg
    }
}

/// Сообщение, которое никогда не пройдёт, не ретраится.
fn classify(err: KafkaError) -> BackendError {
    let msg = err.to_string();
    match err.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::InvalidMessage
            | RDKafkaErrorCode::InvalidRecord
            | RDKafkaErrorCode::InvalidMessageSize,
        ) => BackendError::format_err(msg),
        Some(
            RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed
            | RDKafkaErrorCode::SaslAuthenticationFailed,
        ) => BackendError::config(msg),
        _ => BackendError::io(msg),
    }
}

fn headers_of(message: &OutboxMessage) -> OwnedHeaders {
    message.headers.iter().fold(OwnedHeaders::new(), |acc, (key, value)| {
        acc.insert(Header { key: key.as_str(), value: Some(value.as_str()) })
    })
}

// ════════════════════════════════════════════════════════════════
//  KafkaProducer
// ════════════════════════════════════════════════════════════════

pub struct KafkaProducer {
    name: String,
    inner: FutureProducer,
    message_timeout: Duration,
    flush_timeout: Duration,
}

impl Producer for KafkaProducer {
    fn send<'a>(&'a self, topic: &'a str, messages: &'a [OutboxMessage])
        -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + 'a>>
    {
        Box::pin(async move {
            for message in messages {
                let mut record = FutureRecord::<str, [u8]>::to(topic)
                    .payload(message.value.as_slice())
                    .headers(headers_of(message));
                if let Some(key) = &message.key {
                    record = record.key(key.as_str());
                }
                if let Some(partition) = message.partition {
                    record = record.partition(partition);
                }
                self.inner
                    .send(record, Timeout::After(self.message_timeout))
                    .await
                    .map_err(|(e, _)| classify(e).with_context(topic))?;
            }
            Ok(())
        })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.clone();
            let timeout = self.flush_timeout;
            tokio::task::spawn_blocking(move || inner.flush(Timeout::After(timeout)))
                .await
                .map_err(|e| BackendError::new(format!("flush task: {e}")))?
                .map_err(classify)?;
            tracing::info!(producer = %self.name, "kafka producer flushed");
            Ok(())
        })
    }
}

// ════════════════════════════════════════════════════════════════
//  KafkaProducerFactory
// ════════════════════════════════════════════════════════════════

pub struct KafkaProducerFactory {
    config: KafkaConfig,
}

impl KafkaProducerFactory {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }
}

impl ProducerFactory for KafkaProducerFactory {
    fn connect<'a>(&'a self, name: &'a str)
        -> Pin<Box<dyn Future<Output = Result<Arc<dyn Producer>, BackendError>> + Send + 'a>>
    {
        Box::pin(async move {
            let inner: FutureProducer = self
                .config
                .client_config(name)
                .create()
                .map_err(|e| BackendError::config(format!("kafka producer '{name}': {e}")))?;
            tracing::info!(producer = %name, servers = %self.config.bootstrap_servers, "kafka producer created");
            Ok(Arc::new(KafkaProducer {
                name: name.to_string(),
                inner,
                message_timeout: Duration::from_millis(self.config.message_timeout_ms),
                flush_timeout: Duration::from_millis(self.config.flush_timeout_ms),
            }) as Arc<dyn Producer>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelz_api::ErrorKind;
    use rdkafka::message::Headers;

    #[test]
    fn producer_settings() {
        let cfg: KafkaConfig = serde_json::from_value(serde_json::json!({
            "bootstrap_servers": "localhost:9092",
            "properties": { "compression.type": "lz4" }
        }))
        .unwrap();
        let client = cfg.client_config("outboxRelay");
        assert_eq!(client.get("acks"), Some("all"));
        assert_eq!(client.get("enable.idempotence"), Some("true"));
        assert_eq!(client.get("client.id"), Some("outboxRelay"));
        assert_eq!(client.get("message.timeout.ms"), Some("30000"));
        assert_eq!(client.get("compression.type"), Some("lz4"));
    }

    #[test]
    fn delivery_errors() {
        let too_large = KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge);
        assert_eq!(classify(too_large).kind(), ErrorKind::Format);
        let leader = KafkaError::MessageProduction(RDKafkaErrorCode::LeaderNotAvailable);
        assert!(classify(leader).is_transient());
    }

    #[test]
    fn headers_are_copied() {
        let msg = OutboxMessage::new(b"v".to_vec())
            .with_header("x-event-type", "PostLiked")
            .with_header("x-event-id", "42");
        let headers = headers_of(&msg);
        assert_eq!(headers.count(), 2);
    }
}
