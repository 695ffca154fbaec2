use std::sync::Arc;

use chrono::{SecondsFormat, Utc};

use reelz_api::topic::{
    HEADER_ATTEMPTS, HEADER_ERROR_TYPE, HEADER_FAILURE_REASON, HEADER_ORIGINAL_TOPIC,
    HEADER_TIMESTAMP,
};
use reelz_api::{BackendError, DeliveryOutcome, OutboxMessage, Producer};

use crate::codec::{self, TopicSchema};
use crate::{ProducerPool, PublishError, RetryPolicy, SchemaRegistryCache};

// ═══════════════════════════════════════════════════════════════
//  EventPublisher
// ═══════════════════════════════════════════════════════════════

/// Отправка batch'ей в broker с retry/backoff и fallback в dead-letter topic.
///
/// Состояния batch'а:
/// `Pending → (Sending → Failed → Backoff)* → Delivered | DeadLettered | Failed`.
pub struct EventPublisher {
    pool: Arc<ProducerPool>,
    schemas: Arc<SchemaRegistryCache>,
    retry: RetryPolicy,
}

impl EventPublisher {
    pub fn new(pool: Arc<ProducerPool>, schemas: Arc<SchemaRegistryCache>, retry: RetryPolicy) -> Self {
        Self { pool, schemas, retry }
    }

    pub fn pool(&self) -> &Arc<ProducerPool> {
        &self.pool
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistryCache> {
        &self.schemas
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Publish `messages` to `topic` as one ordered batch.
    ///
    /// With `schema`, every value (JSON bytes) is re-encoded as a
    /// schema-framed Avro datum before the first attempt; an encoding or
    /// registration failure aborts without touching the broker.
    pub async fn publish_batch(
        &self,
        producer_name: &str,
        topic: &str,
        messages: &[OutboxMessage],
        schema: Option<&TopicSchema>,
        dead_letter_topic: Option<&str>,
    ) -> Result<DeliveryOutcome, PublishError> {
        let batch = match schema {
            Some(schema) => self.encode_batch(topic, messages, schema).await?,
            None => messages.to_vec(),
        };

        let producer = self.pool.get(producer_name).await?;
        let (attempts, error) = match self.send_with_retry(&*producer, topic, &batch).await {
            Ok(attempts) => {
                if attempts > 1 {
                    tracing::info!(topic = %topic, attempts, count = batch.len(), "batch delivered after retry");
                } else {
                    tracing::debug!(topic = %topic, count = batch.len(), "batch delivered");
                }
                return Ok(DeliveryOutcome::Delivered);
            }
            Err(failure) => failure,
        };

        let Some(dlq) = dead_letter_topic else {
            tracing::error!(topic = %topic, attempts, error = %error, "batch failed, no dead-letter topic");
            return Err(PublishError::Delivery { topic: topic.to_string(), attempts, source: error });
        };

        let dead_letters = dead_letter_batch(&batch, topic, attempts, &error);
        match producer.send(dlq, &dead_letters).await {
            Ok(()) => {
                tracing::error!(
                    topic = %topic,
                    dead_letter_topic = %dlq,
                    attempts,
                    count = dead_letters.len(),
                    error = %error,
                    "batch dead-lettered"
                );
                Ok(DeliveryOutcome::DeadLettered)
            }
            Err(dlq_error) => {
                tracing::error!(
                    topic = %topic,
                    dead_letter_topic = %dlq,
                    error = %dlq_error,
                    "dead-letter send failed"
                );
                Err(PublishError::Delivery { topic: topic.to_string(), attempts, source: error })
            }
        }
    }

    async fn encode_batch(
        &self,
        topic: &str,
        messages: &[OutboxMessage],
        schema: &TopicSchema,
    ) -> Result<Vec<OutboxMessage>, PublishError> {
        let schema_id = self.schemas.resolve(topic, schema).await?;
        let encode_err = |source: BackendError| PublishError::Encode { topic: topic.to_string(), source };

        messages
            .iter()
            .map(|msg| {
                let value: serde_json::Value =
                    serde_json::from_slice(&msg.value).map_err(|e| encode_err(e.into()))?;
                let bytes = codec::encode(schema, schema_id, &value).map_err(encode_err)?;
                Ok(OutboxMessage { value: bytes, ..msg.clone() })
            })
            .collect()
    }

    /// Returns the number of attempts used on success, or the attempt count
    /// and last error once retries are exhausted.
    async fn send_with_retry(
        &self,
        producer: &dyn Producer,
        topic: &str,
        batch: &[OutboxMessage],
    ) -> Result<u32, (u32, BackendError)> {
        let max_attempts = self.retry.attempts();
        let mut attempt = 1;
        loop {
            tracing::debug!(topic = %topic, attempt, count = batch.len(), "sending batch");
            let error = match producer.send(topic, batch).await {
                Ok(()) => return Ok(attempt),
                Err(e) => e,
            };

            if attempt >= max_attempts || !error.is_transient() {
                tracing::warn!(topic = %topic, attempt, error = %error, "send failed, giving up");
                return Err((attempt, error));
            }

            let delay = self.retry.delay(attempt);
            tracing::warn!(
                topic = %topic,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "send failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Original messages with diagnostic headers appended.
fn dead_letter_batch(
    batch: &[OutboxMessage],
    topic: &str,
    attempts: u32,
    error: &BackendError,
) -> Vec<OutboxMessage> {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let reason = if error.message().is_empty() { error.kind().to_string() } else { error.message().to_string() };
    batch
        .iter()
        .cloned()
        .map(|msg| {
            msg.with_header(HEADER_ORIGINAL_TOPIC, topic)
                .with_header(HEADER_FAILURE_REASON, reason.clone())
                .with_header(HEADER_ATTEMPTS, attempts.to_string())
                .with_header(HEADER_TIMESTAMP, timestamp.clone())
                .with_header(HEADER_ERROR_TYPE, error.kind().to_string())
        })
        .collect()
}
