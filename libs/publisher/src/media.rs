use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reelz_api::topic::{HEADER_TRACE_ID, MEDIA_PROCESSING_TOPIC, dead_letter_topic};
use reelz_api::{DeliveryOutcome, OneOrMany, OutboxMessage, PostId};

use crate::codec::TopicSchema;
use crate::{EventPublisher, PublishError};

/// Producer name used for media-processing jobs.
pub const MEDIA_PRODUCER: &str = "mediaProducer";

pub const MEDIA_PROCESSING_SCHEMA: &str = r#"{
  "type": "record",
  "name": "MediaProcessingJob",
  "namespace": "xyz.virajdoshi.reelz",
  "fields": [
    {"name": "toProcessUrls", "type": {"type": "array", "items": "string"}, "doc": "Storage URLs of the media files to process"},
    {"name": "uploadType", "type": "string", "doc": "image, video or story"},
    {"name": "post_id", "type": "string", "doc": "Post the media belongs to (uuid)"},
    {"name": "timeStamp", "type": "long", "doc": "Request time, unix millis"},
    {"name": "traceId", "type": "string", "doc": "Trace id of the request"}
  ]
}"#;

/// Задача на обработку media, одна на пост.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaJob {
    #[serde(rename = "toProcessUrls")]
    pub to_process_urls: Vec<String>,
    #[serde(rename = "uploadType")]
    pub upload_type: String,
    pub post_id: PostId,
    #[serde(rename = "timeStamp")]
    pub timestamp: i64,
    #[serde(rename = "traceId")]
    pub trace_id: Uuid,
}

impl MediaJob {
    pub fn new(post_id: PostId, urls: OneOrMany<String>, upload_type: impl Into<String>) -> Self {
        Self {
            to_process_urls: urls.into_vec(),
            upload_type: upload_type.into(),
            post_id,
            timestamp: Utc::now().timestamp_millis(),
            trace_id: Uuid::new_v4(),
        }
    }

    fn to_message(&self) -> Result<OutboxMessage, PublishError> {
        let value = serde_json::to_value(self)
            .map_err(|e| PublishError::Encode { topic: MEDIA_PROCESSING_TOPIC.to_string(), source: e.into() })?;
        let msg = OutboxMessage::json(&value)
            .map_err(|source| PublishError::Encode { topic: MEDIA_PROCESSING_TOPIC.to_string(), source })?;
        Ok(msg.with_key(self.post_id.to_string()).with_header(HEADER_TRACE_ID, self.trace_id.to_string()))
    }
}

/// Result of an enqueue that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaJobOutcome {
    Queued,
    /// The job landed in the dead-letter topic.
    Degraded,
}

pub struct MediaJobQueue {
    publisher: Arc<EventPublisher>,
    schema: TopicSchema,
}

impl MediaJobQueue {
    pub fn new(publisher: Arc<EventPublisher>) -> Result<Self, PublishError> {
        let schema = TopicSchema::parse(MEDIA_PROCESSING_SCHEMA)
            .map_err(|source| PublishError::Encode { topic: MEDIA_PROCESSING_TOPIC.to_string(), source })?;
        Ok(Self { publisher, schema })
    }

    pub async fn enqueue(&self, job: &MediaJob) -> Result<MediaJobOutcome, PublishError> {
        if job.to_process_urls.is_empty() {
            return Err(PublishError::Encode {
                topic: MEDIA_PROCESSING_TOPIC.to_string(),
                source: reelz_api::BackendError::format_err("media job without urls"),
            });
        }
        let message = job.to_message()?;
        let dlq = dead_letter_topic(MEDIA_PROCESSING_TOPIC);
        let outcome = self
            .publisher
            .publish_batch(MEDIA_PRODUCER, MEDIA_PROCESSING_TOPIC, &[message], Some(&self.schema), Some(&dlq))
            .await?;

        tracing::info!(
            post_id = %job.post_id,
            trace_id = %job.trace_id,
            urls = job.to_process_urls.len(),
            outcome = ?outcome,
            "media job enqueued"
        );
        Ok(match outcome {
            DeliveryOutcome::Delivered => MediaJobOutcome::Queued,
            DeliveryOutcome::DeadLettered => MediaJobOutcome::Degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_serializes_to_schema_field_names() {
        let post = PostId::new();
        let job = MediaJob::new(post, OneOrMany::SingleItem("s3://bucket/a.jpg".into()), "image");
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["toProcessUrls"], serde_json::json!(["s3://bucket/a.jpg"]));
        assert_eq!(value["uploadType"], "image");
        assert_eq!(value["post_id"], post.to_string());
        assert!(value["timeStamp"].is_i64());
        assert!(value["traceId"].is_string());
    }

    #[test]
    fn schema_parses() {
        assert!(TopicSchema::parse(MEDIA_PROCESSING_SCHEMA).is_ok());
    }
}
