use crate::EventType;

// ════════════════════════════════════════════════════════════════
//  Topic naming
// ════════════════════════════════════════════════════════════════

/// Prefix of every domain-event topic: `app_events_{EventType}`.
pub const DOMAIN_TOPIC_PREFIX: &str = "app_events_";

/// Operational topic for media processing jobs.
pub const MEDIA_PROCESSING_TOPIC: &str = "media_processing";

/// Suffix of a dead-letter topic: `{original_topic}-dlq`.
pub const DEAD_LETTER_SUFFIX: &str = "-dlq";

/// Suffix of a schema subject: `{topic}-value`.
pub const SUBJECT_SUFFIX: &str = "-value";

// Dead-letter headers.
pub const HEADER_ORIGINAL_TOPIC: &str = "x-original-topic";
pub const HEADER_FAILURE_REASON: &str = "x-failure-reason";
pub const HEADER_ATTEMPTS: &str = "x-attempts";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_ERROR_TYPE: &str = "x-error-type";

pub const HEADER_TRACE_ID: &str = "x-trace-id";
pub const HEADER_EVENT_ID: &str = "x-event-id";
pub const HEADER_EVENT_TYPE: &str = "x-event-type";

pub fn domain_topic(event_type: EventType) -> String {
    format!("{DOMAIN_TOPIC_PREFIX}{event_type}")
}

pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}{DEAD_LETTER_SUFFIX}")
}

pub fn schema_subject(topic: &str) -> String {
    format!("{topic}{SUBJECT_SUFFIX}")
}
