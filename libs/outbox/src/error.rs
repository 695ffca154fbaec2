use event_publisher::PublishError;
use reelz_api::{BackendError, ErrorKind, EventType};

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("outbox ({event_type}): {source}")]
    Record { event_type: EventType, source: BackendError },

    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("{0}")]
    Publish(#[from] PublishError),

    #[error("invalid request: {0}")]
    Invalid(String),
}

impl OutboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OutboxError::Record { source, .. } | OutboxError::Backend(source) => source.kind(),
            OutboxError::Publish(e) => e.kind(),
            OutboxError::Invalid(_) => ErrorKind::Constraint,
        }
    }
}
