use reelz_api::{BackendError, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("encode ({topic}): {source}")]
    Encode { topic: String, source: BackendError },

    #[error("schema registry ({subject}): {source}")]
    Registry { subject: String, source: BackendError },

    #[error("producer '{name}': {source}")]
    Connect { name: String, source: BackendError },

    #[error("send to '{topic}' failed after {attempts} attempt(s): {source}")]
    Delivery { topic: String, attempts: u32, source: BackendError },

    #[error("producer pool is shut down")]
    PoolClosed,

    #[error("{failed} producer(s) failed to disconnect")]
    Shutdown { failed: usize },
}

impl PublishError {
    /// Kind of the underlying backend error, if any.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PublishError::Encode { source, .. }
            | PublishError::Registry { source, .. }
            | PublishError::Connect { source, .. }
            | PublishError::Delivery { source, .. } => source.kind(),
            PublishError::PoolClosed | PublishError::Shutdown { .. } => ErrorKind::Logic,
        }
    }

    /// Encoding and registration failures happen before any send attempt.
    pub fn is_encoding(&self) -> bool {
        matches!(self, PublishError::Encode { .. } | PublishError::Registry { .. })
    }
}
