#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("backend: {0}")]
    Backend(#[from] reelz_api::BackendError),

    #[error("publisher: {0}")]
    Publish(#[from] event_publisher::PublishError),

    #[error("api: {0}")]
    Api(String),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
