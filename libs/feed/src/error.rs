use reelz_api::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("graph: {0}")]
    Graph(BackendError),

    #[error("view history: {0}")]
    History(BackendError),

    #[error("hydrate: {0}")]
    Hydrate(BackendError),
}
