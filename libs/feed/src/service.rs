use serde::Serialize;

use reelz_api::{FeedItem, UserId};

use crate::{FeedError, FeedHydrator, FeedRanker, ViewFilter};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feed {
    pub items: Vec<FeedItem>,
    /// Set when an upstream failure was replaced by an empty feed.
    pub degraded: bool,
}

/// rank → filter unseen → hydrate.
pub struct FeedService {
    ranker: FeedRanker,
    filter: ViewFilter,
    hydrator: FeedHydrator,
}

impl FeedService {
    pub fn new(ranker: FeedRanker, filter: ViewFilter, hydrator: FeedHydrator) -> Self {
        Self { ranker, filter, hydrator }
    }

    /// Any failure in the pipeline fails the whole request.
    pub async fn try_feed(&self, user: UserId) -> Result<Vec<FeedItem>, FeedError> {
        let ranked = self.ranker.rank(user).await?;
        let unseen = self.filter.filter_unseen(user, ranked).await?;
        self.hydrator.hydrate(&unseen).await
    }

    /// Like `try_feed`, but degrades to an empty feed on error.
    pub async fn feed_for(&self, user: UserId) -> Feed {
        match self.try_feed(user).await {
            Ok(items) => Feed { items, degraded: false },
            Err(e) => {
                tracing::warn!(user = %user, error = %e, "feed degraded to empty");
                Feed { items: Vec::new(), degraded: true }
            }
        }
    }
}
