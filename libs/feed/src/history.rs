use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use reelz_api::{PostId, ScoredPost, UserId, ViewHistory};

use crate::FeedError;

/// Drops posts the user already viewed inside a trailing window.
/// Read-only: never records views.
pub struct ViewFilter {
    history: Arc<dyn ViewHistory>,
    window: TimeDelta,
}

impl ViewFilter {
    pub fn new(history: Arc<dyn ViewHistory>, window: TimeDelta) -> Self {
        Self { history, window }
    }

    pub async fn filter_unseen(&self, user: UserId, ranked: Vec<ScoredPost>) -> Result<Vec<ScoredPost>, FeedError> {
        self.filter_unseen_at(user, ranked, Utc::now()).await
    }

    pub async fn filter_unseen_at(
        &self,
        user: UserId,
        mut ranked: Vec<ScoredPost>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredPost>, FeedError> {
        if ranked.is_empty() {
            return Ok(ranked);
        }
        let ids: Vec<PostId> = ranked.iter().map(|p| p.post_id).collect();
        let seen = self
            .history
            .viewed_since(user, &ids, now - self.window)
            .await
            .map_err(FeedError::History)?;
        ranked.retain(|p| !seen.contains(&p.post_id));
        Ok(ranked)
    }
}
