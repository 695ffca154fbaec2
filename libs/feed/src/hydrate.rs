use std::collections::HashMap;
use std::sync::Arc;

use reelz_api::{FeedItem, HydratedPost, PostId, PostStore, ScoredPost};

use crate::FeedError;

/// Resolves ranked ids into full records. Keeps the ranked order and the
/// upstream score; posts missing from the store are skipped.
pub struct FeedHydrator {
    store: Arc<dyn PostStore>,
}

impl FeedHydrator {
    pub fn new(store: Arc<dyn PostStore>) -> Self {
        Self { store }
    }

    pub async fn hydrate(&self, ranked: &[ScoredPost]) -> Result<Vec<FeedItem>, FeedError> {
        if ranked.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<PostId> = ranked.iter().map(|p| p.post_id).collect();
        let mut rows: HashMap<PostId, HydratedPost> = self
            .store
            .load_posts(&ids)
            .await
            .map_err(FeedError::Hydrate)?
            .into_iter()
            .map(|row| (row.post.id, row))
            .collect();

        let mut items = Vec::with_capacity(ranked.len());
        for scored in ranked {
            let Some(HydratedPost { mut post, user }) = rows.remove(&scored.post_id) else {
                tracing::warn!(post_id = %scored.post_id, "ranked post missing from store, skipped");
                continue;
            };
            post.media_items.sort_by_key(|m| m.position);
            items.push(FeedItem { post, user, relevance_score: scored.score });
        }
        Ok(items)
    }
}
