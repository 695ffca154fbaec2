use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use reelz_api::{
    CandidatePost, FollowedAuthor, GraphCandidateSource, PostId, RecentPost, ScoredPost, UserId,
    select_top_followed,
};

use crate::FeedError;

/// Tier parameters of the ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct RankerConfig {
    /// Share of follow edges (by weight) that form the priority tier.
    pub priority_fraction: f64,
    pub priority_multiplier: f64,
    pub regular_multiplier: f64,
    pub priority_window: TimeDelta,
    pub regular_window: TimeDelta,
    /// Maximum number of ranked posts.
    pub limit: usize,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            priority_fraction: 0.10,
            priority_multiplier: 1.1,
            regular_multiplier: 1.0,
            priority_window: TimeDelta::days(14),
            regular_window: TimeDelta::days(7),
            limit: 20,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  FeedRanker
// ═══════════════════════════════════════════════════════════════

/// Два tier'а кандидатов из графа подписок:
///
/// 1. priority: верхние `priority_fraction` подписок по весу, посты за
///    `priority_window`, `score = weight × priority_multiplier`;
/// 2. regular: остальные подписки, посты за `regular_window`,
///    `score = weight × regular_multiplier`.
///
/// Результат зависит только от множества кандидатов, не от порядка,
/// в котором граф их вернул.
pub struct FeedRanker {
    graph: Arc<dyn GraphCandidateSource>,
    config: RankerConfig,
}

impl FeedRanker {
    pub fn new(graph: Arc<dyn GraphCandidateSource>, config: RankerConfig) -> Self {
        Self { graph, config }
    }

    pub fn config(&self) -> &RankerConfig {
        &self.config
    }

    pub async fn rank(&self, user: UserId) -> Result<Vec<ScoredPost>, FeedError> {
        self.rank_at(user, Utc::now()).await
    }

    pub async fn rank_at(&self, user: UserId, now: DateTime<Utc>) -> Result<Vec<ScoredPost>, FeedError> {
        let followed = self.graph.followed(user).await.map_err(FeedError::Graph)?;
        if followed.is_empty() {
            tracing::debug!(user = %user, "no follows, empty feed");
            return Ok(Vec::new());
        }

        // both tiers come from one snapshot of the edges
        let priority = select_top_followed(followed.clone(), self.config.priority_fraction);

        let priority_ids: HashSet<UserId> = priority.iter().map(|a| a.user_id).collect();
        let regular: Vec<FollowedAuthor> = followed
            .into_iter()
            .filter(|a| !priority_ids.contains(&a.user_id))
            .collect();

        let (priority_posts, regular_posts) = futures::try_join!(
            self.posts_by(&priority, now - self.config.priority_window),
            self.posts_by(&regular, now - self.config.regular_window),
        )
        .map_err(FeedError::Graph)?;

        let priority_candidates = candidates(&priority, priority_posts);
        let regular_candidates = candidates(&regular, regular_posts);
        tracing::debug!(
            user = %user,
            priority_authors = priority.len(),
            regular_authors = regular.len(),
            priority_candidates = priority_candidates.len(),
            regular_candidates = regular_candidates.len(),
            "feed candidates collected"
        );
        Ok(merge_and_rank(&priority_candidates, &regular_candidates, &self.config))
    }

    async fn posts_by(
        &self,
        authors: &[FollowedAuthor],
        since: DateTime<Utc>,
    ) -> Result<Vec<RecentPost>, reelz_api::BackendError> {
        if authors.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<UserId> = authors.iter().map(|a| a.user_id).collect();
        self.graph.recent_posts_by_authors(&ids, since).await
    }
}

/// Attach the author's follow weight; posts by unknown authors are dropped.
fn candidates(authors: &[FollowedAuthor], posts: Vec<RecentPost>) -> Vec<CandidatePost> {
    let weights: HashMap<UserId, f64> = authors.iter().map(|a| (a.user_id, a.weight)).collect();
    posts
        .into_iter()
        .filter_map(|p| {
            let weight = weights.get(&p.author_id)?;
            Some(CandidatePost {
                post_id: p.post_id,
                author_id: p.author_id,
                created_at: p.created_at,
                source_weight: *weight,
            })
        })
        .collect()
}

/// Score both tiers, keep the best occurrence of each post, order by
/// score desc → created_at desc → post_id, truncate to `limit`.
pub fn merge_and_rank(
    priority: &[CandidatePost],
    regular: &[CandidatePost],
    config: &RankerConfig,
) -> Vec<ScoredPost> {
    let scored = priority
        .iter()
        .map(|c| score(c, config.priority_multiplier))
        .chain(regular.iter().map(|c| score(c, config.regular_multiplier)));

    let mut best: HashMap<PostId, ScoredPost> = HashMap::new();
    for post in scored {
        match best.get(&post.post_id) {
            Some(existing) if ranking_order(existing, &post) != Ordering::Greater => {}
            _ => {
                best.insert(post.post_id, post);
            }
        }
    }

    let mut ranked: Vec<ScoredPost> = best.into_values().collect();
    ranked.sort_by(ranking_order);
    ranked.truncate(config.limit);
    ranked
}

fn score(c: &CandidatePost, multiplier: f64) -> ScoredPost {
    ScoredPost {
        post_id: c.post_id,
        author_id: c.author_id,
        score: c.source_weight * multiplier,
        created_at: c.created_at,
    }
}

/// `Less` means `a` ranks before `b`.
fn ranking_order(a: &ScoredPost, b: &ScoredPost) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.post_id.cmp(&b.post_id))
        .then_with(|| a.author_id.cmp(&b.author_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(post_id: PostId, weight: f64, age_h: i64, now: DateTime<Utc>) -> CandidatePost {
        CandidatePost {
            post_id,
            author_id: UserId::new(),
            created_at: now - TimeDelta::hours(age_h),
            source_weight: weight,
        }
    }

    #[test]
    fn duplicate_post_keeps_highest_score() {
        let now = Utc::now();
        let post = PostId::new();
        let p = candidate(post, 0.5, 1, now);
        let mut r = p;
        r.source_weight = 0.9;

        let config = RankerConfig::default();
        let ranked = merge_and_rank(&[p], &[r], &config);
        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].score - 0.9).abs() < 1e-12);

        let swapped = merge_and_rank(&[r], &[p], &config);
        assert_eq!(swapped.len(), 1);
        assert!((swapped[0].score - 0.99).abs() < 1e-12);
    }

    #[test]
    fn ordering_is_input_independent() {
        let now = Utc::now();
        let regular: Vec<CandidatePost> = (0..30)
            .map(|i| candidate(PostId::new(), 0.1 * f64::from(i % 4), i64::from(i % 5), now))
            .collect();
        let mut reversed = regular.clone();
        reversed.reverse();

        let config = RankerConfig::default();
        let a = merge_and_rank(&[], &regular, &config);
        let b = merge_and_rank(&[], &reversed, &config);
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
        assert!(a.windows(2).all(|w| ranking_order(&w[0], &w[1]) != Ordering::Greater));
    }

    #[test]
    fn ties_break_by_recency() {
        let now = Utc::now();
        let older = candidate(PostId::new(), 0.1, 5, now);
        let newer = candidate(PostId::new(), 0.1, 1, now);
        let ranked = merge_and_rank(&[], &[older, newer], &RankerConfig::default());
        assert_eq!(ranked[0].post_id, newer.post_id);
        assert_eq!(ranked[1].post_id, older.post_id);
    }
}
