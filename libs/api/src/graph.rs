use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use crate::{BackendError, FollowedAuthor, RecentPost, UserId};

// ════════════════════════════════════════════════════════════════
//  GraphCandidateSource
// ════════════════════════════════════════════════════════════════

/// Read-only view of the weighted follow graph used by feed ranking.
///
/// Every method tolerates a user with no outgoing edges and returns an
/// empty result rather than an error.
pub trait GraphCandidateSource: Send + Sync {
    /// All outgoing edges, descending by weight.
    fn followed(&self, user: UserId)
        -> Pin<Box<dyn Future<Output = Result<Vec<FollowedAuthor>, BackendError>> + Send + '_>>;

    /// Outgoing edges in the top `fraction` by weight, descending.
    /// Length is `top_fraction_len(total, fraction)`. Callers that also need
    /// the full list should read `followed` once and use
    /// [`select_top_followed`] instead.
    fn top_followed(&self, user: UserId, fraction: f64)
        -> Pin<Box<dyn Future<Output = Result<Vec<FollowedAuthor>, BackendError>> + Send + '_>>
    {
        Box::pin(async move { Ok(select_top_followed(self.followed(user).await?, fraction)) })
    }

    /// Posts by `authors` created strictly after `since` (`now - window`).
    fn recent_posts_by_authors<'a>(
        &'a self,
        authors: &'a [UserId],
        since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecentPost>, BackendError>> + Send + 'a>>;
}

/// Number of edges in the top `fraction` of `total`, rounded up.
///
/// 100 × 0.10 → 10, 95 × 0.10 → 10, 5 × 0.10 → 1, 0 → 0.
pub fn top_fraction_len(total: usize, fraction: f64) -> usize {
    if total == 0 || !fraction.is_finite() || fraction <= 0.0 {
        return 0;
    }
    // 30 × 0.1 is 3.0000000000000004 in f64
    let raw = total as f64 * fraction.min(1.0);
    let len = (raw - 1e-9).ceil().max(0.0) as usize;
    len.min(total)
}

/// Order edges by weight descending, ties by user id, then keep the top
/// fraction.
pub fn select_top_followed(mut edges: Vec<FollowedAuthor>, fraction: f64) -> Vec<FollowedAuthor> {
    sort_by_weight(&mut edges);
    let len = top_fraction_len(edges.len(), fraction);
    edges.truncate(len);
    edges
}

/// Weight descending, user id ascending.
pub fn sort_by_weight(edges: &mut [FollowedAuthor]) {
    edges.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(weights: &[f64]) -> Vec<FollowedAuthor> {
        weights
            .iter()
            .map(|w| FollowedAuthor { user_id: UserId::new(), weight: *w })
            .collect()
    }

    #[test]
    fn top_fraction_rounds_up() {
        assert_eq!(top_fraction_len(100, 0.10), 10);
        assert_eq!(top_fraction_len(95, 0.10), 10);
        assert_eq!(top_fraction_len(30, 0.10), 3);
        assert_eq!(top_fraction_len(20, 0.10), 2);
        assert_eq!(top_fraction_len(5, 0.10), 1);
        assert_eq!(top_fraction_len(0, 0.10), 0);
        assert_eq!(top_fraction_len(10, 0.0), 0);
        assert_eq!(top_fraction_len(10, 2.0), 10);
    }

    #[test]
    fn select_keeps_heaviest() {
        let mut input = edges(&[0.1; 18]);
        input.push(FollowedAuthor { user_id: UserId::new(), weight: 0.9 });
        input.push(FollowedAuthor { user_id: UserId::new(), weight: 0.8 });
        let top = select_top_followed(input, 0.10);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].weight, 0.9);
        assert_eq!(top[1].weight, 0.8);
    }

    #[test]
    fn ties_are_stable_by_user_id() {
        let input = edges(&[0.5, 0.5, 0.5, 0.5]);
        let mut reversed = input.clone();
        reversed.reverse();
        assert_eq!(select_top_followed(input, 0.5), select_top_followed(reversed, 0.5));
    }
}
