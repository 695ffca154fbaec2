use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use reelz_api::{
    BackendError, FollowEdge, FollowedAuthor, GraphCandidateSource, PostId, RecentPost, UserId,
    sort_by_weight,
};

#[derive(Default)]
struct Graph {
    /// follower → followed → edge
    edges: HashMap<UserId, HashMap<UserId, FollowEdge>>,
    posts: HashMap<PostId, RecentPost>,
}

/// In-memory social graph.
#[derive(Default)]
pub struct MemoryGraph {
    graph: RwLock<Graph>,
    fail_reads: AtomicBool,
    edge_reads: AtomicUsize,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the edge `edge.from → edge.to`.
    pub async fn follow(&self, edge: FollowEdge) {
        let mut graph = self.graph.write().await;
        graph.edges.entry(edge.from).or_default().insert(edge.to, edge);
    }

    pub async fn unfollow(&self, from: UserId, to: UserId) -> bool {
        let mut graph = self.graph.write().await;
        graph.edges.get_mut(&from).is_some_and(|out| out.remove(&to).is_some())
    }

    pub async fn add_post(&self, post: RecentPost) {
        self.graph.write().await.posts.insert(post.post_id, post);
    }

    /// Make every read fail with an I/O error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Release);
    }

    /// Number of `followed` calls served so far.
    pub fn edge_reads(&self) -> usize {
        self.edge_reads.load(Ordering::Acquire)
    }

    fn check_reads(&self) -> Result<(), BackendError> {
        if self.fail_reads.load(Ordering::Acquire) {
            return Err(BackendError::io("graph unavailable"));
        }
        Ok(())
    }

    async fn outgoing(&self, user: UserId) -> Vec<FollowedAuthor> {
        let graph = self.graph.read().await;
        graph
            .edges
            .get(&user)
            .map(|out| {
                out.values()
                    .map(|e| FollowedAuthor { user_id: e.to, weight: e.weight })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl GraphCandidateSource for MemoryGraph {
    fn followed(&self, user: UserId)
        -> Pin<Box<dyn Future<Output = Result<Vec<FollowedAuthor>, BackendError>> + Send + '_>>
    {
        Box::pin(async move {
            self.check_reads()?;
            self.edge_reads.fetch_add(1, Ordering::AcqRel);
            let mut edges = self.outgoing(user).await;
            sort_by_weight(&mut edges);
            Ok(edges)
        })
    }

    fn recent_posts_by_authors<'a>(
        &'a self,
        authors: &'a [UserId],
        since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecentPost>, BackendError>> + Send + 'a>> {
        Box::pin(async move {
            self.check_reads()?;
            if authors.is_empty() {
                return Ok(Vec::new());
            }
            let graph = self.graph.read().await;
            let mut posts: Vec<RecentPost> = graph
                .posts
                .values()
                .filter(|p| p.created_at > since && authors.contains(&p.author_id))
                .copied()
                .collect();
            posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.post_id.cmp(&b.post_id)));
            Ok(posts)
        })
    }
}
