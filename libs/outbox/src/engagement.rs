use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use reelz_api::{
    BackendError, ChangeEvent, EventType, FollowEdge, FollowOutcome, FollowStatus, MediaUpload, Mutation,
    OneOrMany, PostCounter, PostId, RelationalStore, StoreTx, UserCounter, UserId, ViewHistory,
};

use crate::{OutboxError, OutboxRecorder};

// ═══════════════════════════════════════════════════════════════
//  EngagementService
// ═══════════════════════════════════════════════════════════════

/// Доменные записи, каждая в одной транзакции вместе со своим outbox-событием.
pub struct EngagementService {
    store: Arc<dyn RelationalStore>,
    views: Arc<dyn ViewHistory>,
    recorder: OutboxRecorder,
}

impl EngagementService {
    pub fn new(store: Arc<dyn RelationalStore>, views: Arc<dyn ViewHistory>) -> Self {
        Self { store, views, recorder: OutboxRecorder }
    }

    /// Public account.
    pub async fn create_user(
        &self,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<UserId, OutboxError> {
        self.register_user(username, first_name, last_name, false).await
    }

    pub async fn register_user(
        &self,
        username: &str,
        first_name: &str,
        last_name: &str,
        is_private: bool,
    ) -> Result<UserId, OutboxError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(OutboxError::Invalid("username must not be empty".into()));
        }
        let id = UserId::new();
        let mutations = [Mutation::InsertUser {
            id,
            username: username.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            is_private,
        }];
        let payload = json!({ "userId": id, "username": username, "isPrivate": is_private });
        self.write(&mutations, EventType::UserCreated, payload).await?;
        Ok(id)
    }

    /// Post with its media rows (positions 1..n) and the author's post counter.
    pub async fn create_post(
        &self,
        user: UserId,
        caption: Option<String>,
        media: OneOrMany<MediaUpload>,
    ) -> Result<PostId, OutboxError> {
        let items = media.into_vec();
        if items.is_empty() {
            return Err(OutboxError::Invalid("post needs at least one media item".into()));
        }
        let id = PostId::new();
        let media_count = items.len();
        let mutations = [
            Mutation::InsertPost { id, user_id: user, caption },
            Mutation::InsertMedia { post_id: id, items },
            Mutation::BumpUserCounter { user_id: user, counter: UserCounter::Posts, delta: 1 },
        ];
        let payload = json!({ "userId": user, "postId": id, "mediaCount": media_count });
        self.write(&mutations, EventType::PostCreated, payload).await?;
        Ok(id)
    }

    /// Fails with a `Constraint` error when the user already liked the post.
    pub async fn like_post(&self, user: UserId, post: PostId) -> Result<(), OutboxError> {
        let mutations = [
            Mutation::InsertLike { user_id: user, post_id: post },
            Mutation::BumpPostCounter { post_id: post, counter: PostCounter::Likes, delta: 1 },
        ];
        let payload = json!({ "userId": user, "eventType": EventType::PostLiked, "postId": post });
        self.write(&mutations, EventType::PostLiked, payload).await?;
        Ok(())
    }

    pub async fn comment_on_post(
        &self,
        user: UserId,
        post: PostId,
        text: &str,
        parent: Option<Uuid>,
    ) -> Result<Uuid, OutboxError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(OutboxError::Invalid("comment must not be empty".into()));
        }
        let id = Uuid::new_v4();
        let mutations = [
            Mutation::InsertComment { id, user_id: user, post_id: post, text: text.to_string(), parent_id: parent },
            Mutation::BumpPostCounter { post_id: post, counter: PostCounter::Comments, delta: 1 },
        ];
        let payload = json!({
            "userId": user,
            "eventType": EventType::PostCommented,
            "postId": post,
            "commentId": id,
        });
        self.write(&mutations, EventType::PostCommented, payload).await?;
        Ok(id)
    }

    /// Follow of a public account creates an edge with the bootstrap weight
    /// and moves both counters (`UserFollowed`). Following a private account
    /// only records a request (`FollowRequested`), counters stay put.
    pub async fn follow(&self, follower: UserId, followed: UserId) -> Result<FollowOutcome, OutboxError> {
        if follower == followed {
            return Err(OutboxError::Invalid("cannot follow yourself".into()));
        }
        let edge = FollowEdge::new(follower, followed)?;
        let mut tx = self.store.begin().await?;
        let lookup = tx.user_is_private(followed).await;
        let private = match lookup {
            Ok(private) => private,
            Err(e) => return Err(self.abort(tx, EventType::UserFollowed, e.into()).await),
        };

        let (status, event_type) = if private {
            (FollowStatus::Requested, EventType::FollowRequested)
        } else {
            (FollowStatus::Follows, EventType::UserFollowed)
        };
        let mut mutations = vec![Mutation::InsertFollow { follower, followed, status }];
        if status == FollowStatus::Follows {
            mutations.extend(follow_counters(follower, followed, 1));
        }
        let payload = json!({
            "followerId": follower,
            "followedId": followed,
            "status": status,
            "weight": edge.weight,
            "createdAt": edge.created_at,
        });
        self.finish(tx, &mutations, event_type, payload).await?;
        Ok(FollowOutcome { status, edge })
    }

    /// Removes a follow or withdraws a pending request. Counters move only
    /// for a real follow.
    pub async fn unfollow(&self, follower: UserId, followed: UserId) -> Result<FollowStatus, OutboxError> {
        if follower == followed {
            return Err(OutboxError::Invalid("cannot unfollow yourself".into()));
        }
        let mut tx = self.store.begin().await?;
        let lookup = tx.follow_status(follower, followed).await;
        let status = match lookup {
            Ok(Some(status)) => status,
            Ok(None) => {
                let missing = BackendError::not_found(format!("follow {follower} -> {followed}"));
                return Err(self.abort(tx, EventType::UserUnfollowed, missing.into()).await);
            }
            Err(e) => return Err(self.abort(tx, EventType::UserUnfollowed, e.into()).await),
        };

        let mut mutations = vec![Mutation::DeleteFollow { follower, followed }];
        if status == FollowStatus::Follows {
            mutations.extend(follow_counters(follower, followed, -1));
        }
        let payload = json!({ "followerId": follower, "followedId": followed, "status": status });
        self.finish(tx, &mutations, EventType::UserUnfollowed, payload).await?;
        Ok(status)
    }

    /// Append-only and idempotent; not outboxed. Returns `false` for a repeat view.
    pub async fn mark_viewed(&self, user: UserId, post: PostId) -> Result<bool, OutboxError> {
        Ok(self.views.mark_viewed(user, post, Utc::now()).await?)
    }

    /// begin → apply* → record → commit; any failure rolls back.
    async fn write(
        &self,
        mutations: &[Mutation],
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Result<ChangeEvent, OutboxError> {
        let tx = self.store.begin().await?;
        self.finish(tx, mutations, event_type, payload).await
    }

    async fn finish(
        &self,
        mut tx: Box<dyn StoreTx>,
        mutations: &[Mutation],
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Result<ChangeEvent, OutboxError> {
        match self.apply_all(&mut *tx, mutations, event_type, payload).await {
            Ok(event) => {
                tx.commit().await?;
                tracing::debug!(event_type = %event_type, "domain write committed");
                Ok(event)
            }
            Err(e) => Err(self.abort(tx, event_type, e).await),
        }
    }

    async fn abort(&self, tx: Box<dyn StoreTx>, event_type: EventType, error: OutboxError) -> OutboxError {
        if let Err(rb) = tx.rollback().await {
            tracing::warn!(event_type = %event_type, error = %rb, "rollback failed");
        }
        tracing::debug!(event_type = %event_type, error = %error, "domain write rolled back");
        error
    }

    async fn apply_all(
        &self,
        tx: &mut dyn StoreTx,
        mutations: &[Mutation],
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Result<ChangeEvent, OutboxError> {
        for mutation in mutations {
            tx.apply(mutation).await?;
        }
        self.recorder.record(tx, event_type, payload).await
    }
}

fn follow_counters(follower: UserId, followed: UserId, delta: i64) -> [Mutation; 2] {
    [
        Mutation::BumpUserCounter { user_id: follower, counter: UserCounter::Following, delta },
        Mutation::BumpUserCounter { user_id: followed, counter: UserCounter::Followers, delta },
    ]
}
