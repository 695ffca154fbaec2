use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

use reelz_api::{
    BackendError, ChangeEvent, FollowStatus, HydratedPost, MediaItem, MediaUpload, Mutation,
    OutboxRow, OutboxSource, OutboxTx, PostCounter, PostId, PostRecord, PostStore,
    RelationalStore, StoreTx, UserCounter, UserId, UserSummary, ViewHistory,
};

// ═══════════════════════════════════════════════════════════════
//  Tables
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct UserRow {
    summary: UserSummary,
    is_private: bool,
    follower_count: i64,
    following_count: i64,
    post_count: i64,
}

#[derive(Debug, Clone)]
struct PostRow {
    user_id: UserId,
    caption: Option<String>,
    like_count: i64,
    comment_count: i64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CommentRow {
    post_id: PostId,
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, UserRow>,
    posts: HashMap<PostId, PostRow>,
    media: HashMap<PostId, Vec<MediaItem>>,
    likes: HashSet<(UserId, PostId)>,
    comments: HashMap<Uuid, CommentRow>,
    follows: HashMap<(UserId, UserId), FollowStatus>,
    /// Only unpublished rows; `mark_published` removes them.
    outbox: BTreeMap<i64, OutboxRow>,
    published: usize,
    next_outbox_id: i64,
}

/// Inverse of one applied statement, replayed newest first on rollback.
#[derive(Debug)]
enum Undo {
    RemoveUser(UserId),
    RemovePost(PostId),
    TruncateMedia { post_id: PostId, len: usize },
    RemoveLike(UserId, PostId),
    RemoveComment(Uuid),
    RemoveFollow(UserId, UserId),
    RestoreFollow(UserId, UserId, FollowStatus),
    PostCounter { post_id: PostId, counter: PostCounter, value: i64 },
    UserCounter { user_id: UserId, counter: UserCounter, value: i64 },
    RemoveOutbox(i64),
}

impl Tables {
    fn post_counter_mut(&mut self, id: PostId, counter: PostCounter) -> Result<&mut i64, BackendError> {
        let post = self
            .posts
            .get_mut(&id)
            .ok_or_else(|| BackendError::not_found(format!("post {id}")))?;
        Ok(match counter {
            PostCounter::Likes => &mut post.like_count,
            PostCounter::Comments => &mut post.comment_count,
        })
    }

    fn user_counter_mut(&mut self, id: UserId, counter: UserCounter) -> Result<&mut i64, BackendError> {
        let user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| BackendError::not_found(format!("user {id}")))?;
        Ok(match counter {
            UserCounter::Followers => &mut user.follower_count,
            UserCounter::Following => &mut user.following_count,
            UserCounter::Posts => &mut user.post_count,
        })
    }

    fn require_user(&self, id: UserId) -> Result<(), BackendError> {
        if self.users.contains_key(&id) {
            Ok(())
        } else {
            Err(BackendError::not_found(format!("user {id}")))
        }
    }

    fn require_post(&self, id: PostId) -> Result<(), BackendError> {
        if self.posts.contains_key(&id) {
            Ok(())
        } else {
            Err(BackendError::not_found(format!("post {id}")))
        }
    }

    /// Each mutation either applies fully and returns its inverse, or fails
    /// and leaves the tables untouched.
    fn apply(&mut self, mutation: &Mutation) -> Result<Undo, BackendError> {
        match mutation {
            Mutation::InsertUser { id, username, first_name, last_name, is_private } => {
                if self.users.contains_key(id) || self.users.values().any(|u| u.summary.username == *username) {
                    return Err(BackendError::constraint(format!("username '{username}' already taken")));
                }
                self.users.insert(*id, UserRow {
                    summary: UserSummary {
                        id: *id,
                        username: username.clone(),
                        first_name: first_name.clone(),
                        last_name: last_name.clone(),
                        profile_picture: None,
                    },
                    is_private: *is_private,
                    follower_count: 0,
                    following_count: 0,
                    post_count: 0,
                });
                Ok(Undo::RemoveUser(*id))
            }
            Mutation::InsertPost { id, user_id, caption } => {
                self.require_user(*user_id)?;
                if self.posts.contains_key(id) {
                    return Err(BackendError::constraint(format!("post {id} already exists")));
                }
                self.posts.insert(*id, PostRow {
                    user_id: *user_id,
                    caption: caption.clone(),
                    like_count: 0,
                    comment_count: 0,
                    created_at: Utc::now(),
                });
                Ok(Undo::RemovePost(*id))
            }
            Mutation::InsertMedia { post_id, items } => {
                self.require_post(*post_id)?;
                let now = Utc::now();
                let rows = self.media.entry(*post_id).or_default();
                let len = rows.len();
                rows.extend(items.iter().enumerate().map(|(i, item)| MediaItem {
                    id: Uuid::new_v4(),
                    media_url: item.url.clone(),
                    media_type: item.media_type.clone(),
                    position: (len + i) as i32 + 1,
                    updated_at: now,
                }));
                Ok(Undo::TruncateMedia { post_id: *post_id, len })
            }
            Mutation::InsertLike { user_id, post_id } => {
                self.require_user(*user_id)?;
                self.require_post(*post_id)?;
                if !self.likes.insert((*user_id, *post_id)) {
                    return Err(BackendError::constraint(format!("user {user_id} already liked post {post_id}")));
                }
                Ok(Undo::RemoveLike(*user_id, *post_id))
            }
            Mutation::InsertComment { id, user_id, post_id, parent_id, .. } => {
                self.require_user(*user_id)?;
                self.require_post(*post_id)?;
                if let Some(parent) = parent_id {
                    match self.comments.get(parent) {
                        Some(c) if c.post_id == *post_id => {}
                        _ => return Err(BackendError::not_found(format!("parent comment {parent}"))),
                    }
                }
                if self.comments.contains_key(id) {
                    return Err(BackendError::constraint(format!("comment {id} already exists")));
                }
                self.comments.insert(*id, CommentRow { post_id: *post_id });
                Ok(Undo::RemoveComment(*id))
            }
            Mutation::InsertFollow { follower, followed, status } => {
                self.require_user(*follower)?;
                self.require_user(*followed)?;
                if self.follows.contains_key(&(*follower, *followed)) {
                    return Err(BackendError::constraint(format!("user {follower} already follows {followed}")));
                }
                self.follows.insert((*follower, *followed), *status);
                Ok(Undo::RemoveFollow(*follower, *followed))
            }
            Mutation::DeleteFollow { follower, followed } => match self.follows.remove(&(*follower, *followed)) {
                Some(status) => Ok(Undo::RestoreFollow(*follower, *followed, status)),
                None => Err(BackendError::not_found(format!("follow {follower} -> {followed}"))),
            },
            Mutation::BumpPostCounter { post_id, counter, delta } => {
                let value = self.post_counter_mut(*post_id, *counter)?;
                let before = *value;
                *value = (before + delta).max(0);
                Ok(Undo::PostCounter { post_id: *post_id, counter: *counter, value: before })
            }
            Mutation::BumpUserCounter { user_id, counter, delta } => {
                let value = self.user_counter_mut(*user_id, *counter)?;
                let before = *value;
                *value = (before + delta).max(0);
                Ok(Undo::UserCounter { user_id: *user_id, counter: *counter, value: before })
            }
        }
    }

    fn insert_outbox(&mut self, event: &ChangeEvent) -> Undo {
        self.next_outbox_id += 1;
        let id = self.next_outbox_id;
        self.outbox.insert(id, OutboxRow { id, event: event.clone() });
        Undo::RemoveOutbox(id)
    }

    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::RemoveUser(id) => {
                self.users.remove(&id);
            }
            Undo::RemovePost(id) => {
                self.posts.remove(&id);
            }
            Undo::TruncateMedia { post_id, len } => {
                if len == 0 {
                    self.media.remove(&post_id);
                } else if let Some(rows) = self.media.get_mut(&post_id) {
                    rows.truncate(len);
                }
            }
            Undo::RemoveLike(user, post) => {
                self.likes.remove(&(user, post));
            }
            Undo::RemoveComment(id) => {
                self.comments.remove(&id);
            }
            Undo::RemoveFollow(follower, followed) => {
                self.follows.remove(&(follower, followed));
            }
            Undo::RestoreFollow(follower, followed, status) => {
                self.follows.insert((follower, followed), status);
            }
            Undo::PostCounter { post_id, counter, value } => {
                if let Ok(slot) = self.post_counter_mut(post_id, counter) {
                    *slot = value;
                }
            }
            Undo::UserCounter { user_id, counter, value } => {
                if let Ok(slot) = self.user_counter_mut(user_id, counter) {
                    *slot = value;
                }
            }
            // the sequence is not rewound, like a database sequence
            Undo::RemoveOutbox(id) => {
                self.outbox.remove(&id);
            }
        }
    }

    fn hydrate(&self, id: PostId) -> Option<HydratedPost> {
        let post = self.posts.get(&id)?;
        let user = self.users.get(&post.user_id)?;
        let mut media_items = self.media.get(&id).cloned().unwrap_or_default();
        media_items.sort_by_key(|m| m.position);
        Some(HydratedPost {
            post: PostRecord {
                id,
                user_id: post.user_id,
                caption: post.caption.clone(),
                like_count: post.like_count,
                comment_count: post.comment_count,
                created_at: post.created_at,
                media_items,
            },
            user: user.summary.clone(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

/// Транзакционное in-memory хранилище.
///
/// Транзакция держит эксклюзивную блокировку таблиц и пишет прямо в них,
/// запоминая обратную операцию для каждого statement'а. `commit` отпускает
/// блокировку, drop/`rollback` сначала проигрывает undo log в обратном
/// порядке. Транзакции сериализуются.
#[derive(Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    views: RwLock<HashMap<(UserId, PostId), DateTime<Utc>>>,
    fail_outbox: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent outbox insert fail with an I/O error.
    pub fn fail_outbox_inserts(&self, fail: bool) {
        self.fail_outbox.store(fail, Ordering::Release);
    }

    /// Unpublished outbox rows in id order.
    pub async fn outbox(&self) -> Vec<OutboxRow> {
        self.tables.read().await.outbox.values().cloned().collect()
    }

    /// Rows removed by `mark_published` so far.
    pub async fn published_count(&self) -> usize {
        self.tables.read().await.published
    }

    pub async fn post_counter(&self, post: PostId, counter: PostCounter) -> Option<i64> {
        let tables = self.tables.read().await;
        let row = tables.posts.get(&post)?;
        Some(match counter {
            PostCounter::Likes => row.like_count,
            PostCounter::Comments => row.comment_count,
        })
    }

    pub async fn user_counter(&self, user: UserId, counter: UserCounter) -> Option<i64> {
        let tables = self.tables.read().await;
        let row = tables.users.get(&user)?;
        Some(match counter {
            UserCounter::Followers => row.follower_count,
            UserCounter::Following => row.following_count,
            UserCounter::Posts => row.post_count,
        })
    }

    pub async fn like_count_rows(&self) -> usize {
        self.tables.read().await.likes.len()
    }

    pub async fn follow_status(&self, follower: UserId, followed: UserId) -> Option<FollowStatus> {
        self.tables.read().await.follows.get(&(follower, followed)).copied()
    }

    /// Insert a user directly, bypassing transactions and the outbox.
    pub async fn seed_user(&self, id: UserId, username: &str) {
        let mut tables = self.tables.write().await;
        tables.users.insert(id, UserRow {
            summary: UserSummary {
                id,
                username: username.to_string(),
                first_name: username.to_string(),
                last_name: String::new(),
                profile_picture: None,
            },
            is_private: false,
            follower_count: 0,
            following_count: 0,
            post_count: 0,
        });
    }

    /// Insert a post with an explicit creation time. Media get positions in
    /// the order given.
    pub async fn seed_post(
        &self,
        id: PostId,
        user_id: UserId,
        created_at: DateTime<Utc>,
        media: Vec<MediaUpload>,
    ) {
        let mut tables = self.tables.write().await;
        tables.posts.insert(id, PostRow {
            user_id,
            caption: None,
            like_count: 0,
            comment_count: 0,
            created_at,
        });
        let items = media
            .into_iter()
            .enumerate()
            .map(|(i, m)| MediaItem {
                id: Uuid::new_v4(),
                media_url: m.url,
                media_type: m.media_type,
                position: i as i32 + 1,
                updated_at: created_at,
            })
            .collect();
        tables.media.insert(id, items);
    }
}

impl RelationalStore for MemoryStore {
    fn begin(&self) -> Pin<Box<dyn Future<Output = Result<Box<dyn StoreTx>, BackendError>> + Send + '_>> {
        Box::pin(async move {
            let tables = self.tables.clone().write_owned().await;
            let tx: Box<dyn StoreTx> = Box::new(MemoryTx {
                tables,
                undo: Vec::new(),
                aborted: None,
                committed: false,
                fail_outbox: self.fail_outbox.clone(),
            });
            Ok(tx)
        })
    }
}

impl OutboxSource for MemoryStore {
    fn fetch_unpublished(&self, after: i64, limit: usize)
        -> Pin<Box<dyn Future<Output = Result<Vec<OutboxRow>, BackendError>> + Send + '_>>
    {
        Box::pin(async move {
            let tables = self.tables.read().await;
            Ok(tables
                .outbox
                .range(after.saturating_add(1)..)
                .take(limit)
                .map(|(_, row)| row.clone())
                .collect())
        })
    }

    fn mark_published<'a>(&'a self, ids: &'a [i64])
        -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            for id in ids {
                if tables.outbox.remove(id).is_some() {
                    tables.published += 1;
                }
            }
            Ok(())
        })
    }
}

impl PostStore for MemoryStore {
    fn load_posts<'a>(&'a self, ids: &'a [PostId])
        -> Pin<Box<dyn Future<Output = Result<Vec<HydratedPost>, BackendError>> + Send + 'a>>
    {
        Box::pin(async move {
            let tables = self.tables.read().await;
            Ok(ids.iter().filter_map(|id| tables.hydrate(*id)).collect())
        })
    }
}

impl ViewHistory for MemoryStore {
    fn viewed_since<'a>(
        &'a self,
        user: UserId,
        posts: &'a [PostId],
        since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<HashSet<PostId>, BackendError>> + Send + 'a>> {
        Box::pin(async move {
            let views = self.views.read().await;
            Ok(posts
                .iter()
                .filter(|p| views.get(&(user, **p)).is_some_and(|at| *at >= since))
                .copied()
                .collect())
        })
    }

    fn mark_viewed(&self, user: UserId, post: PostId, at: DateTime<Utc>)
        -> Pin<Box<dyn Future<Output = Result<bool, BackendError>> + Send + '_>>
    {
        Box::pin(async move {
            let mut views = self.views.write().await;
            if views.contains_key(&(user, post)) {
                return Ok(false);
            }
            views.insert((user, post), at);
            Ok(true)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryTx
// ═══════════════════════════════════════════════════════════════

struct MemoryTx {
    tables: OwnedRwLockWriteGuard<Tables>,
    undo: Vec<Undo>,
    /// First failed statement; a failed transaction can only roll back.
    aborted: Option<BackendError>,
    committed: bool,
    fail_outbox: Arc<AtomicBool>,
}

impl MemoryTx {
    fn check_open(&self) -> Result<(), BackendError> {
        match &self.aborted {
            Some(e) => Err(BackendError::constraint(format!("transaction aborted: {e}"))),
            None => Ok(()),
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        while let Some(undo) = self.undo.pop() {
            self.tables.revert(undo);
        }
    }
}

impl OutboxTx for MemoryTx {
    fn insert_outbox<'a>(&'a mut self, event: &'a ChangeEvent)
        -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + 'a>>
    {
        Box::pin(async move {
            self.check_open()?;
            if self.fail_outbox.load(Ordering::Acquire) {
                let err = BackendError::io("outbox insert failed");
                self.aborted = Some(err.clone());
                return Err(err);
            }
            let undo = self.tables.insert_outbox(event);
            self.undo.push(undo);
            Ok(())
        })
    }
}

impl StoreTx for MemoryTx {
    fn apply<'a>(&'a mut self, mutation: &'a Mutation)
        -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + 'a>>
    {
        Box::pin(async move {
            self.check_open()?;
            match self.tables.apply(mutation) {
                Ok(undo) => {
                    self.undo.push(undo);
                    Ok(())
                }
                Err(e) => {
                    self.aborted = Some(e.clone());
                    Err(e)
                }
            }
        })
    }

    fn user_is_private(&mut self, user: UserId)
        -> Pin<Box<dyn Future<Output = Result<bool, BackendError>> + Send + '_>>
    {
        Box::pin(async move {
            self.check_open()?;
            self.tables
                .users
                .get(&user)
                .map(|u| u.is_private)
                .ok_or_else(|| BackendError::not_found(format!("user {user}")))
        })
    }

    fn follow_status(&mut self, follower: UserId, followed: UserId)
        -> Pin<Box<dyn Future<Output = Result<Option<FollowStatus>, BackendError>> + Send + '_>>
    {
        Box::pin(async move {
            self.check_open()?;
            Ok(self.tables.follows.get(&(follower, followed)).copied())
        })
    }

    fn commit(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send>> {
        Box::pin(async move {
            self.check_open()?;
            self.committed = true;
            self.undo.clear();
            Ok(())
        })
    }

    fn rollback(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send>> {
        Box::pin(async move {
            drop(self);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelz_api::EventType;

    async fn user(store: &MemoryStore) -> UserId {
        let id = UserId::new();
        store.seed_user(id, &format!("u-{id}")).await;
        id
    }

    fn event() -> ChangeEvent {
        ChangeEvent::new(EventType::PostCreated, serde_json::json!({}))
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let store = MemoryStore::new();
        let author = user(&store).await;
        let post = PostId::new();

        let mut tx = store.begin().await.unwrap();
        tx.apply(&Mutation::InsertPost { id: post, user_id: author, caption: None }).await.unwrap();
        tx.insert_outbox(&event()).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.load_posts(&[post]).await.unwrap().is_empty());
        assert!(store.outbox().await.is_empty());
    }

    #[tokio::test]
    async fn dropped_transaction_restores_counters_and_follows() {
        let store = MemoryStore::new();
        let (a, b) = (user(&store).await, user(&store).await);

        let mut tx = store.begin().await.unwrap();
        tx.apply(&Mutation::InsertFollow { follower: a, followed: b, status: FollowStatus::Follows })
            .await
            .unwrap();
        tx.apply(&Mutation::BumpUserCounter { user_id: b, counter: UserCounter::Followers, delta: 1 })
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.apply(&Mutation::DeleteFollow { follower: a, followed: b }).await.unwrap();
        tx.apply(&Mutation::BumpUserCounter { user_id: b, counter: UserCounter::Followers, delta: -1 })
            .await
            .unwrap();
        assert_eq!(tx.follow_status(a, b).await.unwrap(), None);
        drop(tx);

        assert_eq!(store.follow_status(a, b).await, Some(FollowStatus::Follows));
        assert_eq!(store.user_counter(b, UserCounter::Followers).await, Some(1));
    }

    #[tokio::test]
    async fn duplicate_like_aborts_transaction() {
        let store = MemoryStore::new();
        let author = user(&store).await;
        let post = PostId::new();
        store.seed_post(post, author, Utc::now(), Vec::new()).await;

        let like = Mutation::InsertLike { user_id: author, post_id: post };
        let mut tx = store.begin().await.unwrap();
        tx.apply(&like).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.apply(&Mutation::BumpPostCounter { post_id: post, counter: PostCounter::Likes, delta: 1 })
            .await
            .unwrap();
        let err = tx.apply(&like).await.unwrap_err();
        assert_eq!(err.kind(), reelz_api::ErrorKind::Constraint);
        assert!(tx.commit().await.is_err());
        assert_eq!(store.like_count_rows().await, 1);
        assert_eq!(store.post_counter(post, PostCounter::Likes).await, Some(0));
    }

    #[tokio::test]
    async fn media_positions_start_at_one() {
        let store = MemoryStore::new();
        let author = user(&store).await;
        let post = PostId::new();
        let media = |url: &str| MediaUpload { url: url.into(), media_type: "image".into() };

        let mut tx = store.begin().await.unwrap();
        tx.apply(&Mutation::InsertPost { id: post, user_id: author, caption: Some("hi".into()) }).await.unwrap();
        tx.apply(&Mutation::InsertMedia { post_id: post, items: vec![media("a"), media("b")] }).await.unwrap();
        tx.commit().await.unwrap();

        let loaded = store.load_posts(&[post]).await.unwrap();
        let positions: Vec<i32> = loaded[0].post.media_items.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![1, 2]);
        assert_eq!(loaded[0].post.media_items[0].media_url, "a");
    }

    #[tokio::test]
    async fn published_rows_are_pruned() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            let mut tx = store.begin().await.unwrap();
            tx.insert_outbox(&event()).await.unwrap();
            tx.commit().await.unwrap();
        }

        let ids: Vec<i64> = store.fetch_unpublished(0, 10).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        store.mark_published(&ids[..2]).await.unwrap();

        assert_eq!(store.published_count().await, 2);
        let left = store.outbox().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, 3);
    }

    #[tokio::test]
    async fn fetch_starts_after_cursor() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for _ in 0..4 {
            tx.insert_outbox(&event()).await.unwrap();
        }
        tx.commit().await.unwrap();

        let page: Vec<i64> = store.fetch_unpublished(2, 1).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(page, vec![3]);
        assert!(store.fetch_unpublished(4, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn views_are_append_only() {
        let store = MemoryStore::new();
        let (u, p) = (UserId::new(), PostId::new());
        let t0 = Utc::now();
        assert!(store.mark_viewed(u, p, t0).await.unwrap());
        assert!(!store.mark_viewed(u, p, t0 + chrono::Duration::hours(1)).await.unwrap());

        let seen = store.viewed_since(u, &[p], t0).await.unwrap();
        assert!(seen.contains(&p));
        let seen = store.viewed_since(u, &[p], t0 + chrono::Duration::minutes(1)).await.unwrap();
        assert!(seen.is_empty());
    }
}
