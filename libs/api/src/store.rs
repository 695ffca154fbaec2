use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{BackendError, ChangeEvent, FollowStatus, HydratedPost, MediaUpload, OutboxRow, PostId, UserId};

// ════════════════════════════════════════════════════════════════
//  Mutations
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCounter {
    Likes,
    Comments,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCounter {
    Followers,
    Following,
    Posts,
}

/// Бизнес-мутация первичного хранилища. Применяется внутри транзакции
/// через `StoreTx::apply`.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    InsertUser {
        id: UserId,
        username: String,
        first_name: String,
        last_name: String,
        is_private: bool,
    },
    InsertPost {
        id: PostId,
        user_id: UserId,
        caption: Option<String>,
    },
    /// Media rows at positions `1..=items.len()`.
    InsertMedia {
        post_id: PostId,
        items: Vec<MediaUpload>,
    },
    /// Unique per (user, post); a duplicate is a `Constraint` error.
    InsertLike {
        user_id: UserId,
        post_id: PostId,
    },
    InsertComment {
        id: Uuid,
        user_id: UserId,
        post_id: PostId,
        text: String,
        parent_id: Option<Uuid>,
    },
    /// Relational mirror of a follow or a pending request; unique per
    /// (follower, followed) whatever the status.
    InsertFollow {
        follower: UserId,
        followed: UserId,
        status: FollowStatus,
    },
    /// Fails with `NotFound` when neither a follow nor a request exists.
    DeleteFollow {
        follower: UserId,
        followed: UserId,
    },
    BumpPostCounter {
        post_id: PostId,
        counter: PostCounter,
        delta: i64,
    },
    BumpUserCounter {
        user_id: UserId,
        counter: UserCounter,
        delta: i64,
    },
}

// ════════════════════════════════════════════════════════════════
//  Transactional store traits
// ════════════════════════════════════════════════════════════════

/// Открытая транзакция, в которую можно дописать outbox-событие.
///
/// Реализация никогда не коммитит сама: границу транзакции
/// контролирует вызывающий код.
pub trait OutboxTx: Send {
    /// Вставить одну строку outbox в текущую транзакцию.
    fn insert_outbox<'a>(&'a mut self, event: &'a ChangeEvent)
        -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + 'a>>;
}

/// Request-scoped transaction on the primary store. Dropping it without
/// `commit` discards every write.
pub trait StoreTx: OutboxTx {
    fn apply<'a>(&'a mut self, mutation: &'a Mutation)
        -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + 'a>>;

    /// `is_private` flag of a user, read inside the transaction.
    /// `NotFound` for an unknown user.
    fn user_is_private(&mut self, user: UserId)
        -> Pin<Box<dyn Future<Output = Result<bool, BackendError>> + Send + '_>>;

    /// Current relation follower → followed, if any.
    fn follow_status(&mut self, follower: UserId, followed: UserId)
        -> Pin<Box<dyn Future<Output = Result<Option<FollowStatus>, BackendError>> + Send + '_>>;

    fn commit(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send>>;

    fn rollback(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send>>;
}

/// Primary relational store: hands out transactions.
pub trait RelationalStore: Send + Sync {
    fn begin(&self) -> Pin<Box<dyn Future<Output = Result<Box<dyn StoreTx>, BackendError>> + Send + '_>>;
}

/// Чтение outbox для relay: неопубликованные строки в порядке id.
pub trait OutboxSource: Send + Sync {
    /// Up to `limit` unpublished rows with `id > after`, ascending.
    fn fetch_unpublished(&self, after: i64, limit: usize)
        -> Pin<Box<dyn Future<Output = Result<Vec<OutboxRow>, BackendError>> + Send + '_>>;

    fn mark_published<'a>(&'a self, ids: &'a [i64])
        -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + 'a>>;
}

// ════════════════════════════════════════════════════════════════
//  Read-side traits
// ════════════════════════════════════════════════════════════════

/// Загрузка полных записей постов (post + author + media).
/// Порядок результата не гарантируется; отсутствующие id пропускаются.
pub trait PostStore: Send + Sync {
    fn load_posts<'a>(&'a self, ids: &'a [PostId])
        -> Pin<Box<dyn Future<Output = Result<Vec<HydratedPost>, BackendError>> + Send + 'a>>;
}

/// Append-only view history.
pub trait ViewHistory: Send + Sync {
    /// Subset of `posts` the user viewed at or after `since`.
    fn viewed_since<'a>(
        &'a self,
        user: UserId,
        posts: &'a [PostId],
        since: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<HashSet<PostId>, BackendError>> + Send + 'a>>;

    /// Record a view. Returns `false` when the (user, post) mark already existed.
    fn mark_viewed(&self, user: UserId, post: PostId, at: DateTime<Utc>)
        -> Pin<Box<dyn Future<Output = Result<bool, BackendError>> + Send + '_>>;
}
