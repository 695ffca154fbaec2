use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BackendError;

// ════════════════════════════════════════════════════════════════
//  Identifiers
// ════════════════════════════════════════════════════════════════

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = BackendError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| BackendError::format_err(format!("{}: {e}", stringify!($name))))
            }
        }
    };
}

uuid_id!(UserId);
uuid_id!(PostId);

// ════════════════════════════════════════════════════════════════
//  Change events (outbox rows)
// ════════════════════════════════════════════════════════════════

/// Тип доменного события. Имя варианта является суффиксом topic'а `app_events_{EventType}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    UserCreated,
    PostCreated,
    PostLiked,
    PostCommented,
    UserFollowed,
    /// Follow of a private account, pending approval. Not a graph edge.
    FollowRequested,
    UserUnfollowed,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::UserCreated,
        EventType::PostCreated,
        EventType::PostLiked,
        EventType::PostCommented,
        EventType::UserFollowed,
        EventType::FollowRequested,
        EventType::UserUnfollowed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserCreated => "UserCreated",
            EventType::PostCreated => "PostCreated",
            EventType::PostLiked => "PostLiked",
            EventType::PostCommented => "PostCommented",
            EventType::UserFollowed => "UserFollowed",
            EventType::FollowRequested => "FollowRequested",
            EventType::UserUnfollowed => "UserUnfollowed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| BackendError::format_err(format!("unknown event type '{s}'")))
    }
}

/// Событие изменения, записываемое в outbox в той же транзакции,
/// что и бизнес-мутация. Неизменяемо после записи.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self { event_type, payload, created_at: Utc::now() }
    }
}

/// Outbox row as seen by the relay: the stored event plus its sequence id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRow {
    pub id: i64,
    #[serde(flatten)]
    pub event: ChangeEvent,
}

// ════════════════════════════════════════════════════════════════
//  Social graph
// ════════════════════════════════════════════════════════════════

/// Initial weight of a freshly created follow edge. Later values come from
/// an out-of-band job and are treated as opaque input.
pub const BOOTSTRAP_FOLLOW_WEIGHT: f64 = 0.1;

/// Направленное ребро подписки с весом близости.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowEdge {
    pub from: UserId,
    pub to: UserId,
    pub weight: f64,
    pub created_at: DateTime<Utc>,
}

impl FollowEdge {
    /// New edge with the bootstrap weight. Self-edges are rejected.
    pub fn new(from: UserId, to: UserId) -> Result<Self, BackendError> {
        Self::with_weight(from, to, BOOTSTRAP_FOLLOW_WEIGHT)
    }

    pub fn with_weight(from: UserId, to: UserId, weight: f64) -> Result<Self, BackendError> {
        if from == to {
            return Err(BackendError::constraint(format!("user {from} cannot follow itself")));
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(BackendError::constraint(format!("invalid follow weight {weight}")));
        }
        Ok(Self { from, to, weight, created_at: Utc::now() })
    }
}

/// Состояние связи follower → followed в первичном хранилище.
/// Подписка на приватный аккаунт сначала живёт как `Requested`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FollowStatus {
    Follows,
    Requested,
}

impl FollowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowStatus::Follows => "FOLLOWS",
            FollowStatus::Requested => "REQUESTED",
        }
    }
}

impl std::str::FromStr for FollowStatus {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FOLLOWS" => Ok(FollowStatus::Follows),
            "REQUESTED" => Ok(FollowStatus::Requested),
            other => Err(BackendError::format_err(format!("unknown follow status '{other}'"))),
        }
    }
}

/// Result of a follow request. Counters move only for `Follows`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowOutcome {
    pub status: FollowStatus,
    pub edge: FollowEdge,
}

/// `(followedUserId, weight)` as returned by the candidate source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FollowedAuthor {
    pub user_id: UserId,
    pub weight: f64,
}

/// A post authored inside the requested window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentPost {
    pub post_id: PostId,
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Кандидат в ленту, живёт только в рамках одного запроса.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidatePost {
    pub post_id: PostId,
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
    pub source_weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredPost {
    pub post_id: PostId,
    pub author_id: UserId,
    pub score: f64,
    pub created_at: DateTime<Utc>,
}

// ════════════════════════════════════════════════════════════════
//  Broker wire form
// ════════════════════════════════════════════════════════════════

pub type Headers = BTreeMap<String, String>;

/// Сообщение в wire-форме для broker'а. Не хранится после отправки.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboxMessage {
    pub key: Option<String>,
    pub value: Vec<u8>,
    pub headers: Headers,
    pub partition: Option<i32>,
}

impl OutboxMessage {
    pub fn new(value: Vec<u8>) -> Self {
        Self { value, ..Self::default() }
    }

    /// JSON-encoded value.
    pub fn json(value: &serde_json::Value) -> Result<Self, BackendError> {
        Ok(Self::new(serde_json::to_vec(value)?))
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Terminal state of a successful `publish_batch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    DeadLettered,
}

// ════════════════════════════════════════════════════════════════
//  Hydrated feed records
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub media_url: String,
    pub media_type: String,
    pub position: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    #[serde(rename = "_id")]
    pub id: PostId,
    pub user_id: UserId,
    pub caption: Option<String>,
    pub like_count: i64,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    /// Ordered by `position`.
    pub media_items: Vec<MediaItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub profile_picture: Option<String>,
}

/// Post row joined with its author, as loaded from the primary store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydratedPost {
    pub post: PostRecord,
    pub user: UserSummary,
}

/// One entry of the feed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub post: PostRecord,
    pub user: UserSummary,
    pub relevance_score: f64,
}

// ════════════════════════════════════════════════════════════════
//  OneOrMany
// ════════════════════════════════════════════════════════════════

/// Один элемент или список. Разрешается один раз на границе,
/// дальше код работает с однородной последовательностью.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    SingleItem(T),
    MultipleItems(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::SingleItem(item) => vec![item],
            OneOrMany::MultipleItems(items) => items,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            OneOrMany::SingleItem(_) => 1,
            OneOrMany::MultipleItems(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A media file attached to a new post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaUpload {
    pub url: String,
    pub media_type: String,
}
