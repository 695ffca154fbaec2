//! Personalized feed: two-tier ranking over the weighted follow graph,
//! view-history filtering and hydration from the primary store.

mod error;
mod history;
mod hydrate;
mod ranker;
mod service;

pub use error::FeedError;
pub use history::ViewFilter;
pub use hydrate::FeedHydrator;
pub use ranker::{FeedRanker, RankerConfig, merge_and_rank};
pub use service::{Feed, FeedService};
