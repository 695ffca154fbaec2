//! Broker publishing: schema-id cache, named producer pool, bounded retry
//! with dead-letter fallback, and the media-processing job queue.

pub mod codec;
mod error;
pub mod media;
mod pool;
mod publisher;
mod retry;
mod schema_cache;

pub use codec::TopicSchema;
pub use error::PublishError;
pub use media::{MediaJob, MediaJobOutcome, MediaJobQueue};
pub use pool::ProducerPool;
pub use publisher::EventPublisher;
pub use retry::RetryPolicy;
pub use schema_cache::SchemaRegistryCache;
