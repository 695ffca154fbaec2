//! Transactional outbox: domain writes that record their change event in
//! the same transaction, and the relay that drains the outbox into the broker.

mod engagement;
mod error;
mod recorder;
mod relay;

pub use engagement::EngagementService;
pub use error::OutboxError;
pub use recorder::OutboxRecorder;
pub use relay::{OutboxRelay, RelayReport, spawn_relay_task};
