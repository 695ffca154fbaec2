//! In-memory implementations of every collaborator trait.
//!
//! Used by the server when no external engine is configured and as the
//! test doubles of the library crates: the broker records every send and
//! can be scripted to fail, the registry counts registrations.

mod broker;
mod graph;
mod registry;
mod store;

pub use broker::{FailurePlan, MemoryBroker, SendCall};
pub use graph::MemoryGraph;
pub use registry::MemorySchemaRegistry;
pub use store::MemoryStore;
