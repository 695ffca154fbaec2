//! Shared domain types and collaborator traits.
//!
//! Every external engine (relational store, graph store, broker, schema
//! registry) is reached only through the object-safe traits defined here;
//! concrete adapters live under `plugins/`.

mod broker;
mod error;
mod graph;
mod store;
pub mod topic;
mod types;

pub use broker::{Producer, ProducerFactory, SchemaRegistry};
pub use error::{BackendError, ErrorKind};
pub use graph::{GraphCandidateSource, select_top_followed, sort_by_weight, top_fraction_len};
pub use store::{
    Mutation, OutboxSource, OutboxTx, PostCounter, PostStore, RelationalStore, StoreTx,
    UserCounter, ViewHistory,
};
pub use types::*;
