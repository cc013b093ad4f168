//! # ShardKV Reference Node
//!
//! Purpose: Provide a small in-memory node that speaks the ShardKV wire
//! protocol, for client integration tests and local development.
//!
//! ## Design Principles
//! 1. **Protocol Complete**: Info, command and batch frames are all served,
//!    with the record semantics clients depend on.
//! 2. **Controllable**: Ownership, peers, response delay and dropped frames
//!    can be changed while the node runs.
//! 3. **Not A Database**: No persistence and no replication; one process
//!    holds the records it was handed.

pub mod node;
pub mod store;

pub use node::{all_partitions, NodeConfig, NodeCounters, NodeServer};
pub use store::RecordStore;
