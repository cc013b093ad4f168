// skv-common - Shared types and protocol definitions for ShardKV
//
// This crate defines the data model and the wire protocol spoken between
// the client and cluster nodes.

pub mod cdt;
pub mod error;
pub mod info;
pub mod particle;
pub mod protocol;
pub mod types;
pub mod value;

// Re-export for convenience
pub use cdt::*;
pub use error::*;
pub use protocol::*;
pub use types::*;
pub use value::*;
