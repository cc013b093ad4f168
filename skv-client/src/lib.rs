//! # ShardKV Client
//!
//! Purpose: Provide an async client for a partitioned key-value cluster that
//! routes each record operation to the node owning the key's partition.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections per node; checkout is
//!    bounded by a semaphore and a timeout.
//! 2. **Snapshot Routing**: Partition lookups read an immutable table that a
//!    background refresh replaces wholesale.
//! 3. **Single Retry Classifier**: Only `ClientError::is_retryable` decides
//!    whether an attempt is repeated.
//! 4. **Layered Policy**: Defaults, construction-time overrides and call-site
//!    overrides merge per field; the merged policy is immutable.
//!
//! ## Quick Start
//!
//! ```no_run
//! use skv_client::{Bin, Client, ClientConfig, Key};
//!
//! # async fn demo() -> skv_client::ClientResult<()> {
//! let client = Client::connect(ClientConfig::new("127.0.0.1:3000")).await?;
//! let key = Key::new("test", "users", "alice")?;
//! client.put(&key, &[Bin::new("age", 30i64)], None).await?;
//! let record = client.get(&key, None, None).await?;
//! assert!(record.is_some());
//! client.close();
//! # Ok(())
//! # }
//! ```

mod batch;
mod client;
mod cluster;
mod command;
mod config;
mod error;
mod executor;
mod hosts;
mod metrics;
mod node;
mod operation;
mod policy;
mod pool;
mod record;

pub use batch::{BatchRead, MAX_BATCH_KEYS};
pub use client::Client;
pub use cluster::ClusterState;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use hosts::{resolve_hosts, HostSpec, FALLBACK_HOST, HOSTS_ENV};
pub use metrics::{LatencySnapshot, MetricsSnapshot};
pub use node::{Node, NodeStats};
pub use operation::{MapOpKind, MapOperation, Operation};
pub use policy::{
    BatchFailureMode, Expiration, GenerationPolicy, Policy, PolicyOverrides, RecordBinMultiplicity,
};
pub use record::Record;

pub use skv_common::{
    ArgumentError, Bin, Digest, Host, Key, MapReturnType, ProtocolError, ResultCode, UserKey, Value,
    DEFAULT_PORT,
};
