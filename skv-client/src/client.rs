//! # Client API
//!
//! Purpose: Expose record-level operations against a ShardKV cluster behind
//! one handle that owns the topology, the per-node pools and the default
//! policy.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides routing, pooling and framing; each
//!    call resolves its policy, builds a message and hands it to the executor.
//! 2. **Explicit Handle**: No global state; clones share one cluster and the
//!    last clone dropped stops the background refresh.
//! 3. **Absence Is Not An Error**: Reads, `exists` and `delete` report a
//!    missing record as `None`/`false`; every other call surfaces it.
//! 4. **Validate Before I/O**: Argument errors are returned before a node is
//!    chosen.

use std::sync::Arc;

use tracing::info;

use skv_common::{Bin, Key, OpCode, ResultCode};

use crate::batch::{execute_batch, BatchRead};
use crate::cluster::{Cluster, ClusterConfig, ClusterState};
use crate::command::{self, check_result, record_from_reply};
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::executor::execute;
use crate::hosts::resolve_hosts_from_env;
use crate::node::{Node, NodeStats};
use crate::operation::Operation;
use crate::policy::{Policy, PolicyOverrides};
use crate::record::Record;

/// Handle to a connected cluster.
///
/// Cheap to clone; clones share the topology and the connection pools.
#[derive(Clone)]
pub struct Client {
    cluster: Arc<Cluster>,
    defaults: Policy,
}

impl Client {
    /// Resolves seed hosts, discovers the cluster and starts the background
    /// refresh.
    ///
    /// # Errors
    /// `InvalidArgument` for a bad config or host list, `ClusterIdentityMismatch`
    /// when a seed reports another cluster name, or the last seed's connection
    /// error when no seed answers.
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let seeds = resolve_hosts_from_env(config.hosts.as_ref())?;
        let defaults = Policy::resolve(&Policy::default(), &config.policy, None)?;

        let cluster = Cluster::connect(ClusterConfig {
            seeds,
            cluster_name: defaults.cluster_name.clone(),
            max_connections_per_node: config.max_connections_per_node,
            max_idle_per_node: config.max_idle_per_node,
            connect_timeout: config.connect_timeout,
            info_timeout: defaults.timeout,
            tend_interval: config.tend_interval,
            failure_threshold: config.failure_threshold,
        })
        .await?;
        info!(nodes = cluster.nodes().len(), "client connected");
        Ok(Client { cluster, defaults })
    }

    /// The construction-time policy every call starts from.
    pub fn default_policy(&self) -> &Policy {
        &self.defaults
    }

    fn policy(&self, call: Option<&PolicyOverrides>) -> ClientResult<Policy> {
        let policy = match call {
            Some(call) => Policy::resolve(&self.defaults, &PolicyOverrides::default(), Some(call))?,
            None => self.defaults.clone(),
        };
        Ok(policy)
    }

    /// Writes `bins`; a `Nil` value removes that bin.
    pub async fn put(&self, key: &Key, bins: &[Bin], policy: Option<&PolicyOverrides>) -> ClientResult<()> {
        self.write(key, OpCode::Write, bins, policy).await
    }

    /// Appends to string or blob bins.
    pub async fn append(&self, key: &Key, bins: &[Bin], policy: Option<&PolicyOverrides>) -> ClientResult<()> {
        self.write(key, OpCode::Append, bins, policy).await
    }

    /// Prepends to string or blob bins.
    pub async fn prepend(&self, key: &Key, bins: &[Bin], policy: Option<&PolicyOverrides>) -> ClientResult<()> {
        self.write(key, OpCode::Prepend, bins, policy).await
    }

    /// Adds to integer or float bins; a missing bin starts from the operand.
    pub async fn add(&self, key: &Key, bins: &[Bin], policy: Option<&PolicyOverrides>) -> ClientResult<()> {
        self.write(key, OpCode::Add, bins, policy).await
    }

    async fn write(
        &self,
        key: &Key,
        op: OpCode,
        bins: &[Bin],
        policy: Option<&PolicyOverrides>,
    ) -> ClientResult<()> {
        let policy = self.policy(policy)?;
        let message = command::write_bins(key, &policy, op, bins)?;
        let reply = execute(&self.cluster, key, &message, &policy).await?;
        check_result(reply.result())
    }

    /// Reads every bin, or only `bins` when given. `None` if the record does
    /// not exist.
    pub async fn get(
        &self,
        key: &Key,
        bins: Option<&[&str]>,
        policy: Option<&PolicyOverrides>,
    ) -> ClientResult<Option<Record>> {
        let policy = self.policy(policy)?;
        let message = command::read(key, &policy, bins)?;
        let reply = execute(&self.cluster, key, &message, &policy).await?;
        match reply.result() {
            ResultCode::KeyNotFound => Ok(None),
            code => {
                check_result(code)?;
                Ok(Some(record_from_reply(key, reply, policy.record_bin_multiplicity)))
            }
        }
    }

    /// Reads generation and expiration without bins.
    pub async fn get_header(&self, key: &Key, policy: Option<&PolicyOverrides>) -> ClientResult<Option<Record>> {
        let policy = self.policy(policy)?;
        let message = command::read_header(key, &policy)?;
        let reply = execute(&self.cluster, key, &message, &policy).await?;
        match reply.result() {
            ResultCode::KeyNotFound => Ok(None),
            code => {
                check_result(code)?;
                Ok(Some(record_from_reply(key, reply, policy.record_bin_multiplicity)))
            }
        }
    }

    pub async fn exists(&self, key: &Key, policy: Option<&PolicyOverrides>) -> ClientResult<bool> {
        Ok(self.get_header(key, policy).await?.is_some())
    }

    /// Returns whether a record was removed.
    ///
    /// # Errors
    /// `CapabilityUnsupported` when the policy asks for a durable delete and
    /// the owning node does not advertise it.
    pub async fn delete(&self, key: &Key, policy: Option<&PolicyOverrides>) -> ClientResult<bool> {
        let policy = self.policy(policy)?;
        let message = command::delete(key, &policy)?;
        let reply = execute(&self.cluster, key, &message, &policy).await?;
        match reply.result() {
            ResultCode::KeyNotFound => Ok(false),
            code => check_result(code).map(|_| true),
        }
    }

    /// Bumps the generation and resets expiration from the policy.
    pub async fn touch(&self, key: &Key, policy: Option<&PolicyOverrides>) -> ClientResult<()> {
        let policy = self.policy(policy)?;
        let message = command::touch(key, &policy)?;
        let reply = execute(&self.cluster, key, &message, &policy).await?;
        check_result(reply.result())
    }

    /// Applies `ops` in order against one record and returns what the read
    /// and map operations produced.
    pub async fn operate(
        &self,
        key: &Key,
        ops: &[Operation],
        policy: Option<&PolicyOverrides>,
    ) -> ClientResult<Record> {
        let policy = self.policy(policy)?;
        let message = command::operate(key, &policy, ops)?;
        let reply = execute(&self.cluster, key, &message, &policy).await?;
        check_result(reply.result())?;
        Ok(record_from_reply(key, reply, policy.record_bin_multiplicity))
    }

    /// One flag per key, in input order.
    pub async fn batch_exists(&self, keys: &[Key], policy: Option<&PolicyOverrides>) -> ClientResult<Vec<bool>> {
        let policy = self.policy(policy)?;
        let records = execute_batch(&self.cluster, keys, &BatchRead::Exists, &policy).await?;
        Ok(records.iter().map(Option::is_some).collect())
    }

    /// One slot per key, in input order; missing records are `None`.
    pub async fn batch_get(
        &self,
        keys: &[Key],
        bins: Option<&[&str]>,
        policy: Option<&PolicyOverrides>,
    ) -> ClientResult<Vec<Option<Record>>> {
        let policy = self.policy(policy)?;
        let read = match bins {
            None => BatchRead::All,
            Some(names) => BatchRead::Bins(names.iter().map(|name| name.to_string()).collect()),
        };
        execute_batch(&self.cluster, keys, &read, &policy).await
    }

    pub async fn batch_get_header(
        &self,
        keys: &[Key],
        policy: Option<&PolicyOverrides>,
    ) -> ClientResult<Vec<Option<Record>>> {
        let policy = self.policy(policy)?;
        execute_batch(&self.cluster, keys, &BatchRead::Header, &policy).await
    }

    /// Refreshes the topology now instead of waiting for the next tick.
    pub async fn refresh(&self) -> ClientResult<()> {
        self.cluster.tend().await
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.cluster.nodes()
    }

    pub fn stats(&self) -> Vec<NodeStats> {
        self.cluster.nodes().iter().map(|node| node.stats()).collect()
    }

    pub fn state(&self) -> ClusterState {
        self.cluster.state()
    }

    pub fn is_connected(&self) -> bool {
        self.cluster.is_connected()
    }

    /// Stops the background refresh and closes every pool. Idempotent; later
    /// calls fail with `NotConnected`.
    pub fn close(&self) {
        self.cluster.close();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.cluster.state())
            .field("nodes", &self.cluster.nodes().len())
            .finish()
    }
}
