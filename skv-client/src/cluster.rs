//! # Cluster Topology
//!
//! Purpose: Track which nodes exist, whether they are healthy and which node
//! owns each partition, and answer "which node serves this key" in O(1).
//!
//! ## Design Principles
//! 1. **Snapshot Routing**: The routing table is an immutable `Arc` snapshot
//!    behind a `RwLock`; a refresh builds a new one off to the side and swaps
//!    it in, so readers never see a half-built table.
//! 2. **Serialized Refresh**: Background and on-demand refreshes take the same
//!    async mutex; at most one runs at a time.
//! 3. **Tolerate Blips**: A node that fails a refresh goes inactive; it is
//!    removed only after `failure_threshold` consecutive failures.
//! 4. **Weak Background Task**: The tend task holds a `Weak` handle and stops
//!    when the cluster is closed or dropped.
//!
//! ## State Machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> Refreshing
//!                                   |
//!                                   v
//!                                 Closed
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use skv_common::info;
use skv_common::{Host, Key, ProtocolError, PARTITIONS};

use crate::error::{ClientError, ClientResult};
use crate::node::{fetch_info, Node, NodeInfo, REFRESH_KEYS};
use crate::pool::{ConnectionPool, PoolConfig};

/// Keys requested from a node seen for the first time.
const HANDSHAKE_KEYS: [&str; 6] = [
    info::NODE,
    info::CLUSTER_NAME,
    info::FEATURES,
    info::PARTITION_GENERATION,
    info::PARTITIONS_KEY,
    info::PEERS,
];

/// Lifecycle state of the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Disconnected,
    Connecting,
    Connected,
    Refreshing,
    Closed,
}

/// Topology settings derived from `ClientConfig` and the default policy.
#[derive(Debug, Clone)]
pub(crate) struct ClusterConfig {
    pub seeds: Vec<Host>,
    pub cluster_name: Option<String>,
    pub max_connections_per_node: usize,
    pub max_idle_per_node: usize,
    pub connect_timeout: Duration,
    /// Bound on each info exchange.
    pub info_timeout: Duration,
    pub tend_interval: Duration,
    pub failure_threshold: u32,
}

/// Immutable routing snapshot.
#[derive(Default)]
struct Topology {
    nodes: Vec<Arc<Node>>,
    table: HashMap<String, Box<[Option<Arc<Node>>]>>,
}

impl Topology {
    /// Builds the partition table; active owners override inactive ones.
    fn build(nodes: Vec<Arc<Node>>) -> Self {
        let mut table: HashMap<String, Box<[Option<Arc<Node>>]>> = HashMap::new();
        let ordered = nodes
            .iter()
            .filter(|n| !n.is_active())
            .chain(nodes.iter().filter(|n| n.is_active()));
        for node in ordered {
            for (namespace, ids) in node.partitions().iter() {
                let slots = table
                    .entry(namespace.clone())
                    .or_insert_with(|| vec![None; PARTITIONS].into_boxed_slice());
                for id in ids {
                    slots[*id as usize] = Some(node.clone());
                }
            }
        }
        Topology { nodes, table }
    }

    fn node_for(&self, namespace: &str, partition_id: usize) -> Option<Arc<Node>> {
        self.table.get(namespace)?.get(partition_id)?.clone()
    }
}

/// Puts a cancelled refresh back to `Connected`.
struct RefreshGuard<'a> {
    state: &'a Mutex<ClusterState>,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if *state == ClusterState::Refreshing {
            *state = ClusterState::Connected;
        }
    }
}

/// Shared cluster handle used by the executor and batch coordinator.
pub struct Cluster {
    config: ClusterConfig,
    state: Mutex<ClusterState>,
    topology: RwLock<Arc<Topology>>,
    tend_lock: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
}

impl Cluster {
    /// Connects to the seeds, discovers peers and starts the tend task.
    ///
    /// # Errors
    /// - `ClusterIdentityMismatch` when any seed reports a different cluster
    ///   name than configured; no node set is installed.
    /// - The last seed failure (or `NotConnected`) when no node could be reached.
    pub(crate) async fn connect(config: ClusterConfig) -> ClientResult<Arc<Cluster>> {
        let (shutdown, _) = watch::channel(false);
        let cluster = Arc::new(Cluster {
            config,
            state: Mutex::new(ClusterState::Connecting),
            topology: RwLock::new(Arc::new(Topology::default())),
            tend_lock: tokio::sync::Mutex::new(()),
            shutdown,
        });

        let (mut nodes, peers) = match cluster.connect_seeds().await {
            Ok(found) => found,
            Err(err) => {
                *cluster.state.lock() = ClusterState::Disconnected;
                return Err(err);
            }
        };
        cluster.add_peers(&mut nodes, peers).await;

        info!(nodes = nodes.len(), "connected to cluster");
        *cluster.topology.write() = Arc::new(Topology::build(nodes));
        *cluster.state.lock() = ClusterState::Connected;
        spawn_tend(&cluster);
        Ok(cluster)
    }

    async fn connect_seeds(&self) -> ClientResult<(Vec<Arc<Node>>, Vec<Host>)> {
        let mut nodes: Vec<Arc<Node>> = Vec::new();
        let mut peers = Vec::new();
        let mut last_err = None;
        for seed in &self.config.seeds {
            match self.probe(seed).await {
                Ok((node, reported)) => {
                    peers.extend(reported);
                    add_unique(&mut nodes, node);
                }
                Err(err @ ClientError::ClusterIdentityMismatch { .. }) => {
                    warn!(seed = %seed, error = %err, "seed belongs to another cluster");
                    nodes.iter().for_each(|n| n.close());
                    return Err(err);
                }
                Err(err) => {
                    warn!(seed = %seed, error = %err, "seed unreachable");
                    last_err = Some(err);
                }
            }
        }
        if nodes.is_empty() {
            return Err(last_err.unwrap_or(ClientError::NotConnected));
        }
        Ok((nodes, peers))
    }

    /// Handshakes with `host`; returns its node and the peers it reports.
    async fn probe(&self, host: &Host) -> ClientResult<(Arc<Node>, Vec<Host>)> {
        let pool = ConnectionPool::new(PoolConfig {
            addr: host.to_string(),
            max_idle: self.config.max_idle_per_node,
            max_connections: self.config.max_connections_per_node,
            connect_timeout: self.config.connect_timeout,
        });
        let result = async {
            let values = fetch_info(&pool, &HANDSHAKE_KEYS, self.config.info_timeout).await?;
            let info = NodeInfo::parse(&values)?;
            self.check_identity(info.cluster_name.as_deref())?;
            Ok::<_, ClientError>(info)
        }
        .await;
        match result {
            Ok(mut info) => {
                debug!(node = %info.name, host = %host, "handshake complete");
                let peers = std::mem::take(&mut info.peers);
                Ok((Arc::new(Node::new(host.clone(), pool, info)), peers))
            }
            Err(err) => {
                pool.close();
                Err(err)
            }
        }
    }

    fn check_identity(&self, actual: Option<&str>) -> ClientResult<()> {
        match &self.config.cluster_name {
            Some(expected) if actual != Some(expected.as_str()) => {
                Err(ClientError::ClusterIdentityMismatch {
                    expected: expected.clone(),
                    actual: actual.unwrap_or_default().to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Probes reported peers, and the peers they report, until no new host
    /// appears. Mismatched or unreachable peers are skipped.
    async fn add_peers(&self, nodes: &mut Vec<Arc<Node>>, mut pending: Vec<Host>) {
        let mut tried: HashSet<Host> = nodes.iter().map(|n| n.host().clone()).collect();
        while let Some(host) = pending.pop() {
            if !tried.insert(host.clone()) {
                continue;
            }
            match self.probe(&host).await {
                Ok((node, reported)) => {
                    if nodes.iter().any(|n| n.name() == node.name()) {
                        node.close();
                        continue;
                    }
                    info!(node = %node.name(), host = %host, "discovered peer");
                    pending.extend(reported);
                    nodes.push(node);
                }
                Err(err @ ClientError::ClusterIdentityMismatch { .. }) => {
                    warn!(host = %host, error = %err, "skipping peer from another cluster");
                }
                Err(err) => {
                    debug!(host = %host, error = %err, "peer unreachable");
                }
            }
        }
    }

    /// Runs one refresh cycle now.
    ///
    /// Refreshes every node, retires nodes past the failure threshold, adds
    /// newly reported peers, falls back to the seeds when no node is left and
    /// swaps in the rebuilt routing table.
    pub async fn tend(&self) -> ClientResult<()> {
        let _guard = self.tend_lock.lock().await;
        {
            let mut state = self.state.lock();
            match *state {
                ClusterState::Closed | ClusterState::Disconnected | ClusterState::Connecting => {
                    return Err(ClientError::NotConnected)
                }
                _ => *state = ClusterState::Refreshing,
            }
        }
        let _refreshing = RefreshGuard { state: &self.state };

        let current = self.topology.read().clone();
        let results = join_all(current.nodes.iter().map(|node| self.refresh_node(node))).await;

        let mut nodes = Vec::with_capacity(current.nodes.len());
        let mut peers = Vec::new();
        for (node, result) in current.nodes.iter().zip(results) {
            match result {
                Ok(reported) => {
                    peers.extend(reported);
                    nodes.push(node.clone());
                }
                Err(err) => {
                    let failures = node.record_failure();
                    if failures >= self.config.failure_threshold {
                        warn!(node = %node.name(), failures, error = %err, "removing node");
                        node.close();
                    } else {
                        warn!(node = %node.name(), failures, error = %err, "node marked inactive");
                        nodes.push(node.clone());
                    }
                }
            }
        }

        self.add_peers(&mut nodes, peers).await;

        if nodes.is_empty() {
            debug!("no nodes left, retrying seeds");
            let mut reported = Vec::new();
            for seed in &self.config.seeds {
                match self.probe(seed).await {
                    Ok((node, peers)) => {
                        reported.extend(peers);
                        add_unique(&mut nodes, node);
                    }
                    Err(err) => debug!(seed = %seed, error = %err, "seed unreachable"),
                }
            }
            self.add_peers(&mut nodes, reported).await;
        }

        let topology = Arc::new(Topology::build(nodes));
        let mut state = self.state.lock();
        if *state == ClusterState::Closed {
            // Closed while refreshing; the new nodes must not leak.
            topology.nodes.iter().for_each(|n| n.close());
            return Err(ClientError::NotConnected);
        }
        *self.topology.write() = topology;
        *state = ClusterState::Connected;
        Ok(())
    }

    /// Refreshes one node and returns the peers it reports.
    async fn refresh_node(&self, node: &Arc<Node>) -> ClientResult<Vec<Host>> {
        let timeout = self.config.info_timeout;
        let values = node.info(&REFRESH_KEYS, timeout).await?;
        let mut info = NodeInfo::parse(&values)?;
        if info.name != node.name() {
            return Err(ProtocolError::Malformed("node name changed").into());
        }
        self.check_identity(info.cluster_name.as_deref())?;

        if info.partition_generation != node.partition_generation() {
            let values = node.info(&[info::PARTITIONS_KEY], timeout).await?;
            let partitions = values
                .get(info::PARTITIONS_KEY)
                .map(|p| info::parse_partitions(p))
                .transpose()?
                .unwrap_or_default();
            debug!(node = %node.name(), generation = ?info.partition_generation, "partition map changed");
            info.partitions = Some(partitions);
        }

        let peers = std::mem::take(&mut info.peers);
        node.apply_info(info);
        Ok(peers)
    }

    /// Node currently owning `key`'s partition.
    pub fn node_for(&self, key: &Key) -> ClientResult<Arc<Node>> {
        if *self.state.lock() == ClusterState::Closed {
            return Err(ClientError::NotConnected);
        }
        self.topology
            .read()
            .node_for(key.namespace(), key.partition_id())
            .ok_or(ClientError::NotConnected)
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.topology.read().nodes.clone()
    }

    pub fn state(&self) -> ClusterState {
        *self.state.lock()
    }

    /// True when connected with at least one active node.
    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ClusterState::Connected | ClusterState::Refreshing)
            && self.topology.read().nodes.iter().any(|n| n.is_active())
    }

    /// Stops the tend task, drops the routing table and closes every pool.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == ClusterState::Closed {
                return;
            }
            *state = ClusterState::Closed;
        }
        let _ = self.shutdown.send(true);
        let topology = std::mem::take(&mut *self.topology.write());
        topology.nodes.iter().for_each(|n| n.close());
        info!("cluster closed");
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.close();
    }
}

fn add_unique(nodes: &mut Vec<Arc<Node>>, node: Arc<Node>) {
    if nodes.iter().any(|n| n.name() == node.name()) {
        node.close();
    } else {
        nodes.push(node);
    }
}

fn spawn_tend(cluster: &Arc<Cluster>) {
    let weak: Weak<Cluster> = Arc::downgrade(cluster);
    let mut shutdown = cluster.shutdown.subscribe();
    let period = cluster.config.tend_interval;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; connect just refreshed.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            let Some(cluster) = weak.upgrade() else { break };
            if let Err(err) = cluster.tend().await {
                debug!(error = %err, "tend cycle failed");
            }
        }
        debug!("tend task stopped");
    });
}
