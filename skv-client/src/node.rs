//! # Cluster Node
//!
//! Purpose: One server process as seen by the client: its identity, health,
//! advertised features, owned partitions, connection pool and metrics.
//!
//! ## Design Principles
//! 1. **Single Writer**: Health and partition state change only from the
//!    topology refresh; command paths read them.
//! 2. **Lock-Free Health**: `active` and the failure streak are atomics so the
//!    hot path never blocks on a refresh.
//! 3. **Handshake Over Pool**: Info requests ride pooled connections, so the
//!    connection opened by the handshake is reused by the first command.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::RwLock;

use skv_common::info::{self, PartitionMap};
use skv_common::{encode_info_request, parse_info_response, Host, MessageKind, ProtocolError};

use crate::error::ClientResult;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::pool::ConnectionPool;

/// Keys requested on every refresh.
pub(crate) const REFRESH_KEYS: [&str; 5] = [
    info::NODE,
    info::CLUSTER_NAME,
    info::FEATURES,
    info::PARTITION_GENERATION,
    info::PEERS,
];

/// Parsed answer to an info request.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeInfo {
    pub name: String,
    pub cluster_name: Option<String>,
    pub features: BTreeSet<String>,
    pub partition_generation: Option<String>,
    pub partitions: Option<PartitionMap>,
    pub peers: Vec<Host>,
}

impl NodeInfo {
    pub fn parse(values: &BTreeMap<String, String>) -> ClientResult<Self> {
        let name = values
            .get(info::NODE)
            .filter(|name| !name.is_empty())
            .cloned()
            .ok_or(ProtocolError::Malformed("info reply without node name"))?;
        let cluster_name = values.get(info::CLUSTER_NAME).filter(|n| !n.is_empty()).cloned();
        let features = values
            .get(info::FEATURES)
            .map(|f| info::parse_features(f))
            .unwrap_or_default();
        let partitions = values
            .get(info::PARTITIONS_KEY)
            .map(|p| info::parse_partitions(p))
            .transpose()?;
        let peers = values
            .get(info::PEERS)
            .map(|p| info::parse_peers(p))
            .transpose()?
            .unwrap_or_default();
        Ok(NodeInfo {
            name,
            cluster_name,
            features,
            partition_generation: values.get(info::PARTITION_GENERATION).cloned(),
            partitions,
            peers,
        })
    }
}

/// Sends an info request over a pooled connection.
pub(crate) async fn fetch_info(
    pool: &ConnectionPool,
    names: &[&str],
    timeout: Duration,
) -> ClientResult<BTreeMap<String, String>> {
    let mut conn = pool.acquire(timeout).await?;
    let mut body = BytesMut::new();
    encode_info_request(names, &mut body);
    let reply = conn.exchange(MessageKind::Info, &body, timeout).await?;
    Ok(parse_info_response(&reply)?)
}

/// A cluster node.
pub struct Node {
    name: String,
    host: Host,
    pool: ConnectionPool,
    active: AtomicBool,
    failures: AtomicU32,
    features: RwLock<BTreeSet<String>>,
    partition_generation: RwLock<Option<String>>,
    partitions: RwLock<Arc<PartitionMap>>,
    metrics: Metrics,
}

impl Node {
    pub(crate) fn new(host: Host, pool: ConnectionPool, info: NodeInfo) -> Self {
        Node {
            name: info.name,
            host,
            pool,
            active: AtomicBool::new(true),
            failures: AtomicU32::new(0),
            features: RwLock::new(info.features),
            partition_generation: RwLock::new(info.partition_generation),
            partitions: RwLock::new(Arc::new(info.partitions.unwrap_or_default())),
            metrics: Metrics::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn host(&self) -> &Host {
        &self.host
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.read().contains(feature)
    }

    pub fn supports_durable_delete(&self) -> bool {
        self.has_feature(info::FEATURE_DURABLE_DELETE)
    }

    pub(crate) fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) fn partitions(&self) -> Arc<PartitionMap> {
        self.partitions.read().clone()
    }

    pub(crate) fn partition_generation(&self) -> Option<String> {
        self.partition_generation.read().clone()
    }

    pub(crate) async fn info(&self, names: &[&str], timeout: Duration) -> ClientResult<BTreeMap<String, String>> {
        fetch_info(&self.pool, names, timeout).await
    }

    /// Applies a successful refresh and clears the failure streak.
    pub(crate) fn apply_info(&self, info: NodeInfo) {
        *self.features.write() = info.features;
        if let Some(partitions) = info.partitions {
            *self.partitions.write() = Arc::new(partitions);
            *self.partition_generation.write() = info.partition_generation;
        }
        self.failures.store(0, Ordering::Release);
        self.active.store(true, Ordering::Release);
    }

    /// Marks the node inactive and returns the new failure streak.
    pub(crate) fn record_failure(&self) -> u32 {
        self.active.store(false, Ordering::Release);
        self.failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn close(&self) {
        self.active.store(false, Ordering::Release);
        self.pool.close();
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            name: self.name.clone(),
            host: self.host.clone(),
            active: self.is_active(),
            consecutive_failures: self.failures(),
            idle_connections: self.pool.idle_count(),
            in_use_connections: self.pool.in_use(),
            metrics: self.metrics.snapshot(),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Point-in-time view of a node, returned by `Client::stats`.
#[derive(Debug, Clone)]
pub struct NodeStats {
    pub name: String,
    pub host: Host,
    pub active: bool,
    pub consecutive_failures: u32,
    pub idle_connections: usize,
    pub in_use_connections: usize,
    pub metrics: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_full_handshake() {
        let info = NodeInfo::parse(&values(&[
            ("node", "A"),
            ("cluster-name", "prod"),
            ("features", "durable-delete"),
            ("partition-generation", "4"),
            ("partitions", "test:0-9"),
            ("peers", "127.0.0.1:4000"),
        ]))
        .unwrap();
        assert_eq!(info.name, "A");
        assert_eq!(info.cluster_name.as_deref(), Some("prod"));
        assert!(info.features.contains("durable-delete"));
        assert_eq!(info.partitions.unwrap()["test"].len(), 10);
        assert_eq!(info.peers, vec![Host::new("127.0.0.1", 4000)]);
    }

    #[test]
    fn missing_node_name_is_protocol_error() {
        let err = NodeInfo::parse(&values(&[("cluster-name", "x")])).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn refresh_without_partitions_keeps_old_map() {
        let pool = ConnectionPool::new(crate::pool::PoolConfig {
            addr: "127.0.0.1:1".into(),
            max_idle: 1,
            max_connections: 1,
            connect_timeout: Duration::from_millis(10),
        });
        let mut first = NodeInfo::parse(&values(&[("node", "A"), ("partitions", "test:1")])).unwrap();
        first.partition_generation = Some("1".into());
        let node = Node::new(Host::new("127.0.0.1", 1), pool, first);

        assert_eq!(node.record_failure(), 1);
        assert!(!node.is_active());

        let refresh = NodeInfo::parse(&values(&[("node", "A"), ("features", "durable-delete")])).unwrap();
        node.apply_info(refresh);
        assert!(node.is_active());
        assert_eq!(node.failures(), 0);
        assert!(node.supports_durable_delete());
        assert!(node.partitions()["test"].contains(&1));
        assert_eq!(node.partition_generation().as_deref(), Some("1"));
    }
}
