//! Multi-node cluster harness shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Once;
use std::time::Duration;

use skv_client::{Client, ClientConfig, HostSpec, Key, PolicyOverrides};
use skv_common::PARTITIONS;
use skv_server::{NodeConfig, NodeServer};

pub const NAMESPACE: &str = "test";
pub const SET: &str = "itest";
pub const CLUSTER: &str = "itest-cluster";

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Contiguous slice `index` of `count` over the partition space.
pub fn partition_slice(index: usize, count: usize) -> BTreeSet<u16> {
    let per = PARTITIONS / count;
    let start = index * per;
    let end = if index + 1 == count { PARTITIONS } else { start + per };
    (start as u16..end as u16).collect()
}

pub struct TestCluster {
    pub nodes: Vec<NodeServer>,
}

impl TestCluster {
    /// `count` nodes splitting the test namespace, each listing the others
    /// as peers.
    pub async fn start(count: usize) -> Self {
        Self::start_with(count, |_, config| config).await
    }

    /// Like `start`, with a hook to adjust each node's config.
    pub async fn start_with(count: usize, adjust: impl Fn(usize, NodeConfig) -> NodeConfig) -> Self {
        init_tracing();
        let mut nodes = Vec::with_capacity(count);
        for index in 0..count {
            let config = NodeConfig::new(format!("node-{index}"))
                .cluster_name(CLUSTER)
                .own(NAMESPACE, partition_slice(index, count));
            let node = NodeServer::spawn(adjust(index, config)).await.expect("spawn node");
            nodes.push(node);
        }
        let hosts: Vec<_> = nodes.iter().map(NodeServer::host).collect();
        for node in &nodes {
            let peers = hosts.iter().filter(|h| **h != node.host()).cloned().collect();
            node.set_peers(peers);
        }
        TestCluster { nodes }
    }

    /// Config seeded with the first node only; the rest is discovered.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(HostSpec::Host(self.nodes[0].host()));
        config.tend_interval = Duration::from_millis(50);
        config.policy = PolicyOverrides::new().timeout(Duration::from_millis(2000));
        config
    }

    pub async fn client(&self) -> Client {
        Client::connect(self.config()).await.expect("connect")
    }

    /// Index of the node owning `key`.
    pub fn owner_of(&self, key: &Key) -> usize {
        let partition = key.partition_id() as u16;
        self.nodes
            .iter()
            .position(|n| n.partitions().get(NAMESPACE).is_some_and(|p| p.contains(&partition)))
            .expect("partition has an owner")
    }

    /// First key named `{prefix}-{i}` owned by node `index`.
    pub fn key_on(&self, index: usize, prefix: &str) -> Key {
        (0..)
            .map(|i| key(&format!("{prefix}-{i}")))
            .find(|k| self.owner_of(k) == index)
            .expect("some key lands on every node")
    }

    pub fn total_commands(&self) -> u64 {
        self.nodes.iter().map(|n| n.counters().commands).sum()
    }
}

pub fn key(user_key: &str) -> Key {
    Key::new(NAMESPACE, SET, user_key).expect("valid key")
}
