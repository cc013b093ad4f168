mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use skv_client::{Bin, Client, ClientConfig, ClientError, ClusterState, HostSpec, PolicyOverrides, Value};
use skv_server::{NodeConfig, NodeServer};

use common::{init_tracing, partition_slice, TestCluster, CLUSTER, NAMESPACE};

#[tokio::test]
async fn peers_are_discovered_from_one_seed() {
    let cluster = TestCluster::start(3).await;
    let client = cluster.client().await;

    let mut names: Vec<String> = client.nodes().iter().map(|n| n.name().to_string()).collect();
    names.sort();
    assert_eq!(names, vec!["node-0", "node-1", "node-2"]);
    assert!(client.is_connected());
}

#[tokio::test]
async fn commands_route_to_the_owning_node() {
    let cluster = TestCluster::start(2).await;
    let client = cluster.client().await;

    for round in 0..4 {
        let k = cluster.key_on(round % 2, &format!("route-{round}"));
        client.put(&k, &[Bin::new("v", round as i64)], None).await.unwrap();
        assert!(cluster.nodes[round % 2].store().generation(NAMESPACE, k.digest()).is_some());
        assert!(cluster.nodes[(round + 1) % 2].store().generation(NAMESPACE, k.digest()).is_none());
    }
    assert_eq!(cluster.nodes[0].counters().commands, 2);
    assert_eq!(cluster.nodes[1].counters().commands, 2);
}

#[tokio::test]
async fn cluster_name_mismatch_fails_connect() {
    let cluster = TestCluster::start(1).await;
    let mut config = cluster.config();
    config.policy = PolicyOverrides::new().cluster_name("someone-else");

    match Client::connect(config).await {
        Err(ClientError::ClusterIdentityMismatch { expected, actual }) => {
            assert_eq!(expected, "someone-else");
            assert_eq!(actual, CLUSTER);
        }
        other => panic!("expected identity mismatch, got {other:?}"),
    }

    let mut config = cluster.config();
    config.policy = PolicyOverrides::new().cluster_name(CLUSTER);
    assert!(Client::connect(config).await.is_ok());
}

#[tokio::test]
async fn connect_fails_without_reachable_seeds() {
    init_tracing();
    let node = NodeServer::spawn(NodeConfig::new("gone")).await.unwrap();
    let host = node.host();
    node.shutdown().await;

    let mut config = ClientConfig::new(HostSpec::Host(host));
    config.connect_timeout = Duration::from_millis(200);
    let err = Client::connect(config).await.unwrap_err();
    assert!(matches!(err, ClientError::Connection { .. }), "got {err:?}");
}

#[tokio::test]
async fn seeds_accept_every_host_form() {
    let cluster = TestCluster::start(1).await;
    let host = cluster.nodes[0].host();

    let forms = [
        HostSpec::from(host.to_string()),
        HostSpec::from(format!("{host}, {host}").as_str()),
        HostSpec::Hosts(vec![host.clone()]),
        HostSpec::Host(host.clone()),
    ];
    for form in forms {
        let client = Client::connect(ClientConfig::new(form)).await.unwrap();
        assert_eq!(client.nodes().len(), 1);
        client.close();
    }

    let json = format!(r#"{{"hosts": ["{host}"], "policy": {{"timeout": 500}}, "tend_interval": 100}}"#);
    let client = Client::connect(ClientConfig::from_json(&json).unwrap()).await.unwrap();
    assert_eq!(client.default_policy().timeout, Duration::from_millis(500));
}

#[tokio::test]
async fn stopped_node_goes_inactive_then_is_removed() {
    let cluster = TestCluster::start(2).await;
    let mut config = cluster.config();
    config.tend_interval = Duration::from_secs(3600);
    config.failure_threshold = 2;
    config.policy = PolicyOverrides::new().timeout(Duration::from_millis(300));
    let client = Client::connect(config).await.unwrap();
    assert_eq!(client.nodes().len(), 2);

    cluster.nodes[1].shutdown().await;

    client.refresh().await.unwrap();
    let stats = client.stats();
    let down = stats.iter().find(|s| s.name == "node-1").expect("still tracked");
    assert!(!down.active);
    assert_eq!(down.consecutive_failures, 1);

    client.refresh().await.unwrap();
    let names: Vec<String> = client.nodes().iter().map(|n| n.name().to_string()).collect();
    assert_eq!(names, vec!["node-0"]);
    assert!(client.is_connected());
}

#[tokio::test]
async fn partition_move_is_followed_after_refresh() {
    let cluster = TestCluster::start(2).await;
    let client = cluster.client().await;
    let k = cluster.key_on(1, "migrate");
    client.put(&k, &[Bin::new("v", 1i64)], None).await.unwrap();

    // node-0 takes over everything; node-1 gives up its slice.
    let mut all = BTreeMap::new();
    all.insert(NAMESPACE.to_string(), partition_slice(0, 1));
    cluster.nodes[0].set_partitions(all);
    cluster.nodes[1].set_partitions(BTreeMap::new());

    // The first attempt hits node-1, gets PartitionUnavailable, refreshes and
    // lands on node-0.
    client.put(&k, &[Bin::new("v", 2i64)], None).await.unwrap();
    assert_eq!(cluster.nodes[0].store().generation(NAMESPACE, k.digest()), Some(1));
    let record = client.get(&k, None, None).await.unwrap().unwrap();
    assert_eq!(record.bin("v"), Some(&Value::Int(2)));
}

#[tokio::test]
async fn close_is_idempotent_and_final() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = common::key("closed");

    client.close();
    client.close();
    assert!(!client.is_connected());
    assert!(client.nodes().is_empty());
    assert!(matches!(
        client.get(&k, None, None).await,
        Err(ClientError::NotConnected)
    ));
}

#[tokio::test]
async fn stats_count_commands_per_node() {
    let cluster = TestCluster::start(2).await;
    let client = cluster.client().await;
    let k = cluster.key_on(0, "stats");
    for _ in 0..3 {
        client.put(&k, &[Bin::new("v", 1i64)], None).await.unwrap();
    }

    let stats = client.stats();
    let owner = stats.iter().find(|s| s.name == "node-0").unwrap();
    assert_eq!(owner.metrics.commands_total, 3);
    assert_eq!(owner.metrics.errors_total, 0);
    assert_eq!(owner.metrics.latency.samples, 3);
    assert!(owner.idle_connections >= 1);
    let other = stats.iter().find(|s| s.name == "node-1").unwrap();
    assert_eq!(other.metrics.commands_total, 0);
}

#[tokio::test]
async fn background_refresh_tracks_new_peers() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    assert_eq!(client.nodes().len(), 1);

    let extra = NodeServer::spawn(NodeConfig::new("late-joiner").cluster_name(CLUSTER))
        .await
        .unwrap();
    cluster.nodes[0].set_peers(vec![extra.host()]);

    let mut seen = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        if client.nodes().iter().any(|n| n.name() == "late-joiner") {
            seen = true;
            break;
        }
    }
    assert!(seen, "tend loop picks up peers");
    assert_eq!(client.nodes().len(), 2);
    assert!(matches!(
        client.nodes().iter().find(|n| n.name() == "late-joiner").map(|n| n.is_active()),
        Some(true)
    ));
}

#[tokio::test]
async fn cancelled_refresh_leaves_the_cluster_connected() {
    let cluster = TestCluster::start(1).await;
    let mut config = cluster.config();
    config.tend_interval = Duration::from_secs(3600);
    let client = Client::connect(config).await.unwrap();

    cluster.nodes[0].set_response_delay(Duration::from_millis(300));
    let cancelled = tokio::time::timeout(Duration::from_millis(50), client.refresh()).await;
    assert!(cancelled.is_err(), "refresh outlives the caller's deadline");
    assert_eq!(client.state(), ClusterState::Connected);

    cluster.nodes[0].set_response_delay(Duration::ZERO);
    client.refresh().await.unwrap();
    assert_eq!(client.state(), ClusterState::Connected);
}
