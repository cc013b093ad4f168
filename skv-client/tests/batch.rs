mod common;

use skv_client::{BatchFailureMode, Bin, Client, ClientError, Key, PolicyOverrides, Value, MAX_BATCH_KEYS};

use common::{key, TestCluster};

fn retries_on(client: &Client, node: &str) -> u64 {
    client
        .stats()
        .into_iter()
        .find(|s| s.name == node)
        .map(|s| s.metrics.retries_total)
        .unwrap_or_default()
}

#[tokio::test]
async fn batch_get_keeps_input_order_and_marks_missing() {
    let cluster = TestCluster::start(2).await;
    let client = cluster.client().await;
    let k1 = cluster.key_on(1, "order");
    let k2 = key("order-missing");
    let k3 = cluster.key_on(0, "order");
    client.put(&k1, &[Bin::new("v", 1i64)], None).await.unwrap();
    client.put(&k3, &[Bin::new("v", 3i64)], None).await.unwrap();

    let records = client.batch_get(&[k1.clone(), k2, k3.clone()], None, None).await.unwrap();
    assert_eq!(records.len(), 3);
    let first = records[0].as_ref().expect("k1 exists");
    assert_eq!(first.key.as_ref(), Some(&k1));
    assert_eq!(first.bin("v"), Some(&Value::Int(1)));
    assert!(records[1].is_none());
    assert_eq!(records[2].as_ref().and_then(|r| r.bin("v")), Some(&Value::Int(3)));
}

#[tokio::test]
async fn batch_exists_over_3000_keys_across_nodes() {
    let cluster = TestCluster::start(2).await;
    let client = cluster.client().await;
    let keys: Vec<Key> = (0..3000).map(|i| key(&format!("bulk-{i}"))).collect();
    for (i, k) in keys.iter().enumerate().step_by(2) {
        client.put(k, &[Bin::new("i", i as i64)], None).await.unwrap();
    }

    let exists = client.batch_exists(&keys, None).await.unwrap();
    let expected: Vec<bool> = (0..3000).map(|i| i % 2 == 0).collect();
    assert_eq!(exists, expected);
    assert!(cluster.nodes.iter().all(|n| n.counters().batches == 1), "one sub-request per node");
}

#[tokio::test]
async fn batch_get_filters_bins_and_headers() {
    let cluster = TestCluster::start(2).await;
    let client = cluster.client().await;
    let keys = [cluster.key_on(0, "filter"), cluster.key_on(1, "filter")];
    for k in &keys {
        client
            .put(k, &[Bin::new("a", 1i64), Bin::new("b", "two")], None)
            .await
            .unwrap();
    }

    let records = client.batch_get(&keys, Some(&["b"]), None).await.unwrap();
    for record in records.iter().map(|r| r.as_ref().unwrap()) {
        assert_eq!(record.bins.len(), 1);
        assert_eq!(record.bin("b"), Some(&Value::from("two")));
    }

    let headers = client.batch_get_header(&keys, None).await.unwrap();
    for header in headers.iter().map(|r| r.as_ref().unwrap()) {
        assert!(header.bins.is_empty());
        assert_eq!(header.generation, 1);
    }
}

#[tokio::test]
async fn batch_limits_are_checked_locally() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;

    assert!(client.batch_get(&[], None, None).await.unwrap().is_empty());

    let too_many: Vec<Key> = (0..=MAX_BATCH_KEYS).map(|i| key(&format!("limit-{i}"))).collect();
    let err = client.batch_exists(&too_many, None).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidArgument(_)));

    let err = client.batch_get(&[key("x")], Some(&[""]), None).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidArgument(_)));
    assert_eq!(cluster.nodes[0].counters().batches, 0);
}

#[tokio::test]
async fn batch_retries_a_dropped_sub_request() {
    let cluster = TestCluster::start(2).await;
    let client = cluster.client().await;
    let keys = [cluster.key_on(0, "retry"), cluster.key_on(1, "retry")];
    for k in &keys {
        client.put(k, &[Bin::new("a", 1i64)], None).await.unwrap();
    }

    cluster.nodes[1].drop_next_commands(1);
    let exists = client.batch_exists(&keys, None).await.unwrap();
    assert_eq!(exists, vec![true, true]);
    assert_eq!(cluster.nodes[1].counters().dropped, 1);
    assert_eq!(retries_on(&client, "node-1"), 1);
    assert_eq!(retries_on(&client, "node-0"), 0);
}

#[tokio::test]
async fn unreachable_node_fails_or_marks_absent_per_policy() {
    let cluster = TestCluster::start(2).await;
    let client = cluster.client().await;
    let keys = [cluster.key_on(0, "down"), cluster.key_on(1, "down")];
    for k in &keys {
        client.put(k, &[Bin::new("a", 1i64)], None).await.unwrap();
    }

    // Every attempt against node 1 is swallowed.
    cluster.nodes[1].drop_next_commands(100);
    let fail = PolicyOverrides::new().max_retries(1);
    let err = client.batch_get(&keys, None, Some(&fail)).await.unwrap_err();
    assert!(err.is_retryable(), "surfaces the node error, got {err:?}");
    assert_eq!(retries_on(&client, "node-1"), 1, "only the re-sent attempt counts");

    let absent = PolicyOverrides::new()
        .max_retries(1)
        .batch_failure(BatchFailureMode::MarkAbsent);
    let records = client.batch_get(&keys, None, Some(&absent)).await.unwrap();
    assert!(records[0].is_some());
    assert!(records[1].is_none());
}
