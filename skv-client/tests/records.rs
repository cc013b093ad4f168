mod common;

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use skv_client::{
    ArgumentError, Bin, ClientError, Expiration, GenerationPolicy, MapOperation, MapReturnType, Operation, PolicyOverrides,
    RecordBinMultiplicity, ResultCode, Value,
};

use skv_common::particle::MAX_NESTING_DEPTH;

use common::{key, TestCluster};

fn nested_map() -> Value {
    let mut inner = BTreeMap::new();
    inner.insert(Value::Int(1), Value::from("one"));
    inner.insert(Value::Blob(vec![0, 1]), Value::Nil);
    inner.insert(Value::from("list"), Value::List(vec![Value::Nil, Value::Float(0.5), Value::Bool(true)]));
    Value::Map(inner)
}

#[tokio::test]
async fn put_get_round_trips_every_value_shape() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("shapes");

    let bins = vec![
        Bin::new("s", "hello"),
        Bin::new("i", -42i64),
        Bin::new("f", 2.25f64),
        Bin::new("b", true),
        Bin::new("blob", vec![1u8, 2, 3]),
        Bin::new("list", Value::List(vec![Value::Int(1), Value::Nil, Value::List(vec![Value::from("x")])])),
        Bin::new("map", nested_map()),
        Bin::new("geo", Value::GeoJson(r#"{"type":"Point","coordinates":[1,2]}"#.into())),
    ];
    client.put(&k, &bins, None).await.expect("put");

    let record = client.get(&k, None, None).await.expect("get").expect("record exists");
    let expected: HashMap<String, Value> = bins.into_iter().map(|b| (b.name, b.value)).collect();
    assert_eq!(record.bins, expected);
    assert_eq!(record.generation, 1);
    assert_eq!(record.key.as_ref(), Some(&k));
}

#[tokio::test]
async fn selective_read_returns_only_named_bins() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("selective");
    client
        .put(&k, &[Bin::new("a", 1i64), Bin::new("b", 2i64), Bin::new("c", 3i64)], None)
        .await
        .unwrap();

    let record = client.get(&k, Some(&["a", "c", "missing"]), None).await.unwrap().unwrap();
    let mut names: Vec<_> = record.bins.keys().cloned().collect();
    names.sort();
    assert_eq!(names, vec!["a", "c"]);
}

#[tokio::test]
async fn missing_record_reads_as_absent() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("never-written");

    assert!(client.get(&k, None, None).await.unwrap().is_none());
    assert!(client.get_header(&k, None).await.unwrap().is_none());
    assert!(!client.exists(&k, None).await.unwrap());
    assert!(matches!(
        client.touch(&k, None).await,
        Err(ClientError::Server(ResultCode::KeyNotFound))
    ));
}

#[tokio::test]
async fn delete_reports_whether_record_existed() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("delete-me");
    client.put(&k, &[Bin::new("a", 1i64)], None).await.unwrap();

    assert!(client.delete(&k, None).await.unwrap());
    assert!(!client.exists(&k, None).await.unwrap());
    assert!(!client.delete(&k, None).await.unwrap());
}

#[tokio::test]
async fn every_mutation_bumps_generation_by_one() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("generation");
    let generation = |client: &skv_client::Client| {
        let client = client.clone();
        let k = k.clone();
        async move { client.get_header(&k, None).await.unwrap().unwrap().generation }
    };

    client.put(&k, &[Bin::new("n", 1i64), Bin::new("s", "x")], None).await.unwrap();
    assert_eq!(generation(&client).await, 1);
    client.touch(&k, None).await.unwrap();
    assert_eq!(generation(&client).await, 2);
    client.append(&k, &[Bin::new("s", "y")], None).await.unwrap();
    assert_eq!(generation(&client).await, 3);
    client.prepend(&k, &[Bin::new("s", "w")], None).await.unwrap();
    assert_eq!(generation(&client).await, 4);
    client.add(&k, &[Bin::new("n", 1i64)], None).await.unwrap();
    assert_eq!(generation(&client).await, 5);
    client
        .operate(&k, &[Operation::add("n", 1i64), Operation::put("t", "z"), Operation::get()], None)
        .await
        .unwrap();
    assert_eq!(generation(&client).await, 6);
    client.operate(&k, &[Operation::get_bin("n")], None).await.unwrap();
    assert_eq!(generation(&client).await, 6, "read-only operate leaves generation alone");

    let record = client.get(&k, None, None).await.unwrap().unwrap();
    assert_eq!(record.bin("s"), Some(&Value::from("wxy")));
    assert_eq!(record.bin("n"), Some(&Value::Int(3)));
}

#[tokio::test]
async fn generation_policy_rejects_stale_writes() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("cas");
    client.put(&k, &[Bin::new("v", 1i64)], None).await.unwrap();

    let stale = PolicyOverrides::new().generation(GenerationPolicy::ExpectEqual(7));
    let err = client.put(&k, &[Bin::new("v", 2i64)], Some(&stale)).await.unwrap_err();
    assert!(matches!(err, ClientError::Server(ResultCode::GenerationError)));

    let fresh = PolicyOverrides::new().generation(GenerationPolicy::ExpectEqual(1));
    client.put(&k, &[Bin::new("v", 2i64)], Some(&fresh)).await.unwrap();
    assert_eq!(client.get_header(&k, None).await.unwrap().unwrap().generation, 2);
}

#[tokio::test]
async fn add_is_reversible_and_floats_accumulate() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("arith");
    client.put(&k, &[Bin::new("i", 5i64), Bin::new("f", 0.1f64)], None).await.unwrap();

    client.add(&k, &[Bin::new("i", 10i64)], None).await.unwrap();
    client.add(&k, &[Bin::new("i", -10i64)], None).await.unwrap();
    for _ in 0..3 {
        client.add(&k, &[Bin::new("f", 0.1f64)], None).await.unwrap();
    }

    let record = client.get(&k, None, None).await.unwrap().unwrap();
    assert_eq!(record.bin("i"), Some(&Value::Int(5)));
    let f = record.bin("f").and_then(Value::as_float).unwrap();
    assert!((f - 0.4).abs() < 1e-9, "got {f}");
}

#[tokio::test]
async fn type_mismatch_is_a_terminal_server_error() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("types");
    client.put(&k, &[Bin::new("s", "text")], None).await.unwrap();
    let before = cluster.total_commands();

    let err = client.add(&k, &[Bin::new("s", 1i64)], None).await.unwrap_err();
    assert!(matches!(err, ClientError::Server(ResultCode::BinTypeError)));
    assert!(!err.is_retryable());
    assert_eq!(cluster.total_commands(), before + 1, "data errors are not retried");
}

#[tokio::test]
async fn nil_bin_removes_it() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("nil-bin");
    client.put(&k, &[Bin::new("a", 1i64), Bin::new("b", 2i64)], None).await.unwrap();
    client.put(&k, &[Bin::new("a", Value::Nil)], None).await.unwrap();

    let record = client.get(&k, None, None).await.unwrap().unwrap();
    assert_eq!(record.bin("a"), None);
    assert_eq!(record.bin("b"), Some(&Value::Int(2)));
}

#[tokio::test]
async fn expiration_is_reported_by_header() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("ttl");
    let ttl = PolicyOverrides::new().expiration(Expiration::Seconds(120));
    client.put(&k, &[Bin::new("a", 1i64)], Some(&ttl)).await.unwrap();

    let header = client.get_header(&k, None).await.unwrap().unwrap();
    assert!((119..=120).contains(&header.expiration));
    assert!(header.bins.is_empty());

    let never = PolicyOverrides::new().expiration(Expiration::Never);
    client.touch(&k, Some(&never)).await.unwrap();
    assert_eq!(client.get_header(&k, None).await.unwrap().unwrap().expiration, 0);
}

#[tokio::test]
async fn operate_applies_ops_in_order() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("operate");
    client.put(&k, &[Bin::new("n", 1i64)], None).await.unwrap();

    let record = client
        .operate(
            &k,
            &[Operation::add("n", 4i64), Operation::get_bin("n"), Operation::append("s", "a")],
            None,
        )
        .await
        .unwrap();
    assert_eq!(record.bin("n"), Some(&Value::Int(5)));
    assert_eq!(record.generation, 2);

    let record = client.operate(&k, &[Operation::touch(), Operation::get_header()], None).await.unwrap();
    assert!(record.bins.is_empty());
    assert_eq!(record.generation, 3);
}

fn abc_map() -> Vec<Operation> {
    vec![
        MapOperation::put("m", "a", 3i64),
        MapOperation::put("m", "b", 2i64),
        MapOperation::put("m", "c", 1i64),
    ]
}

#[tokio::test]
async fn repeated_reads_follow_bin_multiplicity() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("multiplicity");
    let sizes = client.operate(&k, &abc_map(), None).await.unwrap();
    assert_eq!(sizes.bin("m"), Some(&Value::Int(3)));

    let reads = [
        MapOperation::get_by_index("m", 0, MapReturnType::Value),
        MapOperation::get_by_rank("m", 0, MapReturnType::Value),
    ];

    let single = client.operate(&k, &reads, None).await.unwrap();
    assert_eq!(single.bin("m"), Some(&Value::Int(1)));

    let array = PolicyOverrides::new().record_bin_multiplicity(RecordBinMultiplicity::Array);
    let both = client.operate(&k, &reads, Some(&array)).await.unwrap();
    assert_eq!(both.bin("m"), Some(&Value::List(vec![Value::Int(3), Value::Int(1)])));
}

#[tokio::test]
async fn map_operations_select_and_remove_entries() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("map-ops");
    client.operate(&k, &abc_map(), None).await.unwrap();

    let record = client
        .operate(&k, &[MapOperation::get_by_key("m", "b", MapReturnType::KeyValue)], None)
        .await
        .unwrap();
    let expected: Value = [("b", 2i64)].into_iter().collect();
    assert_eq!(record.bin("m"), Some(&expected));

    let record = client
        .operate(&k, &[MapOperation::get_by_rank("m", -1, MapReturnType::Key)], None)
        .await
        .unwrap();
    assert_eq!(record.bin("m"), Some(&Value::from("a")));

    let record = client
        .operate(
            &k,
            &[
                MapOperation::remove_by_key("m", "a", MapReturnType::Value),
                MapOperation::size("m"),
            ],
            Some(&PolicyOverrides::new().record_bin_multiplicity(RecordBinMultiplicity::Array)),
        )
        .await
        .unwrap();
    assert_eq!(record.bin("m"), Some(&Value::List(vec![Value::Int(3), Value::Int(2)])));

    client.operate(&k, &[MapOperation::clear("m")], None).await.unwrap();
    let record = client.get(&k, Some(&["m"]), None).await.unwrap().unwrap();
    assert_eq!(record.bin("m"), Some(&Value::Map(BTreeMap::new())));
}

#[tokio::test]
async fn repeated_reads_are_idempotent() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("idempotent");
    client.put(&k, &[Bin::new("a", nested_map())], None).await.unwrap();

    let first = client.get(&k, None, None).await.unwrap();
    let first_exists = client.exists(&k, None).await.unwrap();
    for _ in 0..5 {
        assert_eq!(client.get(&k, None, None).await.unwrap(), first);
        assert_eq!(client.exists(&k, None).await.unwrap(), first_exists);
    }
}

#[tokio::test]
async fn invalid_arguments_never_reach_the_network() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("args");
    let before = cluster.total_commands();

    let err = client.put(&k, &[Bin::new("this-name-is-too-long", 1i64)], None).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidArgument(_)));
    let err = client.put(&k, &[], None).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidArgument(_)));
    let zero = PolicyOverrides::new().timeout(Duration::ZERO);
    assert!(matches!(
        client.get(&k, None, Some(&zero)).await,
        Err(ClientError::InvalidArgument(_))
    ));
    assert_eq!(cluster.total_commands(), before);
}

fn nested_list(levels: usize) -> Value {
    let mut value = Value::from("leaf");
    for _ in 0..levels {
        value = Value::List(vec![value]);
    }
    value
}

#[tokio::test]
async fn nesting_is_capped_before_sending() {
    let cluster = TestCluster::start(1).await;
    let client = cluster.client().await;
    let k = key("deep");

    let deepest = nested_list(MAX_NESTING_DEPTH);
    client.put(&k, &[Bin::new("v", deepest.clone())], None).await.unwrap();
    let record = client.get(&k, None, None).await.unwrap().unwrap();
    assert_eq!(record.bin("v"), Some(&deepest));

    let before = cluster.total_commands();
    let err = client
        .put(&k, &[Bin::new("v", nested_list(MAX_NESTING_DEPTH + 6))], None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, ClientError::InvalidArgument(ArgumentError::NestingTooDeep(MAX_NESTING_DEPTH))),
        "got {err:?}"
    );
    let err = client
        .operate(&k, &[MapOperation::put("m", "k", deepest)], None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidArgument(_)), "got {err:?}");
    assert_eq!(cluster.total_commands(), before);
}
