//! # Reference Node
//!
//! Purpose: Serve the ShardKV wire protocol over TCP from an in-memory
//! store, with ownership, peers and faults controllable at runtime.
//!
//! ## Design Principles
//!
//! 1. **One Task Per Connection**: Each socket runs a read loop that splits
//!    frames out of a reusable `BytesMut` and answers them in order.
//! 2. **Ownership Before Storage**: Commands and batch items for partitions
//!    this node does not own answer `PartitionUnavailable` without touching
//!    the store.
//! 3. **Runtime Control**: Partition map and peer list swap under a lock;
//!    every partition change bumps `partition-generation`.
//! 4. **Deterministic Shutdown**: `shutdown` stops accepting, aborts every
//!    connection task and waits for them before returning.
//!
//! ## Frame Flow
//!
//! ```text
//! socket -> read_buf -> split_frame -> Info    -> info pairs
//!                                   -> Command -> owns? -> RecordStore::execute
//!                                   -> Batch   -> owns? per item -> read_batch_item
//!                      <- encode_frame (after optional delay)
//! ```

use std::collections::BTreeSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use skv_common::info::{self, PartitionMap};
use skv_common::{
    encode_frame, encode_info_response, info2, parse_info_request, split_frame, BatchRecord, BatchRequest,
    BatchResponse, Host, Message, MessageKind, ResultCode, PARTITIONS,
};

use crate::store::RecordStore;

/// Every partition id, for a node owning a whole namespace.
pub fn all_partitions() -> BTreeSet<u16> {
    (0..PARTITIONS as u16).collect()
}

/// Identity and initial state of a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub name: String,
    pub cluster_name: Option<String>,
    pub features: BTreeSet<String>,
    pub partitions: PartitionMap,
    pub peers: Vec<Host>,
}

impl NodeConfig {
    /// A node advertising `durable-delete` and owning nothing yet.
    pub fn new(name: impl Into<String>) -> Self {
        NodeConfig {
            name: name.into(),
            cluster_name: None,
            features: BTreeSet::from([info::FEATURE_DURABLE_DELETE.to_string()]),
            partitions: PartitionMap::new(),
            peers: Vec::new(),
        }
    }

    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = Some(name.into());
        self
    }

    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.features.insert(feature.into());
        self
    }

    pub fn without_feature(mut self, feature: &str) -> Self {
        self.features.remove(feature);
        self
    }

    /// Adds `partitions` of `namespace` to the owned set.
    pub fn own(mut self, namespace: impl Into<String>, partitions: impl IntoIterator<Item = u16>) -> Self {
        self.partitions
            .entry(namespace.into())
            .or_default()
            .extend(partitions);
        self
    }

    pub fn own_all(self, namespace: impl Into<String>) -> Self {
        self.own(namespace, all_partitions())
    }

    pub fn peers(mut self, peers: Vec<Host>) -> Self {
        self.peers = peers;
        self
    }
}

/// Requests seen by a node since it started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCounters {
    pub info_requests: u64,
    pub commands: u64,
    pub batches: u64,
    /// Command and batch frames swallowed by fault injection.
    pub dropped: u64,
}

struct NodeState {
    name: String,
    cluster_name: Option<String>,
    features: BTreeSet<String>,
    store: RecordStore,
    partitions: RwLock<PartitionMap>,
    partition_generation: AtomicU64,
    peers: RwLock<Vec<Host>>,
    drop_next: AtomicU32,
    delay_ms: AtomicU64,
    info_requests: AtomicU64,
    commands: AtomicU64,
    batches: AtomicU64,
    dropped: AtomicU64,
}

impl NodeState {
    fn owns(&self, namespace: &str, partition: usize) -> bool {
        self.partitions
            .read()
            .get(namespace)
            .is_some_and(|owned| owned.contains(&(partition as u16)))
    }

    /// Consumes one pending drop, if any.
    fn take_drop(&self) -> bool {
        let dropped = self
            .drop_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        dropped
    }

    fn response_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::Relaxed))
    }

    fn info_value(&self, name: &str) -> Option<String> {
        let value = match name {
            info::NODE => self.name.clone(),
            info::CLUSTER_NAME => self.cluster_name.clone().unwrap_or_default(),
            info::FEATURES => self.features.iter().cloned().collect::<Vec<_>>().join(";"),
            info::PARTITION_GENERATION => self.partition_generation.load(Ordering::Acquire).to_string(),
            info::PARTITIONS_KEY => info::format_partitions(&self.partitions.read()),
            info::PEERS => info::format_peers(self.peers.read().iter()),
            _ => return None,
        };
        Some(value)
    }

    fn execute(&self, request: &Message) -> Message {
        if let (Ok(namespace), Ok(digest)) = (request.namespace(), request.digest()) {
            if !self.owns(namespace, digest.partition_id()) {
                return Message::response(ResultCode::PartitionUnavailable);
            }
        }
        if request.info2 & info2::DURABLE_DELETE != 0 && !self.features.contains(info::FEATURE_DURABLE_DELETE) {
            return Message::response(ResultCode::EnterpriseOnly);
        }
        self.store.execute(request)
    }

    fn read_batch(&self, request: &BatchRequest) -> BatchResponse {
        let records = request
            .items
            .iter()
            .map(|item| {
                if self.owns(&item.namespace, item.digest.partition_id()) {
                    self.store.read_batch_item(request.info1, item)
                } else {
                    BatchRecord {
                        index: item.index,
                        result_code: ResultCode::PartitionUnavailable.as_u8(),
                        ..BatchRecord::default()
                    }
                }
            })
            .collect();
        BatchResponse { records }
    }
}

/// A running node bound to a local TCP port.
pub struct NodeServer {
    state: Arc<NodeState>,
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NodeServer {
    /// Starts a node on an ephemeral loopback port.
    pub async fn spawn(config: NodeConfig) -> io::Result<Self> {
        Self::bind(config, "127.0.0.1:0").await
    }

    pub async fn bind(config: NodeConfig, addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(NodeState {
            name: config.name,
            cluster_name: config.cluster_name,
            features: config.features,
            store: RecordStore::new(),
            partitions: RwLock::new(config.partitions),
            partition_generation: AtomicU64::new(1),
            peers: RwLock::new(config.peers),
            drop_next: AtomicU32::new(0),
            delay_ms: AtomicU64::new(0),
            info_requests: AtomicU64::new(0),
            commands: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, state.clone(), shutdown_rx));
        info!(node = %state.name, %addr, "node listening");
        Ok(NodeServer {
            state,
            addr,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host(&self) -> Host {
        Host::new(self.addr.ip().to_string(), self.addr.port())
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn store(&self) -> &RecordStore {
        &self.state.store
    }

    pub fn partitions(&self) -> PartitionMap {
        self.state.partitions.read().clone()
    }

    /// Replaces the owned partitions and bumps `partition-generation`.
    pub fn set_partitions(&self, partitions: PartitionMap) {
        *self.state.partitions.write() = partitions;
        let generation = self.state.partition_generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(node = %self.state.name, generation, "partition map replaced");
    }

    pub fn set_peers(&self, peers: Vec<Host>) {
        *self.state.peers.write() = peers;
    }

    /// Closes the connection instead of answering the next `count` command
    /// or batch frames.
    pub fn drop_next_commands(&self, count: u32) {
        self.state.drop_next.store(count, Ordering::Release);
    }

    /// Delays every reply by `delay`.
    pub fn set_response_delay(&self, delay: Duration) {
        let millis = delay.as_millis().min(u64::MAX as u128) as u64;
        self.state.delay_ms.store(millis, Ordering::Relaxed);
    }

    pub fn counters(&self) -> NodeCounters {
        NodeCounters {
            info_requests: self.state.info_requests.load(Ordering::Relaxed),
            commands: self.state.commands.load(Ordering::Relaxed),
            batches: self.state.batches.load(Ordering::Relaxed),
            dropped: self.state.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stops listening and closes every open connection.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(node = %self.state.name, error = %err, "accept loop ended abnormally");
            }
        }
    }
}

impl Drop for NodeServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<NodeState>, mut shutdown: watch::Receiver<bool>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(node = %state.name, %peer, "connection accepted");
                    let state = state.clone();
                    connections.spawn(async move {
                        if let Err(err) = handle_connection(stream, state).await {
                            debug!(%peer, error = %err, "connection closed with error");
                        }
                    });
                }
                Err(err) => warn!(node = %state.name, error = %err, "accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }
    drop(listener);
    connections.shutdown().await;
    info!(node = %state.name, "node stopped");
}

/// Handles a single client connection until it closes or misbehaves.
async fn handle_connection(mut stream: TcpStream, state: Arc<NodeState>) -> io::Result<()> {
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut out = BytesMut::with_capacity(8 * 1024);

    loop {
        let read = stream.read_buf(&mut buffer).await?;
        if read == 0 {
            return Ok(());
        }

        loop {
            let (header, body) = match split_frame(&mut buffer) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    warn!(node = %state.name, error = %err, "dropping connection on bad frame");
                    return Ok(());
                }
            };
            let Some(reply) = dispatch(&state, header.kind, &body) else {
                debug!(node = %state.name, "fault injection: dropping connection");
                return Ok(());
            };

            let delay = state.response_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            out.clear();
            encode_frame(header.kind, &reply, &mut out)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            stream.write_all(&out).await?;
        }
    }
}

/// Builds the reply body; `None` closes the connection unanswered.
fn dispatch(state: &NodeState, kind: MessageKind, body: &[u8]) -> Option<BytesMut> {
    let mut reply = BytesMut::new();
    match kind {
        MessageKind::Info => {
            state.info_requests.fetch_add(1, Ordering::Relaxed);
            let names = parse_info_request(body).unwrap_or_default();
            let pairs: Vec<(String, String)> = names
                .into_iter()
                .filter_map(|name| state.info_value(&name).map(|value| (name, value)))
                .collect();
            encode_info_response(pairs.iter().map(|(n, v)| (n.as_str(), v.as_str())), &mut reply);
        }
        MessageKind::Command => {
            if state.take_drop() {
                return None;
            }
            state.commands.fetch_add(1, Ordering::Relaxed);
            let response = match Message::decode(body) {
                Ok(request) => state.execute(&request),
                Err(err) => {
                    debug!(node = %state.name, error = %err, "malformed command");
                    Message::response(ResultCode::ParameterError)
                }
            };
            if response.encode(&mut reply).is_err() {
                reply.clear();
                Message::response(ResultCode::ServerError).encode(&mut reply).ok()?;
            }
        }
        MessageKind::Batch => {
            if state.take_drop() {
                return None;
            }
            state.batches.fetch_add(1, Ordering::Relaxed);
            let request = match BatchRequest::decode(body) {
                Ok(request) => request,
                Err(err) => {
                    warn!(node = %state.name, error = %err, "malformed batch request");
                    return None;
                }
            };
            state.read_batch(&request).encode(&mut reply).ok()?;
        }
    }
    Some(reply)
}
