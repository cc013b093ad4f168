//! # Batch Coordinator
//!
//! Purpose: Read many keys in one call by splitting them into one
//! sub-request per owning node, running those concurrently and merging the
//! replies back into input order.
//!
//! ## Design Principles
//! 1. **Index Scatter**: Every item carries its input position, so replies
//!    land in their slot regardless of node or arrival order.
//! 2. **Stable Grouping**: Node groups follow first appearance in the input;
//!    keys within a group keep input order.
//! 3. **Re-Group On Retry**: A failed group's keys are routed again against
//!    the current topology before the next round.
//! 4. **Explicit Degradation**: Keys still unresolved after the retry budget
//!    fail the call or read as absent, per `BatchFailureMode`.
//!
//! ## Round Structure
//!
//! ```text
//! pending keys --group by owner--> [node A: i0 i3] [node B: i1 i2]
//!                 join_all        |               |
//!                                 v               v
//!              results[i] <- scatter by item index
//!              retryable failures -> pending (next round)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use futures::future::join_all;
use tracing::{debug, warn};

use skv_common::{
    info1, validate_bin_name, ArgumentError, BatchItem, BatchRecord, BatchRequest, BatchResponse, Key,
    MessageKind, ProtocolError, ResultCode,
};

use crate::cluster::Cluster;
use crate::command::parse_record;
use crate::error::{ClientError, ClientResult};
use crate::node::Node;
use crate::policy::{BatchFailureMode, Policy};
use crate::record::Record;

/// Largest number of keys accepted by one batch call.
pub const MAX_BATCH_KEYS: usize = 5000;

/// What a batch read returns per key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchRead {
    /// Every bin.
    All,
    /// Generation and expiration only.
    Header,
    /// Existence only.
    Exists,
    /// Only the named bins.
    Bins(Vec<String>),
}

impl BatchRead {
    fn info1(&self) -> u8 {
        match self {
            BatchRead::All => info1::READ | info1::GET_ALL,
            BatchRead::Header | BatchRead::Exists => info1::READ | info1::NOBINDATA,
            BatchRead::Bins(_) => info1::READ,
        }
    }

    fn bin_names(&self) -> &[String] {
        match self {
            BatchRead::Bins(names) => names,
            _ => &[],
        }
    }
}

/// Why a group did not resolve.
enum Outcome {
    Retry(ClientError),
    Terminal(ClientError),
}

/// Reads `keys`; the result is parallel to the input.
///
/// Per-key non-OK results read as `None`.
pub(crate) async fn execute_batch(
    cluster: &Cluster,
    keys: &[Key],
    read: &BatchRead,
    policy: &Policy,
) -> ClientResult<Vec<Option<Record>>> {
    if keys.len() > MAX_BATCH_KEYS {
        return Err(ArgumentError::Invalid(format!(
            "batch of {} keys exceeds the limit of {MAX_BATCH_KEYS}",
            keys.len()
        ))
        .into());
    }
    for name in read.bin_names() {
        validate_bin_name(name)?;
    }

    let mut results: Vec<Option<Record>> = vec![None; keys.len()];
    let mut pending: Vec<usize> = (0..keys.len()).collect();
    let mut unresolved: Vec<usize> = Vec::new();
    let mut last_err: Option<ClientError> = None;
    let mut attempt: u32 = 0;

    while !pending.is_empty() {
        let mut retry: Vec<usize> = Vec::new();
        let mut retry_nodes: Vec<&Arc<Node>> = Vec::new();
        let mut refresh = false;

        let (groups, unrouted) = group_by_node(cluster, keys, &pending);
        if !unrouted.is_empty() {
            last_err = Some(ClientError::NotConnected);
            unresolved.extend(unrouted);
        }

        let replies = join_all(
            groups
                .iter()
                .map(|(node, indexes)| send_group(node, keys, indexes, read, policy)),
        )
        .await;

        for ((node, indexes), reply) in groups.iter().zip(replies) {
            match reply {
                Ok(records) => {
                    let mut requested = vec![false; keys.len()];
                    indexes.iter().for_each(|i| requested[*i] = true);
                    let mut answered = vec![false; keys.len()];
                    for record in records {
                        let idx = record.index as usize;
                        if !requested.get(idx).copied().unwrap_or(false) {
                            debug!(node = %node.name(), index = idx, "ignoring batch item outside the request");
                            continue;
                        }
                        answered[idx] = true;
                        match record.result() {
                            ResultCode::Ok => {
                                results[idx] = Some(parse_record(
                                    Some(keys[idx].clone()),
                                    record.generation,
                                    record.expiration,
                                    record.bins,
                                    policy.record_bin_multiplicity,
                                ));
                            }
                            ResultCode::PartitionUnavailable => {
                                refresh = true;
                                retry.push(idx);
                                if !retry_nodes.iter().any(|n| Arc::ptr_eq(n, node)) {
                                    retry_nodes.push(node);
                                }
                            }
                            _ => results[idx] = None,
                        }
                    }
                    if let Some(missing) = indexes.iter().find(|i| !answered[**i]) {
                        debug!(node = %node.name(), index = *missing, "node omitted batch items");
                        last_err = Some(ClientError::Protocol(ProtocolError::Malformed("batch reply missing items")));
                        unresolved.extend(indexes.iter().filter(|i| !answered[**i]));
                    }
                }
                Err(Outcome::Retry(err)) => {
                    debug!(node = %node.name(), keys = indexes.len(), error = %err, "batch group failed");
                    retry.extend(indexes);
                    retry_nodes.push(node);
                    last_err = Some(err);
                }
                Err(Outcome::Terminal(err)) => {
                    unresolved.extend(indexes);
                    last_err = Some(err);
                }
            }
        }

        if retry.is_empty() {
            break;
        }
        if attempt >= policy.max_retries {
            unresolved.extend(retry);
            if last_err.is_none() {
                last_err = Some(ClientError::Server(ResultCode::PartitionUnavailable));
            }
            break;
        }
        attempt += 1;
        retry_nodes.iter().for_each(|node| node.metrics().record_retry());
        if refresh {
            if let Err(err) = cluster.tend().await {
                debug!(error = %err, "inline refresh failed");
            }
        }
        if !policy.sleep_between_retries.is_zero() {
            tokio::time::sleep(policy.sleep_between_retries).await;
        }
        retry.sort_unstable();
        pending = retry;
    }

    if !unresolved.is_empty() {
        let err = last_err.unwrap_or(ClientError::NotConnected);
        match policy.batch_failure {
            BatchFailureMode::Fail => return Err(err),
            BatchFailureMode::MarkAbsent => {
                warn!(keys = unresolved.len(), error = %err, "batch keys unresolved, marking absent");
                for idx in unresolved {
                    results[idx] = None;
                }
            }
        }
    }
    Ok(results)
}

/// Groups indexes by owning node in order of first appearance.
///
/// Returns the groups and the indexes no node owns.
fn group_by_node(
    cluster: &Cluster,
    keys: &[Key],
    pending: &[usize],
) -> (Vec<(Arc<Node>, Vec<usize>)>, Vec<usize>) {
    let mut groups: Vec<(Arc<Node>, Vec<usize>)> = Vec::new();
    let mut slot: HashMap<String, usize> = HashMap::new();
    let mut unrouted = Vec::new();
    for &idx in pending {
        match cluster.node_for(&keys[idx]) {
            Ok(node) => {
                let pos = *slot.entry(node.name().to_string()).or_insert_with(|| {
                    groups.push((node.clone(), Vec::new()));
                    groups.len() - 1
                });
                groups[pos].1.push(idx);
            }
            Err(_) => unrouted.push(idx),
        }
    }
    (groups, unrouted)
}

async fn send_group(
    node: &Arc<Node>,
    keys: &[Key],
    indexes: &[usize],
    read: &BatchRead,
    policy: &Policy,
) -> Result<Vec<BatchRecord>, Outcome> {
    let request = BatchRequest {
        info1: read.info1(),
        timeout_ms: policy.timeout_ms(),
        items: indexes
            .iter()
            .map(|&idx| BatchItem {
                index: idx as u32,
                namespace: keys[idx].namespace().to_string(),
                digest: *keys[idx].digest(),
                bin_names: read.bin_names().to_vec(),
            })
            .collect(),
    };
    let mut body = BytesMut::new();
    request
        .encode(&mut body)
        .map_err(|err| Outcome::Terminal(err.into()))?;

    let metrics = node.metrics();
    metrics.record_command_start();
    let started = Instant::now();
    let result = exchange(node, &body, policy).await;
    metrics.record_command_end(started.elapsed());

    result.map_err(|err| {
        metrics.record_error();
        if err.is_retryable() {
            Outcome::Retry(err)
        } else {
            Outcome::Terminal(err)
        }
    })
}

async fn exchange(node: &Node, body: &[u8], policy: &Policy) -> ClientResult<Vec<BatchRecord>> {
    let mut conn = node.pool().acquire(policy.timeout).await?;
    let reply = conn.exchange(MessageKind::Batch, body, policy.timeout).await?;
    BatchResponse::decode(&reply)
        .map(|response| response.records)
        .map_err(|err| {
            conn.discard();
            ClientError::from(err)
        })
}
