//! # Command Executor
//!
//! Purpose: Send one encoded command to the node owning its key, retrying
//! node-level failures under the policy's budget.
//!
//! ## Design Principles
//! 1. **Encode Once**: The body is serialized before the first attempt, so an
//!    argument error never reaches the network and retries resend the same
//!    bytes.
//! 2. **Re-Route Per Attempt**: Every attempt asks the topology for the owner
//!    again; a retry after a refresh lands on the new owner.
//! 3. **One Classifier**: `ClientError::is_retryable` alone decides whether an
//!    attempt is repeated.

use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tracing::{debug, warn};

use skv_common::{info2, Key, Message, MessageKind, ResultCode};

use crate::cluster::Cluster;
use crate::error::{ClientError, ClientResult};
use crate::node::Node;
use crate::policy::Policy;

/// Executes `message` against the owner of `key`.
///
/// Returns the reply for any result code except those mapped to retryable
/// errors (`PartitionUnavailable`, server `Timeout`); the caller interprets
/// the rest.
pub(crate) async fn execute(
    cluster: &Cluster,
    key: &Key,
    message: &Message,
    policy: &Policy,
) -> ClientResult<Message> {
    let mut body = BytesMut::new();
    message.encode(&mut body)?;
    let durable_delete = message.info2 & info2::DURABLE_DELETE != 0;

    let mut attempt: u32 = 0;
    loop {
        let node = cluster.node_for(key)?;
        if durable_delete && !node.supports_durable_delete() {
            return Err(ClientError::CapabilityUnsupported(format!(
                "durable delete is not supported by node {}",
                node.name()
            )));
        }

        let err = match attempt_once(&node, &body, policy).await {
            Ok(reply) => return Ok(reply),
            Err(err) => err,
        };
        if !err.is_retryable() || attempt >= policy.max_retries {
            if err.is_retryable() {
                warn!(node = %node.name(), attempts = attempt + 1, error = %err, "retries exhausted");
            }
            return Err(err);
        }

        attempt += 1;
        node.metrics().record_retry();
        debug!(node = %node.name(), attempt, error = %err, "retrying command");
        if matches!(err, ClientError::Server(ResultCode::PartitionUnavailable)) {
            // Ownership moved; pick up the new map before re-routing.
            if let Err(refresh_err) = cluster.tend().await {
                debug!(error = %refresh_err, "inline refresh failed");
            }
        }
        if !policy.sleep_between_retries.is_zero() {
            tokio::time::sleep(policy.sleep_between_retries).await;
        }
    }
}

async fn attempt_once(node: &Arc<Node>, body: &[u8], policy: &Policy) -> ClientResult<Message> {
    let metrics = node.metrics();
    metrics.record_command_start();
    let started = Instant::now();

    let result = exchange(node, body, policy).await;

    metrics.record_command_end(started.elapsed());
    let result = result.and_then(|reply| match reply.result() {
        ResultCode::PartitionUnavailable => Err(ClientError::Server(ResultCode::PartitionUnavailable)),
        ResultCode::Timeout => Err(ClientError::Timeout(policy.timeout)),
        _ => Ok(reply),
    });
    if result.is_err() {
        metrics.record_error();
    }
    result
}

async fn exchange(node: &Node, body: &[u8], policy: &Policy) -> ClientResult<Message> {
    let mut conn = node.pool().acquire(policy.timeout).await?;
    let reply = conn.exchange(MessageKind::Command, body, policy.timeout).await?;
    Message::decode(&reply).map_err(|err| {
        conn.discard();
        ClientError::from(err)
    })
}
