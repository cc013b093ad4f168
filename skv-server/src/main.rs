//! Standalone ShardKV dev node.
//!
//! Owns every partition of the configured namespaces and serves until
//! Ctrl-C.
//!
//! ```bash
//! SKV_NODE_ADDR=127.0.0.1:3000 \
//! SKV_NODE_NAME=dev-1 \
//! SKV_NAMESPACES=test,bar \
//! SKV_CLUSTER_NAME=dev \
//! RUST_LOG=debug \
//!   cargo run --bin skv-node
//! ```

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use skv_common::info::parse_peers;
use skv_server::{NodeConfig, NodeServer};

const DEFAULT_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_NAME: &str = "skv-node-1";
const DEFAULT_NAMESPACES: &str = "test";

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).compact().init();

    let addr = env_or("SKV_NODE_ADDR", DEFAULT_ADDR);
    let mut config = NodeConfig::new(env_or("SKV_NODE_NAME", DEFAULT_NAME));
    for namespace in env_or("SKV_NAMESPACES", DEFAULT_NAMESPACES).split(',') {
        let namespace = namespace.trim();
        if !namespace.is_empty() {
            config = config.own_all(namespace);
        }
    }
    if let Ok(name) = std::env::var("SKV_CLUSTER_NAME") {
        config = config.cluster_name(name);
    }
    if let Ok(peers) = std::env::var("SKV_PEERS") {
        config = config.peers(parse_peers(&peers).context("parsing SKV_PEERS")?);
    }

    let namespaces: Vec<String> = config.partitions.keys().cloned().collect();
    let node = NodeServer::bind(config, &addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        node = %node.name(),
        addr = %node.addr(),
        namespaces = ?namespaces,
        "dev node started"
    );

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    node.shutdown().await;
    Ok(())
}
