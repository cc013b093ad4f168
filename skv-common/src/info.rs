//! # Info Values
//!
//! Names and value formats of the info keys a node answers during the
//! handshake and every refresh.
//!
//! ```text
//! partitions : ns:0-2047,3000-3010;ns2:0-4095
//! peers      : host:port,host:port
//! features   : durable-delete;other
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::error::ProtocolError;
use crate::types::{Host, DEFAULT_PORT, PARTITIONS};

pub const NODE: &str = "node";
pub const CLUSTER_NAME: &str = "cluster-name";
pub const FEATURES: &str = "features";
pub const PARTITION_GENERATION: &str = "partition-generation";
pub const PARTITIONS_KEY: &str = "partitions";
pub const PEERS: &str = "peers";

/// Feature flag for tombstone-leaving deletes.
pub const FEATURE_DURABLE_DELETE: &str = "durable-delete";

/// Partitions owned per namespace.
pub type PartitionMap = BTreeMap<String, BTreeSet<u16>>;

/// Formats ownership as `ns:lo-hi,...;ns2:...`, collapsing runs.
pub fn format_partitions(map: &PartitionMap) -> String {
    let mut out = String::new();
    for (namespace, ids) in map {
        if ids.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(';');
        }
        out.push_str(namespace);
        out.push(':');

        let mut iter = ids.iter().copied();
        let Some(first) = iter.next() else { continue };
        let (mut lo, mut hi) = (first, first);
        let mut ranges = Vec::new();
        for id in iter {
            if id == hi + 1 {
                hi = id;
            } else {
                ranges.push((lo, hi));
                lo = id;
                hi = id;
            }
        }
        ranges.push((lo, hi));

        let parts: Vec<String> = ranges
            .into_iter()
            .map(|(lo, hi)| if lo == hi { lo.to_string() } else { format!("{lo}-{hi}") })
            .collect();
        out.push_str(&parts.join(","));
    }
    out
}

/// Parses the `partitions` info value.
pub fn parse_partitions(value: &str) -> Result<PartitionMap, ProtocolError> {
    let mut map = PartitionMap::new();
    for entry in value.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (namespace, ranges) = entry
            .split_once(':')
            .ok_or(ProtocolError::Malformed("partitions entry"))?;
        if namespace.is_empty() {
            return Err(ProtocolError::Malformed("partitions namespace"));
        }
        let ids = map.entry(namespace.to_string()).or_default();
        for range in ranges.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            let (lo, hi) = match range.split_once('-') {
                Some((lo, hi)) => (parse_partition_id(lo)?, parse_partition_id(hi)?),
                None => {
                    let id = parse_partition_id(range)?;
                    (id, id)
                }
            };
            if lo > hi {
                return Err(ProtocolError::Malformed("partitions range"));
            }
            ids.extend(lo..=hi);
        }
    }
    Ok(map)
}

fn parse_partition_id(s: &str) -> Result<u16, ProtocolError> {
    s.trim()
        .parse::<u16>()
        .ok()
        .filter(|id| (*id as usize) < PARTITIONS)
        .ok_or(ProtocolError::Malformed("partition id"))
}

pub fn format_peers<'a>(peers: impl IntoIterator<Item = &'a Host>) -> String {
    peers
        .into_iter()
        .map(Host::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parses the `peers` info value.
pub fn parse_peers(value: &str) -> Result<Vec<Host>, ProtocolError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| Host::parse(p, DEFAULT_PORT).map_err(ProtocolError::from))
        .collect()
}

/// Parses the `features` info value.
pub fn parse_features(value: &str) -> BTreeSet<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}
