//! Client configuration.
//!
//! Loaded programmatically or from JSON; durations are milliseconds.

use std::time::Duration;

use serde::Deserialize;

use skv_common::ArgumentError;

use crate::error::{ClientError, ClientResult};
use crate::hosts::HostSpec;
use crate::policy::PolicyOverrides;

/// Configuration for a `Client` and its per-node pools.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Seed hosts; `None` falls back to `SKV_HOSTS`, then `127.0.0.1:3000`.
    pub hosts: Option<HostSpec>,
    /// Construction-time policy overrides applied to every call.
    pub policy: PolicyOverrides,
    /// Maximum connections per node (idle + in-use).
    pub max_connections_per_node: usize,
    /// Maximum idle connections kept per node.
    pub max_idle_per_node: usize,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Interval between background topology refreshes.
    #[serde(with = "duration_ms")]
    pub tend_interval: Duration,
    /// Consecutive refresh failures before a node is removed.
    pub failure_threshold: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            hosts: None,
            policy: PolicyOverrides::default(),
            max_connections_per_node: 64,
            max_idle_per_node: 16,
            connect_timeout: Duration::from_millis(1000),
            tend_interval: Duration::from_millis(1000),
            failure_threshold: 5,
        }
    }
}

impl ClientConfig {
    pub fn new(hosts: impl Into<HostSpec>) -> Self {
        ClientConfig {
            hosts: Some(hosts.into()),
            ..ClientConfig::default()
        }
    }

    /// Parses a JSON document; absent fields take their defaults.
    pub fn from_json(json: &str) -> ClientResult<Self> {
        let config: ClientConfig = serde_json::from_str(json)
            .map_err(|err| ClientError::InvalidArgument(ArgumentError::Invalid(err.to_string())))?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<(), ArgumentError> {
        if self.max_connections_per_node == 0 {
            return Err(ArgumentError::Invalid(
                "max_connections_per_node must be at least 1".into(),
            ));
        }
        if self.max_idle_per_node > self.max_connections_per_node {
            return Err(ArgumentError::Invalid(
                "max_idle_per_node exceeds max_connections_per_node".into(),
            ));
        }
        if self.tend_interval.is_zero() || self.connect_timeout.is_zero() {
            return Err(ArgumentError::Invalid("durations must be non-zero".into()));
        }
        if self.failure_threshold == 0 {
            return Err(ArgumentError::Invalid("failure_threshold must be at least 1".into()));
        }
        Ok(())
    }
}

/// `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// `Option<Duration>` as integer milliseconds.
pub(crate) mod opt_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RecordBinMultiplicity;

    #[test]
    fn from_json_fills_defaults() {
        let config = ClientConfig::from_json(r#"{"hosts": "a:1,b:2", "tend_interval": 250}"#).unwrap();
        assert_eq!(config.hosts, Some(HostSpec::Str("a:1,b:2".into())));
        assert_eq!(config.tend_interval, Duration::from_millis(250));
        assert_eq!(config.max_connections_per_node, 64);
        assert_eq!(config.policy, PolicyOverrides::default());
    }

    #[test]
    fn from_json_nested_policy() {
        let config = ClientConfig::from_json(
            r#"{"policy": {"timeout": 20, "record_bin_multiplicity": "array"}, "failure_threshold": 2}"#,
        )
        .unwrap();
        assert_eq!(config.policy.timeout, Some(Duration::from_millis(20)));
        assert_eq!(
            config.policy.record_bin_multiplicity,
            Some(RecordBinMultiplicity::Array)
        );
        assert_eq!(config.failure_threshold, 2);
    }

    #[test]
    fn from_json_rejects_bad_input() {
        assert!(ClientConfig::from_json("{").is_err());
        assert!(ClientConfig::from_json(r#"{"max_connections_per_node": 0}"#).is_err());
        assert!(ClientConfig::from_json(r#"{"max_idle_per_node": 100, "max_connections_per_node": 2}"#).is_err());
        assert!(ClientConfig::from_json(r#"{"unknown": 1}"#).is_err());
    }
}
