//! # Policy Resolution
//!
//! Purpose: Produce the effective, immutable policy for one call from the
//! library defaults, construction-time overrides and call-site overrides.
//!
//! ## Design Principles
//! 1. **Last Writer Wins**: Each layer only replaces the fields it sets.
//! 2. **Validate Once**: The merged policy is checked before any I/O and never
//!    mutated afterwards.
//! 3. **Plain Data**: Overrides deserialize from JSON so a config file can
//!    carry them verbatim.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use skv_common::ArgumentError;

use crate::config::opt_duration_ms;

/// How repeated reads of one bin inside `operate` are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordBinMultiplicity {
    /// The last read value wins.
    #[default]
    Single,
    /// A bin read more than once becomes a list of every read value.
    Array,
}

/// Record time-to-live applied by writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expiration {
    /// Use the namespace's configured default.
    #[default]
    NamespaceDefault,
    /// Never expire.
    Never,
    /// Keep the record's current expiration.
    DontUpdate,
    /// Expire after this many seconds.
    Seconds(u32),
}

impl Expiration {
    /// Value carried in the message header.
    pub const fn to_wire(self) -> u32 {
        match self {
            Expiration::NamespaceDefault => 0,
            Expiration::Never => RESERVED_NEVER,
            Expiration::DontUpdate => RESERVED_DONT_UPDATE,
            Expiration::Seconds(secs) => secs,
        }
    }

    /// `Seconds` may not use the values reserved for the other variants.
    pub fn validate(self) -> Result<(), ArgumentError> {
        match self {
            Expiration::Seconds(secs @ (0 | RESERVED_NEVER | RESERVED_DONT_UPDATE)) => Err(
                ArgumentError::InvalidPolicy(format!("expiration of {secs} seconds collides with a reserved value")),
            ),
            _ => Ok(()),
        }
    }
}

const RESERVED_NEVER: u32 = u32::MAX;
const RESERVED_DONT_UPDATE: u32 = u32::MAX - 1;

/// Optimistic concurrency check for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPolicy {
    #[default]
    None,
    /// Apply the write only if the stored generation equals this value.
    ExpectEqual(u32),
}

/// What a batch does with keys whose node could not be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailureMode {
    /// Fail the whole call with the node error.
    #[default]
    Fail,
    /// Report those keys as absent.
    MarkAbsent,
}

/// Effective policy for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    /// Bound on pool checkout and on each request/response exchange.
    pub timeout: Duration,
    /// Extra attempts after the first for retryable failures.
    pub max_retries: u32,
    pub sleep_between_retries: Duration,
    pub durable_delete: bool,
    pub record_bin_multiplicity: RecordBinMultiplicity,
    /// Expected cluster name; checked during connect and peer discovery.
    pub cluster_name: Option<String>,
    /// Store the user key alongside the record on writes.
    pub send_key: bool,
    pub expiration: Expiration,
    pub generation: GenerationPolicy,
    pub batch_failure: BatchFailureMode,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            timeout: Duration::from_millis(1000),
            max_retries: 2,
            sleep_between_retries: Duration::ZERO,
            durable_delete: false,
            record_bin_multiplicity: RecordBinMultiplicity::Single,
            cluster_name: None,
            send_key: false,
            expiration: Expiration::NamespaceDefault,
            generation: GenerationPolicy::None,
            batch_failure: BatchFailureMode::Fail,
        }
    }
}

impl Policy {
    /// Merges `defaults`, then `client`, then `call`; later layers win per field.
    ///
    /// # Errors
    /// Returns `ArgumentError::InvalidPolicy` when the merged policy has a zero
    /// timeout or an empty cluster name.
    pub fn resolve(
        defaults: &Policy,
        client: &PolicyOverrides,
        call: Option<&PolicyOverrides>,
    ) -> Result<Policy, ArgumentError> {
        let mut policy = defaults.clone();
        client.apply(&mut policy);
        if let Some(call) = call {
            call.apply(&mut policy);
        }
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), ArgumentError> {
        if self.timeout.is_zero() {
            return Err(ArgumentError::InvalidPolicy("timeout must be non-zero".into()));
        }
        if matches!(&self.cluster_name, Some(name) if name.is_empty()) {
            return Err(ArgumentError::InvalidPolicy("cluster_name must not be empty".into()));
        }
        self.expiration.validate()
    }

    #[inline]
    pub(crate) fn timeout_ms(&self) -> u32 {
        self.timeout.as_millis().min(u32::MAX as u128) as u32
    }
}

/// Partial policy; unset fields inherit from the layer below.
///
/// Durations are milliseconds in JSON:
///
/// ```text
/// {"timeout": 250, "max_retries": 0, "record_bin_multiplicity": "array"}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyOverrides {
    #[serde(with = "opt_duration_ms", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(with = "opt_duration_ms", skip_serializing_if = "Option::is_none")]
    pub sleep_between_retries: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable_delete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_bin_multiplicity: Option<RecordBinMultiplicity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_key: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<Expiration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_failure: Option<BatchFailureMode>,
}

impl PolicyOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn sleep_between_retries(mut self, sleep: Duration) -> Self {
        self.sleep_between_retries = Some(sleep);
        self
    }

    pub fn durable_delete(mut self, enabled: bool) -> Self {
        self.durable_delete = Some(enabled);
        self
    }

    pub fn record_bin_multiplicity(mut self, multiplicity: RecordBinMultiplicity) -> Self {
        self.record_bin_multiplicity = Some(multiplicity);
        self
    }

    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = Some(name.into());
        self
    }

    pub fn send_key(mut self, enabled: bool) -> Self {
        self.send_key = Some(enabled);
        self
    }

    pub fn expiration(mut self, expiration: Expiration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn generation(mut self, generation: GenerationPolicy) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn batch_failure(mut self, mode: BatchFailureMode) -> Self {
        self.batch_failure = Some(mode);
        self
    }

    fn apply(&self, policy: &mut Policy) {
        if let Some(v) = self.timeout {
            policy.timeout = v;
        }
        if let Some(v) = self.max_retries {
            policy.max_retries = v;
        }
        if let Some(v) = self.sleep_between_retries {
            policy.sleep_between_retries = v;
        }
        if let Some(v) = self.durable_delete {
            policy.durable_delete = v;
        }
        if let Some(v) = self.record_bin_multiplicity {
            policy.record_bin_multiplicity = v;
        }
        if let Some(v) = &self.cluster_name {
            policy.cluster_name = Some(v.clone());
        }
        if let Some(v) = self.send_key {
            policy.send_key = v;
        }
        if let Some(v) = self.expiration {
            policy.expiration = v;
        }
        if let Some(v) = self.generation {
            policy.generation = v;
        }
        if let Some(v) = self.batch_failure {
            policy.batch_failure = v;
        }
    }
}
