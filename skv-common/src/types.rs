//! # Key/Bin Type Definitions
//!
//! Core data types shared by the client and the reference node.
//!
//! ## Design Principles
//!
//! 1. **Digest Identity**: A key is identified by `(namespace, digest)`; the
//!    digest is computed once at construction and never changes.
//! 2. **Type-Normalized User Keys**: `&str`, `String` and `Cow<str>` all become
//!    `UserKey::String`, so logically equal keys hash to the same digest.
//! 3. **Fixed Partition Space**: The digest's first two bytes select one of
//!    `PARTITIONS` buckets, each owned by exactly one node at a time.
//!
//! ## Digest Layout
//!
//! ```text
//! digest = SHA-256( set | key_type:1B | key_bytes )[0..20]
//! partition_id = u16::from_le_bytes(digest[0..2]) & (PARTITIONS - 1)
//! ```

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

use sha2::{Digest as _, Sha256};

use crate::error::ArgumentError;
use crate::value::{particle_types as particle, Value};

/// Number of partitions the key space is split into.
pub const PARTITIONS: usize = 4096;

/// Digest size in bytes.
pub const DIGEST_SIZE: usize = 20;

/// Maximum bin name length in bytes.
pub const MAX_BIN_NAME_LEN: usize = 15;

/// Maximum namespace / set name length in bytes.
pub const MAX_NAME_LEN: usize = 63;

/// Port used when a host string omits one.
pub const DEFAULT_PORT: u16 = 3000;

/// Network address of a seed or cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Host {
    pub name: String,
    pub port: u16,
}

impl Host {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Host {
            name: name.into(),
            port,
        }
    }

    /// Parses `host`, `host:port`, `[v6]` or `[v6]:port`.
    ///
    /// A missing port falls back to `default_port`.
    pub fn parse(input: &str, default_port: u16) -> Result<Self, ArgumentError> {
        let input = input.trim();
        let invalid = || ArgumentError::InvalidHost(input.to_string());

        let (name, port) = if let Some(rest) = input.strip_prefix('[') {
            let end = rest.find(']').ok_or_else(invalid)?;
            let name = &rest[..end];
            let tail = &rest[end + 1..];
            let port = match tail.strip_prefix(':') {
                Some(port) => Some(port),
                None if tail.is_empty() => None,
                None => return Err(invalid()),
            };
            (name, port)
        } else {
            match input.rsplit_once(':') {
                // Bare IPv6 literal without brackets: treat the whole input as the name.
                Some((name, _)) if name.contains(':') => (input, None),
                Some((name, port)) => (name, Some(port)),
                None => (input, None),
            }
        };

        if name.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => port.parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(invalid)?,
            None => default_port,
        };
        Ok(Host::new(name, port))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.contains(':') {
            write!(f, "[{}]:{}", self.name, self.port)
        } else {
            write!(f, "{}:{}", self.name, self.port)
        }
    }
}

/// Application-supplied part of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserKey {
    String(String),
    Int(i64),
    Blob(Vec<u8>),
}

impl UserKey {
    /// Particle type byte mixed into the digest.
    pub fn particle_type(&self) -> u8 {
        match self {
            UserKey::String(_) => particle::STRING,
            UserKey::Int(_) => particle::INTEGER,
            UserKey::Blob(_) => particle::BLOB,
        }
    }

    fn digest_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            UserKey::String(s) => Cow::Borrowed(s.as_bytes()),
            UserKey::Int(v) => Cow::Owned(v.to_be_bytes().to_vec()),
            UserKey::Blob(b) => Cow::Borrowed(b),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            UserKey::String(s) => Value::String(s.clone()),
            UserKey::Int(v) => Value::Int(*v),
            UserKey::Blob(b) => Value::Blob(b.clone()),
        }
    }

    /// Inverse of `to_value`; `None` for shapes a user key cannot take.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(UserKey::String(s)),
            Value::Int(v) => Some(UserKey::Int(v)),
            Value::Blob(b) => Some(UserKey::Blob(b)),
            _ => None,
        }
    }
}

impl From<&str> for UserKey {
    fn from(v: &str) -> Self {
        UserKey::String(v.to_string())
    }
}

impl From<String> for UserKey {
    fn from(v: String) -> Self {
        UserKey::String(v)
    }
}

impl From<Cow<'_, str>> for UserKey {
    fn from(v: Cow<'_, str>) -> Self {
        UserKey::String(v.into_owned())
    }
}

impl From<i64> for UserKey {
    fn from(v: i64) -> Self {
        UserKey::Int(v)
    }
}

impl From<i32> for UserKey {
    fn from(v: i32) -> Self {
        UserKey::Int(v as i64)
    }
}

impl From<u32> for UserKey {
    fn from(v: u32) -> Self {
        UserKey::Int(v as i64)
    }
}

impl From<usize> for UserKey {
    fn from(v: usize) -> Self {
        UserKey::Int(v as i64)
    }
}

impl From<Vec<u8>> for UserKey {
    fn from(v: Vec<u8>) -> Self {
        UserKey::Blob(v)
    }
}

impl From<&[u8]> for UserKey {
    fn from(v: &[u8]) -> Self {
        UserKey::Blob(v.to_vec())
    }
}

/// Fixed-size hash of `(set, user_key)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(pub [u8; DIGEST_SIZE]);

impl Digest {
    /// Computes the digest of a set name and user key.
    pub fn compute(set: &str, user_key: &UserKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(set.as_bytes());
        hasher.update([user_key.particle_type()]);
        hasher.update(user_key.digest_bytes());
        let hash = hasher.finalize();

        let mut out = [0u8; DIGEST_SIZE];
        out.copy_from_slice(&hash[..DIGEST_SIZE]);
        Digest(out)
    }

    /// Partition this digest routes to.
    #[inline]
    pub fn partition_id(&self) -> usize {
        u16::from_le_bytes([self.0[0], self.0[1]]) as usize & (PARTITIONS - 1)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest(")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// Address of a record: namespace, set and digest.
#[derive(Clone)]
pub struct Key {
    namespace: String,
    set: String,
    user_key: Option<UserKey>,
    digest: Digest,
}

// Identity is the digest, not the user key that produced it.
impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest && self.namespace == other.namespace
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.digest.hash(state);
    }
}

impl Key {
    /// Creates a key and computes its digest.
    ///
    /// # Errors
    /// Returns `ArgumentError` for an empty namespace or oversized names.
    ///
    /// # Examples
    /// ```rust
    /// use skv_common::Key;
    ///
    /// let a = Key::new("test", "users", "alice").expect("valid key");
    /// let b = Key::new("test", "users", String::from("alice")).expect("valid key");
    /// assert_eq!(a, b);
    /// assert_eq!(a.digest(), b.digest());
    /// ```
    pub fn new(
        namespace: impl Into<String>,
        set: impl Into<String>,
        user_key: impl Into<UserKey>,
    ) -> Result<Self, ArgumentError> {
        let namespace = namespace.into();
        let set = set.into();
        validate_names(&namespace, &set)?;
        let user_key = user_key.into();
        let digest = Digest::compute(&set, &user_key);
        Ok(Key {
            namespace,
            set,
            user_key: Some(user_key),
            digest,
        })
    }

    /// Creates a key from a precomputed digest; the user key is unknown.
    pub fn from_digest(
        namespace: impl Into<String>,
        set: impl Into<String>,
        digest: Digest,
    ) -> Result<Self, ArgumentError> {
        let namespace = namespace.into();
        let set = set.into();
        validate_names(&namespace, &set)?;
        Ok(Key {
            namespace,
            set,
            user_key: None,
            digest,
        })
    }

    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[inline]
    pub fn set(&self) -> &str {
        &self.set
    }

    #[inline]
    pub fn user_key(&self) -> Option<&UserKey> {
        self.user_key.as_ref()
    }

    #[inline]
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    #[inline]
    pub fn partition_id(&self) -> usize {
        self.digest.partition_id()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user_key {
            Some(user_key) => write!(f, "Key({}:{}:{:?})", self.namespace, self.set, user_key),
            None => write!(f, "Key({}:{}:{:?})", self.namespace, self.set, self.digest),
        }
    }
}

fn validate_names(namespace: &str, set: &str) -> Result<(), ArgumentError> {
    if namespace.is_empty() {
        return Err(ArgumentError::EmptyNamespace);
    }
    if namespace.len() > MAX_NAME_LEN {
        return Err(ArgumentError::NameTooLong {
            field: "namespace",
            max: MAX_NAME_LEN,
        });
    }
    if set.len() > MAX_NAME_LEN {
        return Err(ArgumentError::NameTooLong {
            field: "set",
            max: MAX_NAME_LEN,
        });
    }
    Ok(())
}

/// Named value stored in a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    pub name: String,
    pub value: Value,
}

impl Bin {
    /// Creates a bin. Names are validated when the bin is encoded.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Bin {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Checks the name length and that the value can be sent.
    pub fn validate(&self) -> Result<(), ArgumentError> {
        validate_bin_name(&self.name)?;
        self.value.check_sendable()
    }
}

/// Validates a bin name on its own (read filters, CDT targets).
pub fn validate_bin_name(name: &str) -> Result<(), ArgumentError> {
    if name.is_empty() {
        return Err(ArgumentError::EmptyBinName);
    }
    if name.len() > MAX_BIN_NAME_LEN {
        return Err(ArgumentError::BinNameTooLong(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_and_type_sensitive() {
        let a = Digest::compute("set", &UserKey::from("1"));
        let b = Digest::compute("set", &UserKey::from("1"));
        let c = Digest::compute("set", &UserKey::from(1i64));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_digest_depends_on_set() {
        let a = Digest::compute("a", &UserKey::from("k"));
        let b = Digest::compute("b", &UserKey::from("k"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_equality_normalizes_string_forms() {
        let borrowed = Key::new("test", "demo", "k1").unwrap();
        let owned = Key::new("test", "demo", String::from("k1")).unwrap();
        let cow = Key::new("test", "demo", Cow::Borrowed("k1")).unwrap();
        assert_eq!(borrowed, owned);
        assert_eq!(borrowed, cow);
        assert_eq!(borrowed.partition_id(), cow.partition_id());
    }

    #[test]
    fn test_key_from_digest_equals_original() {
        let key = Key::new("test", "demo", 42i64).unwrap();
        let copy = Key::from_digest("test", "demo", *key.digest()).unwrap();
        assert_eq!(key, copy);
        assert!(copy.user_key().is_none());
    }

    #[test]
    fn test_key_namespace_validation() {
        assert_eq!(Key::new("", "demo", "k").unwrap_err(), ArgumentError::EmptyNamespace);
        let long = "n".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            Key::new(long, "demo", "k"),
            Err(ArgumentError::NameTooLong { field: "namespace", .. })
        ));
    }

    #[test]
    fn test_partition_id_in_range() {
        for i in 0..1000i64 {
            let key = Key::new("test", "demo", i).unwrap();
            assert!(key.partition_id() < PARTITIONS);
        }
    }

    #[test]
    fn test_host_parse_forms() {
        assert_eq!(Host::parse("db1", DEFAULT_PORT).unwrap(), Host::new("db1", 3000));
        assert_eq!(Host::parse(" db1:4000 ", DEFAULT_PORT).unwrap(), Host::new("db1", 4000));
        assert_eq!(Host::parse("[::1]:4000", DEFAULT_PORT).unwrap(), Host::new("::1", 4000));
        assert_eq!(Host::parse("[::1]", DEFAULT_PORT).unwrap(), Host::new("::1", 3000));
        assert_eq!(Host::parse("::1", DEFAULT_PORT).unwrap(), Host::new("::1", 3000));
        assert!(Host::parse("", DEFAULT_PORT).is_err());
        assert!(Host::parse("db1:notaport", DEFAULT_PORT).is_err());
        assert!(Host::parse("db1:0", DEFAULT_PORT).is_err());
        assert!(Host::parse(":4000", DEFAULT_PORT).is_err());
    }

    #[test]
    fn test_host_display() {
        assert_eq!(Host::new("db1", 3000).to_string(), "db1:3000");
        assert_eq!(Host::new("::1", 3000).to_string(), "[::1]:3000");
    }

    #[test]
    fn test_bin_validation() {
        assert!(Bin::new("ok", 1i64).validate().is_ok());
        assert_eq!(Bin::new("", 1i64).validate(), Err(ArgumentError::EmptyBinName));
        assert!(matches!(
            Bin::new("x".repeat(MAX_BIN_NAME_LEN + 1), 1i64).validate(),
            Err(ArgumentError::BinNameTooLong(_))
        ));
        let bad = Bin::new("b", Value::Unsupported { particle_type: 42, bytes: vec![] });
        assert_eq!(bad.validate(), Err(ArgumentError::UnsupportedValue(42)));
    }
}
