//! # Bin Values
//!
//! Closed set of value shapes a bin can hold. Lists and maps nest up to
//! `MAX_NESTING_DEPTH` levels and map keys may be any value, so `Value` carries a total
//! order (floats via `total_cmp`) and can key a `BTreeMap`.
//!
//! Type order, lowest first:
//!
//! ```text
//! Nil < Bool < Int < String < List < Map < Blob < Float < GeoJson < Unsupported
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::ArgumentError;
use crate::particle::MAX_NESTING_DEPTH;

/// Particle type bytes used on the wire.
pub mod particle_types {
    pub const NIL: u8 = 0;
    pub const INTEGER: u8 = 1;
    pub const FLOAT: u8 = 2;
    pub const STRING: u8 = 3;
    pub const BLOB: u8 = 4;
    pub const BOOL: u8 = 17;
    pub const MAP: u8 = 19;
    pub const LIST: u8 = 20;
    pub const GEOJSON: u8 = 23;
}

/// A bin value.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Blob(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<Value, Value>),
    GeoJson(String),
    /// Particle the client cannot interpret. Decoded as raw bytes; never sent.
    Unsupported { particle_type: u8, bytes: Vec<u8> },
}

impl Value {
    /// Wire particle type for this value.
    pub fn particle_type(&self) -> u8 {
        match self {
            Value::Nil => particle_types::NIL,
            Value::Bool(_) => particle_types::BOOL,
            Value::Int(_) => particle_types::INTEGER,
            Value::Float(_) => particle_types::FLOAT,
            Value::String(_) => particle_types::STRING,
            Value::Blob(_) => particle_types::BLOB,
            Value::List(_) => particle_types::LIST,
            Value::Map(_) => particle_types::MAP,
            Value::GeoJson(_) => particle_types::GEOJSON,
            Value::Unsupported { particle_type, .. } => *particle_type,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Nil => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::String(_) => 3,
            Value::List(_) => 4,
            Value::Map(_) => 5,
            Value::Blob(_) => 6,
            Value::Float(_) => 7,
            Value::GeoJson(_) => 8,
            Value::Unsupported { .. } => 9,
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) | Value::GeoJson(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<Value, Value>> {
        match self {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Returns true when the value (and everything nested in it) can be sent.
    pub fn is_sendable(&self) -> bool {
        self.check_sendable().is_ok()
    }

    /// Rejects values a node would refuse: unsupported particles anywhere in
    /// the tree, or containers nested deeper than `MAX_NESTING_DEPTH`.
    pub fn check_sendable(&self) -> Result<(), ArgumentError> {
        self.check_sendable_at(0)
    }

    fn check_sendable_at(&self, depth: usize) -> Result<(), ArgumentError> {
        match self {
            Value::Unsupported { particle_type, .. } => Err(ArgumentError::UnsupportedValue(*particle_type)),
            Value::List(_) | Value::Map(_) if depth >= MAX_NESTING_DEPTH => {
                Err(ArgumentError::NestingTooDeep(MAX_NESTING_DEPTH))
            }
            Value::List(items) => items.iter().try_for_each(|item| item.check_sendable_at(depth + 1)),
            Value::Map(entries) => entries.iter().try_for_each(|(k, v)| {
                k.check_sendable_at(depth + 1)?;
                v.check_sendable_at(depth + 1)
            }),
            _ => Ok(()),
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Nil, Value::Nil) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::GeoJson(a), Value::GeoJson(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.iter().cmp(b.iter()),
            (
                Value::Unsupported { particle_type: ta, bytes: a },
                Value::Unsupported { particle_type: tb, bytes: b },
            ) => ta.cmp(tb).then_with(|| a.cmp(b)),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Equality follows the total order so NaN == NaN and maps behave.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            Value::Nil => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::String(v) | Value::GeoJson(v) => v.hash(state),
            Value::Blob(v) => v.hash(state),
            Value::List(v) => v.hash(state),
            Value::Map(v) => {
                v.len().hash(state);
                for (k, val) in v {
                    k.hash(state);
                    val.hash(state);
                }
            }
            Value::Unsupported { particle_type, bytes } => {
                particle_type.hash(state);
                bytes.hash(state);
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::GeoJson(v) => write!(f, "geojson({v})"),
            Value::Blob(v) if v.len() <= 32 => write!(f, "blob({v:?})"),
            Value::Blob(v) => write!(f, "blob({}B)", v.len()),
            Value::List(v) => f.debug_list().entries(v).finish(),
            Value::Map(v) => f.debug_map().entries(v).finish(),
            Value::Unsupported { particle_type, bytes } => {
                write!(f, "unsupported(type={particle_type}, {}B)", bytes.len())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(v) => write!(f, "{v}"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<BTreeMap<Value, Value>> for Value {
    fn from(v: BTreeMap<Value, Value>) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Nil)
    }
}

impl<K: Into<Value>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
