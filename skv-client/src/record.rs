use std::collections::HashMap;

use skv_common::{Key, Value};

/// A record as returned by a read.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: Option<Key>,
    pub bins: HashMap<String, Value>,
    /// Bumped by the server on every write.
    pub generation: u32,
    /// Server-side expiration, 0 when the record never expires.
    pub expiration: u32,
}

impl Record {
    pub fn bin(&self, name: &str) -> Option<&Value> {
        self.bins.get(name)
    }
}
