//! # In-Memory Record Store
//!
//! Purpose: Hold the records a reference node serves and apply command
//! bodies to them with the semantics clients rely on.
//!
//! ## Design Principles
//!
//! 1. **Sharded Locks**: Records are spread over `RwLock` shards by partition
//!    id, so unrelated keys rarely contend.
//! 2. **Working Copy**: A write runs all of its ops against a clone of the
//!    record and commits once; a failed op leaves the stored record untouched.
//! 3. **One Generation Bump**: A committed write increments the generation
//!    exactly once, however many ops it carried.
//! 4. **TTL Fast Path**: Expiration is checked on access; expired records
//!    read as missing and are dropped under the same lock.
//!
//! ## Structure Overview
//!
//! ```text
//! RecordStore
//!   └── shards: Vec<RwLock<HashMap<(namespace, Digest), StoredRecord>>>
//!         └── StoredRecord { bins: BTreeMap<String, Value>, generation, expires_at }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use skv_common::{
    info1, info2, BatchItem, BatchRecord, Digest, MapReturnType, MapSubOp, Message, OpCode, ResultCode,
    Value, WireOp,
};

/// Shard count used by `RecordStore::new`.
const DEFAULT_SHARD_COUNT: usize = 16;

/// Header expiration: keep the record's current TTL.
const EXPIRATION_DONT_UPDATE: u32 = u32::MAX - 1;
/// Header expiration: never expire.
const EXPIRATION_NEVER: u32 = u32::MAX;

type RecordKey = (String, Digest);

#[derive(Debug, Clone, Default)]
struct StoredRecord {
    bins: BTreeMap<String, Value>,
    generation: u32,
    expires_at: Option<Instant>,
}

impl StoredRecord {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }

    /// Remaining lifetime in whole seconds, rounded up; 0 when the record
    /// never expires.
    fn ttl_secs(&self, now: Instant) -> u32 {
        match self.expires_at {
            None => 0,
            Some(deadline) => {
                let left = deadline.saturating_duration_since(now);
                let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
                secs.clamp(1, u64::from(u32::MAX - 2)) as u32
            }
        }
    }

    fn apply_expiration(&mut self, wire: u32, now: Instant) {
        match wire {
            EXPIRATION_DONT_UPDATE => {}
            0 | EXPIRATION_NEVER => self.expires_at = None,
            secs => self.expires_at = Some(now + Duration::from_secs(u64::from(secs))),
        }
    }

    fn bin_ops(&self) -> impl Iterator<Item = WireOp> + '_ {
        self.bins
            .iter()
            .map(|(name, value)| WireOp::new(OpCode::Read, name.as_str(), value.clone()))
    }
}

/// Sharded map from `(namespace, digest)` to record.
#[derive(Debug)]
pub struct RecordStore {
    shards: Vec<RwLock<HashMap<RecordKey, StoredRecord>>>,
    shard_mask: usize,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    pub fn new() -> Self {
        Self::with_shard_count(DEFAULT_SHARD_COUNT)
    }

    /// Rounds `shards` up to a power of two.
    pub fn with_shard_count(shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        RecordStore {
            shards: (0..count).map(|_| RwLock::new(HashMap::new())).collect(),
            shard_mask: count - 1,
        }
    }

    #[inline]
    fn shard(&self, digest: &Digest) -> &RwLock<HashMap<RecordKey, StoredRecord>> {
        &self.shards[digest.partition_id() & self.shard_mask]
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.shards
            .iter()
            .map(|shard| shard.read().values().filter(|r| !r.is_expired(now)).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }

    /// Stored generation of a live record.
    pub fn generation(&self, namespace: &str, digest: &Digest) -> Option<u32> {
        let now = Instant::now();
        self.shard(digest)
            .read()
            .get(&(namespace.to_string(), *digest))
            .filter(|r| !r.is_expired(now))
            .map(|r| r.generation)
    }

    /// Applies one command body and builds the reply.
    pub fn execute(&self, request: &Message) -> Message {
        let (namespace, digest) = match (request.namespace(), request.digest()) {
            (Ok(namespace), Ok(digest)) => (namespace, digest),
            _ => return Message::response(ResultCode::ParameterError),
        };
        let key = (namespace.to_string(), digest);
        let now = Instant::now();

        let mut shard = self.shard(&digest).write();
        if shard.get(&key).is_some_and(|r| r.is_expired(now)) {
            shard.remove(&key);
        }

        if request.info2 & info2::WRITE == 0 {
            return match shard.get(&key) {
                Some(record) => read(record, request, now),
                None => Message::response(ResultCode::KeyNotFound),
            };
        }

        let existing = shard.get(&key);
        if request.info2 & info2::GENERATION != 0 {
            let current = existing.map_or(0, |r| r.generation);
            if current != request.generation {
                return Message::response(ResultCode::GenerationError);
            }
        }
        if request.info2 & info2::DELETE != 0 {
            return match shard.remove(&key) {
                Some(_) => Message::response(ResultCode::Ok),
                None => Message::response(ResultCode::KeyNotFound),
            };
        }

        let mut live = existing.is_some();
        let mut working = existing.cloned().unwrap_or_default();
        let results = match run_ops(&mut working, &request.ops, &mut live) {
            Ok(results) => results,
            Err(code) => return Message::response(code),
        };

        let mut reply = Message::response(ResultCode::Ok);
        reply.ops = results;
        if !live || working.bins.is_empty() {
            shard.remove(&key);
            return reply;
        }

        working.generation = next_generation(working.generation);
        working.apply_expiration(request.expiration, now);
        reply.generation = working.generation;
        reply.expiration = working.ttl_secs(now);
        if wants_all_bins(request.info1) {
            reply.ops.extend(working.bin_ops());
        }
        shard.insert(key, working);
        reply
    }

    /// Looks up one batch item.
    pub fn read_batch_item(&self, request_info1: u8, item: &BatchItem) -> BatchRecord {
        let now = Instant::now();
        let shard = self.shard(&item.digest).read();
        let record = shard
            .get(&(item.namespace.clone(), item.digest))
            .filter(|r| !r.is_expired(now));

        let Some(record) = record else {
            return BatchRecord {
                index: item.index,
                result_code: ResultCode::KeyNotFound.as_u8(),
                ..BatchRecord::default()
            };
        };

        let bins = if request_info1 & info1::NOBINDATA != 0 {
            Vec::new()
        } else if request_info1 & info1::GET_ALL != 0 {
            record.bin_ops().collect()
        } else {
            item.bin_names
                .iter()
                .filter_map(|name| {
                    record
                        .bins
                        .get(name)
                        .map(|value| WireOp::new(OpCode::Read, name.as_str(), value.clone()))
                })
                .collect()
        };
        BatchRecord {
            index: item.index,
            result_code: ResultCode::Ok.as_u8(),
            generation: record.generation,
            expiration: record.ttl_secs(now),
            bins,
        }
    }
}

fn wants_all_bins(info1: u8) -> bool {
    info1 & info1::GET_ALL != 0 && info1 & info1::NOBINDATA == 0
}

/// Generation after a committed write; never 0 for a live record.
fn next_generation(generation: u32) -> u32 {
    match generation.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}

fn read(record: &StoredRecord, request: &Message, now: Instant) -> Message {
    let mut reply = Message::response(ResultCode::Ok);
    reply.generation = record.generation;
    reply.expiration = record.ttl_secs(now);
    if request.info1 & info1::NOBINDATA != 0 {
        return reply;
    }

    if request.ops.iter().any(|op| op.op.is_write()) {
        return Message::response(ResultCode::ParameterError);
    }
    let mut scratch = record.clone();
    let mut live = true;
    match run_ops(&mut scratch, &request.ops, &mut live) {
        Ok(results) => reply.ops = results,
        Err(code) => return Message::response(code),
    }
    if wants_all_bins(request.info1) {
        reply.ops.extend(record.bin_ops());
    }
    reply
}

/// Applies `ops` in order; later ops observe earlier effects.
///
/// `live` tracks whether the record exists at each step.
fn run_ops(record: &mut StoredRecord, ops: &[WireOp], live: &mut bool) -> Result<Vec<WireOp>, ResultCode> {
    let mut results = Vec::new();
    for op in ops {
        match op.op {
            OpCode::Read => {
                if let Some(value) = record.bins.get(&op.name) {
                    results.push(WireOp::new(OpCode::Read, op.name.as_str(), value.clone()));
                }
            }
            OpCode::Write => {
                if op.value.is_nil() {
                    record.bins.remove(&op.name);
                } else {
                    record.bins.insert(op.name.clone(), op.value.clone());
                    *live = true;
                }
            }
            OpCode::Add => {
                let merged = add(record.bins.get(&op.name), &op.value)?;
                record.bins.insert(op.name.clone(), merged);
                *live = true;
            }
            OpCode::Append | OpCode::Prepend => {
                let merged = concat(record.bins.get(&op.name), &op.value, op.op == OpCode::Append)?;
                record.bins.insert(op.name.clone(), merged);
                *live = true;
            }
            OpCode::Touch => {
                if !*live {
                    return Err(ResultCode::KeyNotFound);
                }
            }
            OpCode::Delete => {
                record.bins.clear();
                *live = false;
            }
            OpCode::MapRead | OpCode::MapModify => {
                if let Some(value) = apply_map(&mut record.bins, op)? {
                    results.push(WireOp::new(op.op, op.name.as_str(), value));
                }
                if op.op == OpCode::MapModify {
                    *live = true;
                }
            }
        }
    }
    Ok(results)
}

fn add(current: Option<&Value>, operand: &Value) -> Result<Value, ResultCode> {
    match (current, operand) {
        (None, Value::Int(_) | Value::Float(_)) => Ok(operand.clone()),
        (Some(Value::Int(a)), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (Some(Value::Float(a)), Value::Float(b)) => Ok(Value::Float(a + b)),
        _ => Err(ResultCode::BinTypeError),
    }
}

fn concat(current: Option<&Value>, operand: &Value, append: bool) -> Result<Value, ResultCode> {
    match (current, operand) {
        (None, Value::String(_) | Value::Blob(_)) => Ok(operand.clone()),
        (Some(Value::String(a)), Value::String(b)) => Ok(Value::String(if append {
            format!("{a}{b}")
        } else {
            format!("{b}{a}")
        })),
        (Some(Value::Blob(a)), Value::Blob(b)) => {
            let (head, tail) = if append { (a, b) } else { (b, a) };
            let mut out = Vec::with_capacity(head.len() + tail.len());
            out.extend_from_slice(head);
            out.extend_from_slice(tail);
            Ok(Value::Blob(out))
        }
        _ => Err(ResultCode::BinTypeError),
    }
}

/// One map entry picked by key, index or rank.
struct Selected {
    index: usize,
    rank: usize,
    key: Value,
    value: Value,
}

/// Runs a map sub-operation carried as `[sub_op, return_type, args...]`.
///
/// A missing bin behaves as an empty map; any other non-map bin is a type
/// error. Returns `None` when the return type asks for nothing.
fn apply_map(bins: &mut BTreeMap<String, Value>, op: &WireOp) -> Result<Option<Value>, ResultCode> {
    let (sub_op, return_type, args) = match op.value.as_list() {
        Some([Value::Int(sub_op), Value::Int(return_type), args @ ..]) => {
            let sub_op = u8::try_from(*sub_op)
                .ok()
                .and_then(|code| MapSubOp::from_u8(code).ok())
                .ok_or(ResultCode::ParameterError)?;
            let return_type = u8::try_from(*return_type)
                .ok()
                .and_then(|code| MapReturnType::from_u8(code).ok())
                .ok_or(ResultCode::ParameterError)?;
            (sub_op, return_type, args)
        }
        _ => return Err(ResultCode::ParameterError),
    };
    if sub_op.is_write() != (op.op == OpCode::MapModify) {
        return Err(ResultCode::ParameterError);
    }

    let mut map = match bins.get(&op.name) {
        None => BTreeMap::new(),
        Some(Value::Map(map)) => map.clone(),
        Some(_) => return Err(ResultCode::BinTypeError),
    };

    let result = match (sub_op, args) {
        (MapSubOp::Size, []) => Some(Value::Int(map.len() as i64)),
        (MapSubOp::Put, [key, value]) => {
            map.insert(key.clone(), value.clone());
            Some(Value::Int(map.len() as i64))
        }
        (MapSubOp::Clear, []) => {
            map.clear();
            None
        }
        (MapSubOp::RemoveByKey, [key]) => {
            let selected = select_key(&map, key);
            map.remove(key);
            Some(entry_result(selected, return_type))
        }
        (MapSubOp::GetByKey, [key]) => Some(entry_result(select_key(&map, key), return_type)),
        (MapSubOp::GetByIndex, [Value::Int(index)]) => {
            let selected = resolve_position(*index, map.len()).and_then(|i| select_index(&map, i));
            Some(entry_result(selected, return_type))
        }
        (MapSubOp::GetByRank, [Value::Int(rank)]) => {
            let selected = resolve_position(*rank, map.len()).and_then(|r| select_rank(&map, r));
            Some(entry_result(selected, return_type))
        }
        _ => return Err(ResultCode::ParameterError),
    };

    if sub_op.is_write() {
        bins.insert(op.name.clone(), Value::Map(map));
    }
    Ok(result.filter(|_| return_type != MapReturnType::None))
}

/// Negative positions count from the end.
fn resolve_position(pos: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let pos = if pos < 0 { len + pos } else { pos };
    (0..len).contains(&pos).then_some(pos as usize)
}

/// Keys ordered by `(value, key)`.
fn rank_order(map: &BTreeMap<Value, Value>) -> Vec<(&Value, &Value)> {
    let mut entries: Vec<(&Value, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
    entries
}

fn selected(map: &BTreeMap<Value, Value>, key: &Value, value: &Value) -> Option<Selected> {
    let index = map.keys().position(|k| k == key)?;
    let rank = rank_order(map).iter().position(|(k, _)| *k == key)?;
    Some(Selected {
        index,
        rank,
        key: key.clone(),
        value: value.clone(),
    })
}

fn select_key(map: &BTreeMap<Value, Value>, key: &Value) -> Option<Selected> {
    let value = map.get(key)?;
    selected(map, key, value)
}

fn select_index(map: &BTreeMap<Value, Value>, index: usize) -> Option<Selected> {
    let (key, value) = map.iter().nth(index)?;
    selected(map, key, value)
}

fn select_rank(map: &BTreeMap<Value, Value>, rank: usize) -> Option<Selected> {
    let order = rank_order(map);
    let (key, value) = order.get(rank)?;
    selected(map, key, value)
}

fn entry_result(entry: Option<Selected>, return_type: MapReturnType) -> Value {
    match (entry, return_type) {
        (_, MapReturnType::None) => Value::Nil,
        (Some(e), MapReturnType::Index) => Value::Int(e.index as i64),
        (Some(e), MapReturnType::Rank) => Value::Int(e.rank as i64),
        (Some(_), MapReturnType::Count) => Value::Int(1),
        (Some(e), MapReturnType::Key) => e.key,
        (Some(e), MapReturnType::Value) => e.value,
        (Some(e), MapReturnType::KeyValue) => Value::Map(BTreeMap::from([(e.key, e.value)])),
        (None, MapReturnType::Count) => Value::Int(0),
        (None, MapReturnType::KeyValue) => Value::Map(BTreeMap::new()),
        (None, _) => Value::Nil,
    }
}
