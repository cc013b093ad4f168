//! # Command Encoding
//!
//! Purpose: Build the request `Message` for each record operation under a
//! resolved policy, and turn replies back into records.
//!
//! ## Design Principles
//! 1. **Validate Before I/O**: Every builder checks names and values and
//!    returns `ArgumentError` before anything touches the network.
//! 2. **Flags Over Variants**: Read/write intent, generation checks and
//!    durable deletes travel as `info1`/`info2` bits, not separate commands.
//! 3. **Policy-Shaped Replies**: Repeated reads of a bin are reported per
//!    `RecordBinMultiplicity`.

use std::collections::HashMap;

use skv_common::{
    info1, info2, validate_bin_name, ArgumentError, Bin, Field, FieldType, Key, Message, OpCode,
    ResultCode, Value, WireOp,
};

use crate::error::{ClientError, ClientResult};
use crate::operation::Operation;
use crate::policy::{GenerationPolicy, Policy, RecordBinMultiplicity};
use crate::record::Record;

fn base_message(key: &Key, policy: &Policy, write: bool) -> Result<Message, ArgumentError> {
    let mut fields = vec![Field::new(FieldType::Namespace, key.namespace())];
    if !key.set().is_empty() {
        fields.push(Field::new(FieldType::Set, key.set()));
    }
    fields.push(Field::new(FieldType::Digest, key.digest().as_bytes().to_vec()));
    if write && policy.send_key {
        if let Some(user_key) = key.user_key() {
            let field = Field::user_key(&user_key.to_value()).map_err(|err| match err {
                skv_common::ProtocolError::Argument(arg) => arg,
                other => ArgumentError::Invalid(other.to_string()),
            })?;
            fields.push(field);
        }
    }

    let mut message = Message {
        timeout_ms: policy.timeout_ms(),
        fields,
        ..Message::default()
    };
    if write {
        message.info2 |= info2::WRITE;
        message.expiration = policy.expiration.to_wire();
        if let GenerationPolicy::ExpectEqual(generation) = policy.generation {
            message.info2 |= info2::GENERATION;
            message.generation = generation;
        }
    }
    Ok(message)
}

/// Put, append, prepend and add share this shape: one op per bin.
pub(crate) fn write_bins(key: &Key, policy: &Policy, op: OpCode, bins: &[Bin]) -> Result<Message, ArgumentError> {
    if bins.is_empty() {
        return Err(ArgumentError::Invalid("at least one bin is required".into()));
    }
    let mut message = base_message(key, policy, true)?;
    for bin in bins {
        bin.validate()?;
        message.ops.push(WireOp::new(op, bin.name.as_str(), bin.value.clone()));
    }
    Ok(message)
}

/// Reads every bin, or only `bins` when given.
pub(crate) fn read(key: &Key, policy: &Policy, bins: Option<&[&str]>) -> Result<Message, ArgumentError> {
    let mut message = base_message(key, policy, false)?;
    message.info1 = info1::READ;
    match bins {
        None => message.info1 |= info1::GET_ALL,
        Some(names) => {
            for name in names {
                validate_bin_name(name)?;
                message.ops.push(WireOp::new(OpCode::Read, *name, Value::Nil));
            }
        }
    }
    Ok(message)
}

/// Metadata-only read; also serves `exists`.
pub(crate) fn read_header(key: &Key, policy: &Policy) -> Result<Message, ArgumentError> {
    let mut message = base_message(key, policy, false)?;
    message.info1 = info1::READ | info1::NOBINDATA;
    Ok(message)
}

pub(crate) fn delete(key: &Key, policy: &Policy) -> Result<Message, ArgumentError> {
    let mut message = base_message(key, policy, true)?;
    message.info2 |= info2::DELETE;
    if policy.durable_delete {
        message.info2 |= info2::DURABLE_DELETE;
    }
    Ok(message)
}

pub(crate) fn touch(key: &Key, policy: &Policy) -> Result<Message, ArgumentError> {
    let mut message = base_message(key, policy, true)?;
    message.ops.push(WireOp::new(OpCode::Touch, "", Value::Nil));
    Ok(message)
}

/// Ordered multi-operation command.
pub(crate) fn operate(key: &Key, policy: &Policy, ops: &[Operation]) -> Result<Message, ArgumentError> {
    if ops.is_empty() {
        return Err(ArgumentError::Invalid("operate needs at least one operation".into()));
    }
    let write = ops.iter().any(Operation::is_write);
    let mut message = base_message(key, policy, write)?;

    let mut reads_bins = false;
    for op in ops {
        match op {
            Operation::Get(None) => {
                message.info1 |= info1::READ | info1::GET_ALL;
                reads_bins = true;
            }
            Operation::GetHeader => message.info1 |= info1::READ,
            Operation::Delete if policy.durable_delete => message.info2 |= info2::DURABLE_DELETE,
            op if op.is_read() => {
                message.info1 |= info1::READ;
                reads_bins = true;
            }
            _ => {}
        }
        if let Some(wire) = op.to_wire()? {
            message.ops.push(wire);
        }
    }
    if message.info1 & info1::READ != 0 && !reads_bins {
        message.info1 |= info1::NOBINDATA;
    }
    Ok(message)
}

/// Fails on any status other than OK.
pub(crate) fn check_result(code: ResultCode) -> ClientResult<()> {
    if code.is_ok() {
        Ok(())
    } else {
        Err(ClientError::from_result_code(code))
    }
}

/// Builds a record from returned ops.
///
/// With `Single` the last value read for a bin wins; with `Array` a bin read
/// more than once becomes a `List` of every value in call order.
pub(crate) fn parse_record(
    key: Option<Key>,
    generation: u32,
    expiration: u32,
    ops: Vec<WireOp>,
    multiplicity: RecordBinMultiplicity,
) -> Record {
    let bins = match multiplicity {
        RecordBinMultiplicity::Single => ops
            .into_iter()
            .filter(|op| !op.name.is_empty())
            .map(|op| (op.name, op.value))
            .collect(),
        RecordBinMultiplicity::Array => {
            let mut reads: HashMap<String, Vec<Value>> = HashMap::new();
            for op in ops.into_iter().filter(|op| !op.name.is_empty()) {
                reads.entry(op.name).or_default().push(op.value);
            }
            reads
                .into_iter()
                .map(|(name, mut values)| {
                    let value = if values.len() == 1 {
                        values.pop().unwrap_or(Value::Nil)
                    } else {
                        Value::List(values)
                    };
                    (name, value)
                })
                .collect()
        }
    };
    Record {
        key,
        bins,
        generation,
        expiration,
    }
}

/// Record from a command reply already known to be OK.
pub(crate) fn record_from_reply(key: &Key, reply: Message, multiplicity: RecordBinMultiplicity) -> Record {
    parse_record(
        Some(key.clone()),
        reply.generation,
        reply.expiration,
        reply.ops,
        multiplicity,
    )
}
