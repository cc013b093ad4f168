//! # Value Encoding
//!
//! Purpose: Serialize bin values into wire particles and back.
//!
//! ## Design Principles
//! 1. **Flat Scalars**: Top-level scalars are written raw; the particle type
//!    travels in the op header and the length is implied by the op size.
//! 2. **Self-Describing Nesting**: List and map payloads use a tagged,
//!    length-prefixed encoding so nil entries, nested containers and
//!    non-string map keys survive a round trip unchanged.
//! 3. **Bounded Recursion**: Decoding refuses nesting deeper than
//!    `MAX_NESTING_DEPTH` instead of overflowing the stack.
//!
//! ## Nested Layout
//!
//! ```text
//! nil     : tag
//! bool    : tag | u8
//! int     : tag | i64 BE
//! float   : tag | f64 BE
//! string  : tag | len:u32 | utf-8 bytes     (also blob, geojson)
//! list    : tag | count:u32 | item*
//! map     : tag | count:u32 | (key value)*
//! ```

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ArgumentError, ProtocolError};
use crate::value::{particle_types as particle, Value};

/// Maximum container nesting accepted by the decoder.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Writes the payload of a top-level particle (without type byte).
pub fn encode_particle(value: &Value, out: &mut BytesMut) -> Result<(), ProtocolError> {
    match value {
        Value::Nil => {}
        Value::Bool(v) => out.put_u8(*v as u8),
        Value::Int(v) => out.put_i64(*v),
        Value::Float(v) => out.put_f64(*v),
        Value::String(v) | Value::GeoJson(v) => out.put_slice(v.as_bytes()),
        Value::Blob(v) => out.put_slice(v),
        Value::List(items) => {
            out.put_u32(items.len() as u32);
            for item in items {
                pack_value(item, out)?;
            }
        }
        Value::Map(entries) => {
            out.put_u32(entries.len() as u32);
            for (k, v) in entries {
                pack_value(k, out)?;
                pack_value(v, out)?;
            }
        }
        Value::Unsupported { particle_type, .. } => {
            return Err(ArgumentError::UnsupportedValue(*particle_type).into());
        }
    }
    Ok(())
}

/// Reads a top-level particle of `particle_type` spanning all of `data`.
///
/// Unknown particle types decode to `Value::Unsupported` rather than failing,
/// so a record holding a newer type can still be read.
pub fn decode_particle(particle_type: u8, data: &[u8]) -> Result<Value, ProtocolError> {
    let mut buf = data;
    let value = match particle_type {
        particle::NIL => Value::Nil,
        particle::BOOL => {
            need(&buf, 1)?;
            Value::Bool(buf.get_u8() != 0)
        }
        particle::INTEGER => {
            need(&buf, 8)?;
            Value::Int(buf.get_i64())
        }
        particle::FLOAT => {
            need(&buf, 8)?;
            Value::Float(buf.get_f64())
        }
        particle::STRING => {
            let s = utf8(buf, "string particle")?;
            buf = &[];
            Value::String(s)
        }
        particle::GEOJSON => {
            let s = utf8(buf, "geojson particle")?;
            buf = &[];
            Value::GeoJson(s)
        }
        particle::BLOB => {
            let b = buf.to_vec();
            buf = &[];
            Value::Blob(b)
        }
        particle::LIST => {
            need(&buf, 4)?;
            let count = buf.get_u32() as usize;
            Value::List(unpack_list(&mut buf, count, 1)?)
        }
        particle::MAP => {
            need(&buf, 4)?;
            let count = buf.get_u32() as usize;
            Value::Map(unpack_map(&mut buf, count, 1)?)
        }
        other => {
            return Ok(Value::Unsupported {
                particle_type: other,
                bytes: data.to_vec(),
            })
        }
    };
    if buf.has_remaining() {
        return Err(ProtocolError::Malformed("trailing particle bytes"));
    }
    Ok(value)
}

/// Writes one nested value with its tag.
pub fn pack_value(value: &Value, out: &mut BytesMut) -> Result<(), ProtocolError> {
    out.put_u8(value.particle_type());
    match value {
        Value::String(v) | Value::GeoJson(v) => {
            out.put_u32(v.len() as u32);
            out.put_slice(v.as_bytes());
            Ok(())
        }
        Value::Blob(v) => {
            out.put_u32(v.len() as u32);
            out.put_slice(v);
            Ok(())
        }
        other => encode_particle(other, out),
    }
}

/// Reads one nested value with its tag.
pub fn unpack_value(buf: &mut &[u8], depth: usize) -> Result<Value, ProtocolError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ProtocolError::Malformed("value nesting too deep"));
    }
    need(buf, 1)?;
    let tag = buf.get_u8();
    match tag {
        particle::NIL => Ok(Value::Nil),
        particle::BOOL => {
            need(buf, 1)?;
            Ok(Value::Bool(buf.get_u8() != 0))
        }
        particle::INTEGER => {
            need(buf, 8)?;
            Ok(Value::Int(buf.get_i64()))
        }
        particle::FLOAT => {
            need(buf, 8)?;
            Ok(Value::Float(buf.get_f64()))
        }
        particle::STRING => Ok(Value::String(utf8(take_sized(buf)?, "nested string")?)),
        particle::GEOJSON => Ok(Value::GeoJson(utf8(take_sized(buf)?, "nested geojson")?)),
        particle::BLOB => Ok(Value::Blob(take_sized(buf)?.to_vec())),
        particle::LIST => {
            need(buf, 4)?;
            let count = buf.get_u32() as usize;
            Ok(Value::List(unpack_list(buf, count, depth + 1)?))
        }
        particle::MAP => {
            need(buf, 4)?;
            let count = buf.get_u32() as usize;
            Ok(Value::Map(unpack_map(buf, count, depth + 1)?))
        }
        other => Err(ProtocolError::UnknownParticle(other)),
    }
}

fn unpack_list(buf: &mut &[u8], count: usize, depth: usize) -> Result<Vec<Value>, ProtocolError> {
    // Every item takes at least one byte; reject counts the buffer cannot hold.
    if count > buf.remaining() {
        return Err(ProtocolError::Truncated);
    }
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(unpack_value(buf, depth)?);
    }
    Ok(items)
}

fn unpack_map(
    buf: &mut &[u8],
    count: usize,
    depth: usize,
) -> Result<BTreeMap<Value, Value>, ProtocolError> {
    if count.saturating_mul(2) > buf.remaining() {
        return Err(ProtocolError::Truncated);
    }
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let key = unpack_value(buf, depth)?;
        let value = unpack_value(buf, depth)?;
        entries.insert(key, value);
    }
    Ok(entries)
}

fn take_sized<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], ProtocolError> {
    need(buf, 4)?;
    let len = buf.get_u32() as usize;
    need(buf, len)?;
    let slice: &'a [u8] = *buf;
    let (head, tail) = slice.split_at(len);
    *buf = tail;
    Ok(head)
}

#[inline]
fn need(buf: &&[u8], len: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated);
    }
    Ok(())
}

fn utf8(data: &[u8], what: &'static str) -> Result<String, ProtocolError> {
    String::from_utf8(data.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Value) -> Value {
        let mut out = BytesMut::new();
        encode_particle(&value, &mut out).unwrap();
        decode_particle(value.particle_type(), &out).unwrap()
    }

    #[test]
    fn nested_structures_survive() {
        let inner: Value = vec![
            (Value::Int(7), Value::List(vec![Value::Nil, Value::Float(0.5)])),
            (Value::from("k"), Value::Blob(vec![1, 2, 3])),
        ]
        .into_iter()
        .collect();
        let value = Value::List(vec![
            Value::Nil,
            Value::Bool(true),
            Value::from("text"),
            inner,
            Value::GeoJson("{\"type\":\"Point\"}".into()),
        ]);
        assert_eq!(round_trip(value.clone()), value);
    }

    #[test]
    fn scalars_survive() {
        for value in [
            Value::Int(-42),
            Value::Float(3.25),
            Value::from("héllo"),
            Value::Blob(vec![0, 255]),
            Value::Bool(false),
            Value::Nil,
        ] {
            assert_eq!(round_trip(value.clone()), value);
        }
    }

    #[test]
    fn unknown_top_level_particle_is_kept_raw() {
        let value = decode_particle(99, &[1, 2]).unwrap();
        assert_eq!(
            value,
            Value::Unsupported {
                particle_type: 99,
                bytes: vec![1, 2]
            }
        );
    }

    #[test]
    fn unsupported_value_is_rejected_on_encode() {
        let mut out = BytesMut::new();
        let err = encode_particle(
            &Value::List(vec![Value::Unsupported { particle_type: 9, bytes: vec![] }]),
            &mut out,
        )
        .unwrap_err();
        assert_eq!(err, ProtocolError::Argument(ArgumentError::UnsupportedValue(9)));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        assert_eq!(decode_particle(particle::INTEGER, &[0, 1]), Err(ProtocolError::Truncated));
        assert_eq!(
            decode_particle(particle::LIST, &[0, 0, 0, 200]),
            Err(ProtocolError::Truncated)
        );
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        let mut value = Value::Nil;
        for _ in 0..(MAX_NESTING_DEPTH + 2) {
            value = Value::List(vec![value]);
        }
        let mut out = BytesMut::new();
        encode_particle(&value, &mut out).unwrap();
        assert!(decode_particle(particle::LIST, &out).is_err());
    }
}
