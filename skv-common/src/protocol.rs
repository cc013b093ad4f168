//! # Protocol Structures
//!
//! Purpose: Define the framing and message bodies exchanged between the
//! client and cluster nodes.
//!
//! ## Design Principles
//!
//! 1. **Header + Payload**: Every frame starts with a fixed 8-byte header so
//!    the reader knows the body size before touching it.
//! 2. **One Body Shape**: Command requests and responses share `Message`; a
//!    response simply carries a result code and the returned bins as ops.
//! 3. **Versioned Frames**: The header embeds a magic byte and a protocol
//!    version so mismatched peers fail fast.
//!
//! ## Memory Layout
//!
//! ```text
//! FrameHeader (8 bytes):
//! +--------+---------+--------+----------+-------------+
//! | magic  | version | kind   | reserved | body_len    |
//! +--------+---------+--------+----------+-------------+
//! | 1B     | 1B      | 1B     | 1B       | 4B (BE)     |
//! +--------+---------+--------+----------+-------------+
//!
//! Message body (22 bytes + fields + ops):
//! +-------+-------+-------+--------+------------+------------+------------+
//! | info1 | info2 | info3 | result | generation | expiration | timeout_ms |
//! | 1B    | 1B    | 1B    | 1B     | 4B         | 4B         | 4B         |
//! +-------+-------+-------+--------+------------+------------+------------+
//! | field_count:2B | op_count:2B | fields... | ops...                      |
//! +----------------+-------------+-----------+-----------------------------+
//!
//! Field:  size:4B (type + data) | type:1B | data
//! Op:     size:4B (rest of op)  | op:1B | particle:1B | flags:1B |
//!         name_len:1B | name | value
//!
//! Batch request:  info1:1B | timeout_ms:4B | count:4B | item*
//!   item:         index:4B | digest:20B | ns_len:1B | ns | bin_count:2B |
//!                 (name_len:1B | name)*
//! Batch response: count:4B | item*
//!   item:         index:4B | result:1B | generation:4B | expiration:4B |
//!                 op_count:2B | op*
//!
//! Info request:   name '\n' name '\n' ...
//! Info response:  name '\t' value '\n' ...
//! ```

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ArgumentError, ProtocolError, ResultCode};
use crate::particle::{decode_particle, encode_particle};
use crate::types::{validate_bin_name, Digest, DIGEST_SIZE};
use crate::value::Value;

/// Magic byte opening every frame.
pub const PROTOCOL_MAGIC: u8 = 0xA5;

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Frame header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Largest body a peer may send.
pub const MAX_BODY_SIZE: usize = 128 * 1024 * 1024;

/// Fixed part of a `Message` body: four flag/code bytes, three u32 and two
/// u16 counts.
const MESSAGE_FIXED_SIZE: usize = 4 + 3 * 4 + 2 * 2;

/// Fixed part of one `BatchRecord`: index, result code, generation,
/// expiration and op count.
const BATCH_RECORD_FIXED_SIZE: usize = 4 + 1 + 4 + 4 + 2;

/// Read-side request flags.
pub mod info1 {
    /// The command reads the record.
    pub const READ: u8 = 0b0000_0001;
    /// Return every bin.
    pub const GET_ALL: u8 = 0b0000_0010;
    /// Return metadata only (generation, expiration).
    pub const NOBINDATA: u8 = 0b0000_0100;
}

/// Write-side request flags.
pub mod info2 {
    /// The command modifies the record.
    pub const WRITE: u8 = 0b0000_0001;
    /// Remove the record.
    pub const DELETE: u8 = 0b0000_0010;
    /// Apply only when the stored generation equals `Message::generation`.
    pub const GENERATION: u8 = 0b0000_0100;
    /// Leave a tombstone when deleting.
    pub const DURABLE_DELETE: u8 = 0b0000_1000;
}

/// Frame body kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Info = 1,
    Command = 2,
    Batch = 3,
}

impl MessageKind {
    pub fn from_u8(kind: u8) -> Result<Self, ProtocolError> {
        match kind {
            1 => Ok(MessageKind::Info),
            2 => Ok(MessageKind::Command),
            3 => Ok(MessageKind::Batch),
            other => Err(ProtocolError::UnknownMessageKind(other)),
        }
    }
}

/// Header prepended to every request and response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: MessageKind,
    pub body_len: u32,
}

impl FrameHeader {
    pub const fn new(kind: MessageKind, body_len: u32) -> Self {
        FrameHeader { kind, body_len }
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(PROTOCOL_MAGIC);
        out.put_u8(PROTOCOL_VERSION);
        out.put_u8(self.kind as u8);
        out.put_u8(0);
        out.put_u32(self.body_len);
    }

    /// Validates magic, version, kind and size.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self, ProtocolError> {
        if buf[0] != PROTOCOL_MAGIC {
            return Err(ProtocolError::BadMagic(buf[0]));
        }
        if buf[1] != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(buf[1]));
        }
        let kind = MessageKind::from_u8(buf[2])?;
        let body_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if body_len as usize > MAX_BODY_SIZE {
            return Err(ProtocolError::FrameTooLarge(body_len as usize));
        }
        Ok(FrameHeader { kind, body_len })
    }
}

/// Wraps an encoded body in a frame.
pub fn encode_frame(kind: MessageKind, body: &[u8], out: &mut BytesMut) -> Result<(), ProtocolError> {
    if body.len() > MAX_BODY_SIZE {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }
    out.reserve(HEADER_SIZE + body.len());
    FrameHeader::new(kind, body.len() as u32).encode(out);
    out.put_slice(body);
    Ok(())
}

/// Splits one complete frame off the front of `buf`, if present.
///
/// Returns `Ok(None)` when more bytes are needed.
pub fn split_frame(buf: &mut BytesMut) -> Result<Option<(FrameHeader, BytesMut)>, ProtocolError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }
    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&buf[..HEADER_SIZE]);
    let header = FrameHeader::decode(&raw)?;
    let total = HEADER_SIZE + header.body_len as usize;
    if buf.len() < total {
        buf.reserve(total - buf.len());
        return Ok(None);
    }
    let mut frame = buf.split_to(total);
    frame.advance(HEADER_SIZE);
    Ok(Some((header, frame)))
}

/// Field type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    Namespace = 0,
    Set = 1,
    /// User key: particle type byte followed by the particle.
    Key = 2,
    Digest = 4,
}

impl FieldType {
    pub fn from_u8(code: u8) -> Result<Self, ProtocolError> {
        match code {
            0 => Ok(FieldType::Namespace),
            1 => Ok(FieldType::Set),
            2 => Ok(FieldType::Key),
            4 => Ok(FieldType::Digest),
            other => Err(ProtocolError::UnknownField(other)),
        }
    }
}

/// Metadata field attached to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub kind: FieldType,
    pub data: Vec<u8>,
}

impl Field {
    pub fn new(kind: FieldType, data: impl Into<Vec<u8>>) -> Self {
        Field {
            kind,
            data: data.into(),
        }
    }

    /// Encodes a user key as particle type + particle.
    pub fn user_key(value: &Value) -> Result<Self, ProtocolError> {
        let mut data = BytesMut::new();
        data.put_u8(value.particle_type());
        encode_particle(value, &mut data)?;
        Ok(Field::new(FieldType::Key, data.to_vec()))
    }

    /// Decodes a `FieldType::Key` payload.
    pub fn user_key_value(&self) -> Result<Value, ProtocolError> {
        let (particle_type, data) = self
            .data
            .split_first()
            .ok_or(ProtocolError::Malformed("key field"))?;
        decode_particle(*particle_type, data)
    }
}

/// Operation code of a single op inside a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Read = 1,
    Write = 2,
    MapRead = 3,
    MapModify = 4,
    Add = 5,
    Append = 9,
    Prepend = 10,
    Touch = 11,
    Delete = 14,
}

impl OpCode {
    pub fn from_u8(code: u8) -> Result<Self, ProtocolError> {
        Ok(match code {
            1 => OpCode::Read,
            2 => OpCode::Write,
            3 => OpCode::MapRead,
            4 => OpCode::MapModify,
            5 => OpCode::Add,
            9 => OpCode::Append,
            10 => OpCode::Prepend,
            11 => OpCode::Touch,
            14 => OpCode::Delete,
            other => return Err(ProtocolError::UnknownOperation(other)),
        })
    }

    /// True when the op changes the stored record.
    pub const fn is_write(self) -> bool {
        !matches!(self, OpCode::Read | OpCode::MapRead)
    }
}

/// One op on the wire: request operation or returned bin.
#[derive(Debug, Clone, PartialEq)]
pub struct WireOp {
    pub op: OpCode,
    /// Bin name; empty for record-level ops (touch, delete, read-all).
    pub name: String,
    pub value: Value,
}

impl WireOp {
    pub fn new(op: OpCode, name: impl Into<String>, value: Value) -> Self {
        WireOp {
            op,
            name: name.into(),
            value,
        }
    }

    fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        if !self.name.is_empty() {
            validate_bin_name(&self.name)?;
        }
        let mut payload = BytesMut::new();
        encode_particle(&self.value, &mut payload)?;

        let size = 4 + self.name.len() + payload.len();
        out.put_u32(size as u32);
        out.put_u8(self.op as u8);
        out.put_u8(self.value.particle_type());
        out.put_u8(0);
        out.put_u8(self.name.len() as u8);
        out.put_slice(self.name.as_bytes());
        out.put_slice(&payload);
        Ok(())
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        let size = get_u32(buf)? as usize;
        if size < 4 || buf.remaining() < size {
            return Err(ProtocolError::Truncated);
        }
        let op = OpCode::from_u8(buf.get_u8())?;
        let particle_type = buf.get_u8();
        let _flags = buf.get_u8();
        let name_len = buf.get_u8() as usize;
        if 4 + name_len > size {
            return Err(ProtocolError::Malformed("op name length"));
        }
        let name = std::str::from_utf8(&buf[..name_len])
            .map_err(|_| ProtocolError::InvalidUtf8("bin name"))?
            .to_string();
        buf.advance(name_len);
        let value_len = size - 4 - name_len;
        let value = decode_particle(particle_type, &buf[..value_len])?;
        buf.advance(value_len);
        Ok(WireOp { op, name, value })
    }
}

/// Command request or response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub info1: u8,
    pub info2: u8,
    pub info3: u8,
    pub result_code: u8,
    pub generation: u32,
    pub expiration: u32,
    pub timeout_ms: u32,
    pub fields: Vec<Field>,
    pub ops: Vec<WireOp>,
}

impl Message {
    /// Builds an empty response carrying `code`.
    pub fn response(code: ResultCode) -> Self {
        Message {
            result_code: code.as_u8(),
            ..Message::default()
        }
    }

    #[inline]
    pub fn result(&self) -> ResultCode {
        ResultCode::from_u8(self.result_code)
    }

    /// Finds the first field of `kind`.
    pub fn field(&self, kind: FieldType) -> Option<&Field> {
        self.fields.iter().find(|f| f.kind == kind)
    }

    pub fn namespace(&self) -> Result<&str, ProtocolError> {
        let field = self
            .field(FieldType::Namespace)
            .ok_or(ProtocolError::Malformed("missing namespace field"))?;
        std::str::from_utf8(&field.data).map_err(|_| ProtocolError::InvalidUtf8("namespace"))
    }

    pub fn digest(&self) -> Result<Digest, ProtocolError> {
        let field = self
            .field(FieldType::Digest)
            .ok_or(ProtocolError::Malformed("missing digest field"))?;
        let bytes: [u8; DIGEST_SIZE] = field
            .data
            .as_slice()
            .try_into()
            .map_err(|_| ProtocolError::Malformed("digest field"))?;
        Ok(Digest(bytes))
    }

    pub fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.fields.len() > u16::MAX as usize || self.ops.len() > u16::MAX as usize {
            return Err(ArgumentError::Invalid("too many fields or operations".into()).into());
        }
        out.put_u8(self.info1);
        out.put_u8(self.info2);
        out.put_u8(self.info3);
        out.put_u8(self.result_code);
        out.put_u32(self.generation);
        out.put_u32(self.expiration);
        out.put_u32(self.timeout_ms);
        out.put_u16(self.fields.len() as u16);
        out.put_u16(self.ops.len() as u16);
        for field in &self.fields {
            out.put_u32(1 + field.data.len() as u32);
            out.put_u8(field.kind as u8);
            out.put_slice(&field.data);
        }
        for op in &self.ops {
            op.encode(out)?;
        }
        Ok(())
    }

    /// Decodes a full body. A bare status reply is just the fixed part.
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = body;
        if buf.remaining() < MESSAGE_FIXED_SIZE {
            return Err(ProtocolError::Truncated);
        }
        let mut msg = Message {
            info1: buf.get_u8(),
            info2: buf.get_u8(),
            info3: buf.get_u8(),
            result_code: buf.get_u8(),
            ..Message::default()
        };
        msg.generation = buf.get_u32();
        msg.expiration = buf.get_u32();
        msg.timeout_ms = buf.get_u32();
        let field_count = buf.get_u16() as usize;
        let op_count = buf.get_u16() as usize;

        for _ in 0..field_count {
            let size = get_u32(&mut buf)? as usize;
            if size == 0 || buf.remaining() < size {
                return Err(ProtocolError::Truncated);
            }
            let kind = FieldType::from_u8(buf.get_u8())?;
            let data = buf[..size - 1].to_vec();
            buf.advance(size - 1);
            msg.fields.push(Field { kind, data });
        }
        for _ in 0..op_count {
            msg.ops.push(WireOp::decode(&mut buf)?);
        }
        if buf.has_remaining() {
            return Err(ProtocolError::Malformed("trailing message bytes"));
        }
        Ok(msg)
    }
}

/// One key inside a batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// Position of the key in the caller's input.
    pub index: u32,
    pub namespace: String,
    pub digest: Digest,
    /// Bins to return; empty with `GET_ALL` means every bin.
    pub bin_names: Vec<String>,
}

/// Batch read request body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchRequest {
    pub info1: u8,
    pub timeout_ms: u32,
    pub items: Vec<BatchItem>,
}

impl BatchRequest {
    pub fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        out.put_u8(self.info1);
        out.put_u32(self.timeout_ms);
        out.put_u32(self.items.len() as u32);
        for item in &self.items {
            out.put_u32(item.index);
            out.put_slice(item.digest.as_bytes());
            put_short_str(out, &item.namespace, "namespace")?;
            out.put_u16(item.bin_names.len() as u16);
            for name in &item.bin_names {
                validate_bin_name(name)?;
                put_short_str(out, name, "bin name")?;
            }
        }
        Ok(())
    }

    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = body;
        if buf.remaining() < 9 {
            return Err(ProtocolError::Truncated);
        }
        let info1 = buf.get_u8();
        let timeout_ms = buf.get_u32();
        let count = buf.get_u32() as usize;
        let mut items = Vec::with_capacity(count.min(buf.remaining() / 24));
        for _ in 0..count {
            let index = get_u32(&mut buf)?;
            if buf.remaining() < DIGEST_SIZE {
                return Err(ProtocolError::Truncated);
            }
            let mut digest = [0u8; DIGEST_SIZE];
            buf.copy_to_slice(&mut digest);
            let namespace = get_short_str(&mut buf, "namespace")?;
            if buf.remaining() < 2 {
                return Err(ProtocolError::Truncated);
            }
            let bin_count = buf.get_u16() as usize;
            let mut bin_names = Vec::with_capacity(bin_count);
            for _ in 0..bin_count {
                bin_names.push(get_short_str(&mut buf, "bin name")?);
            }
            items.push(BatchItem {
                index,
                namespace,
                digest: Digest(digest),
                bin_names,
            });
        }
        if buf.has_remaining() {
            return Err(ProtocolError::Malformed("trailing batch bytes"));
        }
        Ok(BatchRequest {
            info1,
            timeout_ms,
            items,
        })
    }
}

/// Result for one key of a batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchRecord {
    pub index: u32,
    pub result_code: u8,
    pub generation: u32,
    pub expiration: u32,
    pub bins: Vec<WireOp>,
}

impl BatchRecord {
    #[inline]
    pub fn result(&self) -> ResultCode {
        ResultCode::from_u8(self.result_code)
    }
}

/// Batch read response body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchResponse {
    pub records: Vec<BatchRecord>,
}

impl BatchResponse {
    pub fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        out.put_u32(self.records.len() as u32);
        for record in &self.records {
            out.put_u32(record.index);
            out.put_u8(record.result_code);
            out.put_u32(record.generation);
            out.put_u32(record.expiration);
            out.put_u16(record.bins.len() as u16);
            for bin in &record.bins {
                bin.encode(out)?;
            }
        }
        Ok(())
    }

    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = body;
        let count = get_u32(&mut buf)? as usize;
        let mut records = Vec::with_capacity(count.min(buf.remaining() / BATCH_RECORD_FIXED_SIZE));
        for _ in 0..count {
            if buf.remaining() < BATCH_RECORD_FIXED_SIZE {
                return Err(ProtocolError::Truncated);
            }
            let index = buf.get_u32();
            let result_code = buf.get_u8();
            let generation = buf.get_u32();
            let expiration = buf.get_u32();
            let op_count = buf.get_u16() as usize;
            let mut bins = Vec::with_capacity(op_count);
            for _ in 0..op_count {
                bins.push(WireOp::decode(&mut buf)?);
            }
            records.push(BatchRecord {
                index,
                result_code,
                generation,
                expiration,
                bins,
            });
        }
        if buf.has_remaining() {
            return Err(ProtocolError::Malformed("trailing batch bytes"));
        }
        Ok(BatchResponse { records })
    }
}

/// Encodes an info request for `names`.
pub fn encode_info_request(names: &[&str], out: &mut BytesMut) {
    for name in names {
        out.put_slice(name.as_bytes());
        out.put_u8(b'\n');
    }
}

/// Parses an info request into the requested names.
pub fn parse_info_request(body: &[u8]) -> Result<Vec<String>, ProtocolError> {
    let text = std::str::from_utf8(body).map_err(|_| ProtocolError::InvalidUtf8("info request"))?;
    Ok(text
        .split('\n')
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Encodes `name\tvalue\n` lines.
pub fn encode_info_response<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    out: &mut BytesMut,
) {
    for (name, value) in pairs {
        out.put_slice(name.as_bytes());
        out.put_u8(b'\t');
        out.put_slice(value.as_bytes());
        out.put_u8(b'\n');
    }
}

/// Parses `name\tvalue\n` lines. Names without a value map to "".
pub fn parse_info_response(body: &[u8]) -> Result<BTreeMap<String, String>, ProtocolError> {
    let text = std::str::from_utf8(body).map_err(|_| ProtocolError::InvalidUtf8("info response"))?;
    Ok(text
        .split('\n')
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('\t') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => (line.to_string(), String::new()),
        })
        .collect())
}

fn get_u32(buf: &mut &[u8]) -> Result<u32, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.get_u32())
}

fn put_short_str(out: &mut BytesMut, s: &str, what: &'static str) -> Result<(), ProtocolError> {
    if s.len() > u8::MAX as usize {
        return Err(ArgumentError::NameTooLong {
            field: what,
            max: u8::MAX as usize,
        }
        .into());
    }
    out.put_u8(s.len() as u8);
    out.put_slice(s.as_bytes());
    Ok(())
}

fn get_short_str(buf: &mut &[u8], what: &'static str) -> Result<String, ProtocolError> {
    if buf.remaining() < 1 {
        return Err(ProtocolError::Truncated);
    }
    let len = buf.get_u8() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated);
    }
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|_| ProtocolError::InvalidUtf8(what))?
        .to_string();
    buf.advance(len);
    Ok(s)
}
