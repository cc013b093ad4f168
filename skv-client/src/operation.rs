//! Operations accepted by `Client::operate`.

use skv_common::{validate_bin_name, ArgumentError, Bin, MapReturnType, MapSubOp, OpCode, Value, WireOp};

/// One step of a multi-operation command.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Read one bin, or every bin when `None`.
    Get(Option<String>),
    /// Read generation and expiration only.
    GetHeader,
    Put(Bin),
    Append(Bin),
    Prepend(Bin),
    Add(Bin),
    Touch,
    Delete,
    Map(MapOperation),
}

impl Operation {
    pub fn get() -> Self {
        Operation::Get(None)
    }

    pub fn get_bin(name: impl Into<String>) -> Self {
        Operation::Get(Some(name.into()))
    }

    pub fn get_header() -> Self {
        Operation::GetHeader
    }

    pub fn put(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Operation::Put(Bin::new(name, value))
    }

    pub fn append(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Operation::Append(Bin::new(name, value))
    }

    pub fn prepend(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Operation::Prepend(Bin::new(name, value))
    }

    pub fn add(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Operation::Add(Bin::new(name, value))
    }

    pub fn touch() -> Self {
        Operation::Touch
    }

    pub fn delete() -> Self {
        Operation::Delete
    }

    /// True when the operation changes the record.
    pub fn is_write(&self) -> bool {
        match self {
            Operation::Get(_) | Operation::GetHeader => false,
            Operation::Map(op) => op.kind.sub_op().is_write(),
            _ => true,
        }
    }

    /// True when the operation returns bin data.
    pub(crate) fn is_read(&self) -> bool {
        match self {
            Operation::Get(_) | Operation::GetHeader => true,
            Operation::Map(op) => !op.kind.sub_op().is_write(),
            _ => false,
        }
    }

    pub(crate) fn to_wire(&self) -> Result<Option<WireOp>, ArgumentError> {
        let op = match self {
            Operation::Get(None) | Operation::GetHeader => return Ok(None),
            Operation::Get(Some(name)) => {
                validate_bin_name(name)?;
                WireOp::new(OpCode::Read, name.as_str(), Value::Nil)
            }
            Operation::Put(bin) => bin_op(OpCode::Write, bin)?,
            Operation::Append(bin) => bin_op(OpCode::Append, bin)?,
            Operation::Prepend(bin) => bin_op(OpCode::Prepend, bin)?,
            Operation::Add(bin) => bin_op(OpCode::Add, bin)?,
            Operation::Touch => WireOp::new(OpCode::Touch, "", Value::Nil),
            Operation::Delete => WireOp::new(OpCode::Delete, "", Value::Nil),
            Operation::Map(op) => op.to_wire()?,
        };
        Ok(Some(op))
    }
}

fn bin_op(code: OpCode, bin: &Bin) -> Result<WireOp, ArgumentError> {
    bin.validate()?;
    Ok(WireOp::new(code, bin.name.as_str(), bin.value.clone()))
}

/// Map sub-operation kind and its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum MapOpKind {
    Size,
    Put { key: Value, value: Value },
    RemoveByKey(Value),
    Clear,
    GetByKey(Value),
    /// Position in key order; negative counts from the end.
    GetByIndex(i64),
    /// Position in value order; negative counts from the end.
    GetByRank(i64),
}

impl MapOpKind {
    pub fn sub_op(&self) -> MapSubOp {
        match self {
            MapOpKind::Size => MapSubOp::Size,
            MapOpKind::Put { .. } => MapSubOp::Put,
            MapOpKind::RemoveByKey(_) => MapSubOp::RemoveByKey,
            MapOpKind::Clear => MapSubOp::Clear,
            MapOpKind::GetByKey(_) => MapSubOp::GetByKey,
            MapOpKind::GetByIndex(_) => MapSubOp::GetByIndex,
            MapOpKind::GetByRank(_) => MapSubOp::GetByRank,
        }
    }
}

/// Operation on a map-valued bin.
#[derive(Debug, Clone, PartialEq)]
pub struct MapOperation {
    pub bin: String,
    pub kind: MapOpKind,
    pub return_type: MapReturnType,
}

impl MapOperation {
    pub fn new(bin: impl Into<String>, kind: MapOpKind, return_type: MapReturnType) -> Self {
        MapOperation {
            bin: bin.into(),
            kind,
            return_type,
        }
    }

    /// Returns the entry count.
    pub fn size(bin: impl Into<String>) -> Operation {
        Operation::Map(Self::new(bin, MapOpKind::Size, MapReturnType::Count))
    }

    /// Inserts or replaces one entry; returns the new entry count.
    pub fn put(bin: impl Into<String>, key: impl Into<Value>, value: impl Into<Value>) -> Operation {
        let kind = MapOpKind::Put {
            key: key.into(),
            value: value.into(),
        };
        Operation::Map(Self::new(bin, kind, MapReturnType::Count))
    }

    pub fn remove_by_key(bin: impl Into<String>, key: impl Into<Value>, return_type: MapReturnType) -> Operation {
        Operation::Map(Self::new(bin, MapOpKind::RemoveByKey(key.into()), return_type))
    }

    pub fn clear(bin: impl Into<String>) -> Operation {
        Operation::Map(Self::new(bin, MapOpKind::Clear, MapReturnType::None))
    }

    pub fn get_by_key(bin: impl Into<String>, key: impl Into<Value>, return_type: MapReturnType) -> Operation {
        Operation::Map(Self::new(bin, MapOpKind::GetByKey(key.into()), return_type))
    }

    pub fn get_by_index(bin: impl Into<String>, index: i64, return_type: MapReturnType) -> Operation {
        Operation::Map(Self::new(bin, MapOpKind::GetByIndex(index), return_type))
    }

    pub fn get_by_rank(bin: impl Into<String>, rank: i64, return_type: MapReturnType) -> Operation {
        Operation::Map(Self::new(bin, MapOpKind::GetByRank(rank), return_type))
    }

    /// Encodes as `[sub_op, return_type, args...]`.
    fn to_wire(&self) -> Result<WireOp, ArgumentError> {
        validate_bin_name(&self.bin)?;
        let sub_op = self.kind.sub_op();
        let mut args = vec![Value::Int(sub_op as i64), Value::Int(self.return_type as i64)];
        match &self.kind {
            MapOpKind::Size | MapOpKind::Clear => {}
            MapOpKind::Put { key, value } => {
                args.push(key.clone());
                args.push(value.clone());
            }
            MapOpKind::RemoveByKey(key) | MapOpKind::GetByKey(key) => args.push(key.clone()),
            MapOpKind::GetByIndex(i) | MapOpKind::GetByRank(i) => args.push(Value::Int(*i)),
        }
        let value = Value::List(args);
        value.check_sendable()?;
        let code = if sub_op.is_write() {
            OpCode::MapModify
        } else {
            OpCode::MapRead
        };
        Ok(WireOp::new(code, self.bin.as_str(), value))
    }
}
