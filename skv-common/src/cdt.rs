//! Map sub-operation codes shared by the client encoder and the node.
//!
//! A map operation travels as a single op whose value is the list
//! `[sub_op, return_type, args...]`.

use crate::error::ProtocolError;

/// Map sub-operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MapSubOp {
    Size = 1,
    Put = 2,
    RemoveByKey = 3,
    Clear = 4,
    GetByKey = 10,
    GetByIndex = 11,
    GetByRank = 12,
}

impl MapSubOp {
    pub fn from_u8(code: u8) -> Result<Self, ProtocolError> {
        Ok(match code {
            1 => MapSubOp::Size,
            2 => MapSubOp::Put,
            3 => MapSubOp::RemoveByKey,
            4 => MapSubOp::Clear,
            10 => MapSubOp::GetByKey,
            11 => MapSubOp::GetByIndex,
            12 => MapSubOp::GetByRank,
            _ => return Err(ProtocolError::Malformed("map sub-operation")),
        })
    }

    /// True when the sub-operation changes the stored map.
    pub const fn is_write(self) -> bool {
        matches!(
            self,
            MapSubOp::Put | MapSubOp::RemoveByKey | MapSubOp::Clear
        )
    }
}

/// What a map sub-operation returns for the selected entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum MapReturnType {
    None = 0,
    Index = 1,
    Rank = 2,
    Count = 3,
    Key = 4,
    #[default]
    Value = 5,
    KeyValue = 6,
}

impl MapReturnType {
    pub fn from_u8(code: u8) -> Result<Self, ProtocolError> {
        Ok(match code {
            0 => MapReturnType::None,
            1 => MapReturnType::Index,
            2 => MapReturnType::Rank,
            3 => MapReturnType::Count,
            4 => MapReturnType::Key,
            5 => MapReturnType::Value,
            6 => MapReturnType::KeyValue,
            _ => return Err(ProtocolError::Malformed("map return type")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_op_codes_round_trip() {
        for op in [
            MapSubOp::Size,
            MapSubOp::Put,
            MapSubOp::RemoveByKey,
            MapSubOp::Clear,
            MapSubOp::GetByKey,
            MapSubOp::GetByIndex,
            MapSubOp::GetByRank,
        ] {
            assert_eq!(MapSubOp::from_u8(op as u8).unwrap(), op);
        }
        assert!(MapSubOp::from_u8(99).is_err());
    }

    #[test]
    fn only_mutating_sub_ops_are_writes() {
        assert!(MapSubOp::Put.is_write());
        assert!(!MapSubOp::GetByRank.is_write());
        assert_eq!(MapReturnType::from_u8(6).unwrap(), MapReturnType::KeyValue);
    }
}
