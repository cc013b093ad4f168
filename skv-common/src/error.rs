//! # Shared Error Types
//!
//! Purpose: Define the server result codes carried on the wire and the
//! errors raised while validating arguments or (de)serializing messages.
//!
//! ## Design Principles
//! 1. **Stable Codes**: `ResultCode` maps 1:1 to the byte sent by the server.
//! 2. **Local Validation**: `ArgumentError` is raised before any I/O happens.
//! 3. **Fail Fast**: Framing violations surface as `ProtocolError` immediately.

use thiserror::Error;

use crate::types::MAX_BIN_NAME_LEN;

/// Status code returned by a node for a command or batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Ok,
    ServerError,
    KeyNotFound,
    GenerationError,
    ParameterError,
    KeyExists,
    BinExists,
    ClusterKeyMismatch,
    ServerMemError,
    Timeout,
    AlwaysForbidden,
    PartitionUnavailable,
    BinTypeError,
    RecordTooBig,
    KeyBusy,
    UnsupportedFeature,
    BinNotFound,
    DeviceOverload,
    KeyMismatch,
    NamespaceNotFound,
    BinNameTooLong,
    FailForbidden,
    ElementNotFound,
    ElementExists,
    EnterpriseOnly,
    OpNotApplicable,
    /// Code this client does not know about.
    Unknown(u8),
}

impl ResultCode {
    /// Decodes a wire status byte.
    pub const fn from_u8(code: u8) -> Self {
        match code {
            0 => ResultCode::Ok,
            1 => ResultCode::ServerError,
            2 => ResultCode::KeyNotFound,
            3 => ResultCode::GenerationError,
            4 => ResultCode::ParameterError,
            5 => ResultCode::KeyExists,
            6 => ResultCode::BinExists,
            7 => ResultCode::ClusterKeyMismatch,
            8 => ResultCode::ServerMemError,
            9 => ResultCode::Timeout,
            10 => ResultCode::AlwaysForbidden,
            11 => ResultCode::PartitionUnavailable,
            12 => ResultCode::BinTypeError,
            13 => ResultCode::RecordTooBig,
            14 => ResultCode::KeyBusy,
            16 => ResultCode::UnsupportedFeature,
            17 => ResultCode::BinNotFound,
            18 => ResultCode::DeviceOverload,
            19 => ResultCode::KeyMismatch,
            20 => ResultCode::NamespaceNotFound,
            21 => ResultCode::BinNameTooLong,
            22 => ResultCode::FailForbidden,
            23 => ResultCode::ElementNotFound,
            24 => ResultCode::ElementExists,
            25 => ResultCode::EnterpriseOnly,
            26 => ResultCode::OpNotApplicable,
            other => ResultCode::Unknown(other),
        }
    }

    /// Encodes the status as its wire byte.
    pub const fn as_u8(self) -> u8 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::ServerError => 1,
            ResultCode::KeyNotFound => 2,
            ResultCode::GenerationError => 3,
            ResultCode::ParameterError => 4,
            ResultCode::KeyExists => 5,
            ResultCode::BinExists => 6,
            ResultCode::ClusterKeyMismatch => 7,
            ResultCode::ServerMemError => 8,
            ResultCode::Timeout => 9,
            ResultCode::AlwaysForbidden => 10,
            ResultCode::PartitionUnavailable => 11,
            ResultCode::BinTypeError => 12,
            ResultCode::RecordTooBig => 13,
            ResultCode::KeyBusy => 14,
            ResultCode::UnsupportedFeature => 16,
            ResultCode::BinNotFound => 17,
            ResultCode::DeviceOverload => 18,
            ResultCode::KeyMismatch => 19,
            ResultCode::NamespaceNotFound => 20,
            ResultCode::BinNameTooLong => 21,
            ResultCode::FailForbidden => 22,
            ResultCode::ElementNotFound => 23,
            ResultCode::ElementExists => 24,
            ResultCode::EnterpriseOnly => 25,
            ResultCode::OpNotApplicable => 26,
            ResultCode::Unknown(code) => code,
        }
    }

    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, ResultCode::Ok)
    }

    /// Short human readable description.
    pub const fn description(self) -> &'static str {
        match self {
            ResultCode::Ok => "ok",
            ResultCode::ServerError => "server error",
            ResultCode::KeyNotFound => "key not found",
            ResultCode::GenerationError => "generation mismatch",
            ResultCode::ParameterError => "invalid parameter",
            ResultCode::KeyExists => "key already exists",
            ResultCode::BinExists => "bin already exists",
            ResultCode::ClusterKeyMismatch => "cluster key mismatch",
            ResultCode::ServerMemError => "server out of memory",
            ResultCode::Timeout => "server timeout",
            ResultCode::AlwaysForbidden => "operation always forbidden",
            ResultCode::PartitionUnavailable => "partition unavailable",
            ResultCode::BinTypeError => "bin type mismatch",
            ResultCode::RecordTooBig => "record too big",
            ResultCode::KeyBusy => "key busy",
            ResultCode::UnsupportedFeature => "unsupported feature",
            ResultCode::BinNotFound => "bin not found",
            ResultCode::DeviceOverload => "device overload",
            ResultCode::KeyMismatch => "key mismatch",
            ResultCode::NamespaceNotFound => "namespace not found",
            ResultCode::BinNameTooLong => "bin name too long",
            ResultCode::FailForbidden => "operation forbidden",
            ResultCode::ElementNotFound => "element not found",
            ResultCode::ElementExists => "element exists",
            ResultCode::EnterpriseOnly => "enterprise-only feature",
            ResultCode::OpNotApplicable => "operation not applicable",
            ResultCode::Unknown(_) => "unknown result code",
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_u8())
    }
}

/// Caller supplied something the client refuses to send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    #[error("bin name must not be empty")]
    EmptyBinName,
    #[error("bin name `{0}` exceeds {MAX_BIN_NAME_LEN} bytes")]
    BinNameTooLong(String),
    #[error("namespace must not be empty")]
    EmptyNamespace,
    #[error("{field} exceeds {max} bytes")]
    NameTooLong { field: &'static str, max: usize },
    #[error("value with particle type {0} cannot be sent")]
    UnsupportedValue(u8),
    #[error("value nests deeper than {0} levels")]
    NestingTooDeep(usize),
    #[error("invalid host `{0}`")]
    InvalidHost(String),
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    #[error("{0}")]
    Invalid(String),
}

/// Wire framing or message parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message truncated")]
    Truncated,
    #[error("bad magic byte {0:#04x}")]
    BadMagic(u8),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown message kind {0}")]
    UnknownMessageKind(u8),
    #[error("unexpected message kind {0}")]
    UnexpectedMessageKind(u8),
    #[error("frame of {0} bytes exceeds the maximum body size")]
    FrameTooLarge(usize),
    #[error("unknown particle type {0}")]
    UnknownParticle(u8),
    #[error("unknown field type {0}")]
    UnknownField(u8),
    #[error("unknown operation code {0}")]
    UnknownOperation(u8),
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("malformed {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Argument(#[from] ArgumentError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_round_trip_through_wire_byte() {
        for code in 0u8..=30 {
            assert_eq!(ResultCode::from_u8(code).as_u8(), code);
        }
    }

    #[test]
    fn unknown_code_is_preserved() {
        assert_eq!(ResultCode::from_u8(15), ResultCode::Unknown(15));
        assert_eq!(ResultCode::from_u8(200).as_u8(), 200);
        assert!(ResultCode::Ok.is_ok());
        assert!(!ResultCode::KeyNotFound.is_ok());
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(ResultCode::BinTypeError.to_string(), "bin type mismatch (12)");
    }
}
