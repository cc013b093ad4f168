//! Errors surfaced by the client.

use std::time::Duration;

use thiserror::Error;

use skv_common::{ArgumentError, ProtocolError, ResultCode};

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network failure while connecting, reading or writing.
    #[error("connection to {addr} failed: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    /// No response within the policy timeout.
    #[error("no response within {0:?}")]
    Timeout(Duration),
    /// No pooled connection became available within the policy timeout.
    #[error("connection pool for {addr} exhausted")]
    PoolExhausted { addr: String },
    /// Node reported a different cluster name than configured.
    #[error("cluster name mismatch: expected `{expected}`, node reports `{actual}`")]
    ClusterIdentityMismatch { expected: String, actual: String },
    /// Deployment does not support the requested feature.
    #[error("capability not supported: {0}")]
    CapabilityUnsupported(String),
    /// Server rejected the command with a data-level status.
    #[error("server error: {0}")]
    Server(ResultCode),
    /// Caller input rejected before any network call.
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ArgumentError),
    /// Malformed frame or body.
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),
    /// No node owns the partition, or the client is not connected.
    #[error("not connected to the cluster")]
    NotConnected,
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Argument(arg) => ClientError::InvalidArgument(arg),
            other => ClientError::Protocol(other),
        }
    }
}

impl ClientError {
    pub(crate) fn connection(addr: impl Into<String>, source: std::io::Error) -> Self {
        ClientError::Connection {
            addr: addr.into(),
            source,
        }
    }

    /// Maps a non-OK server status to the error taxonomy.
    pub fn from_result_code(code: ResultCode) -> Self {
        match code {
            ResultCode::EnterpriseOnly | ResultCode::UnsupportedFeature => {
                ClientError::CapabilityUnsupported(code.description().to_string())
            }
            ResultCode::Timeout => ClientError::Timeout(Duration::ZERO),
            other => ClientError::Server(other),
        }
    }

    /// True for transport and node-level failures worth another attempt.
    ///
    /// Server data errors, identity and capability errors and argument
    /// errors are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Connection { .. }
                | ClientError::Timeout(_)
                | ClientError::PoolExhausted { .. }
                | ClientError::Server(ResultCode::PartitionUnavailable)
        )
    }

    /// Server status carried by this error, if any.
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            ClientError::Server(code) => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_data_errors_are_terminal() {
        for code in [
            ResultCode::KeyNotFound,
            ResultCode::GenerationError,
            ResultCode::BinTypeError,
        ] {
            let err = ClientError::from_result_code(code);
            assert!(!err.is_retryable(), "{code:?} must not be retried");
            assert_eq!(err.result_code(), Some(code));
        }
    }

    #[test]
    fn node_level_failures_are_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(ClientError::connection("127.0.0.1:3000", io).is_retryable());
        assert!(ClientError::Timeout(Duration::from_millis(5)).is_retryable());
        assert!(ClientError::from_result_code(ResultCode::PartitionUnavailable).is_retryable());
        assert!(ClientError::from_result_code(ResultCode::Timeout).is_retryable());
    }

    #[test]
    fn capability_codes_map_to_capability_error() {
        assert!(matches!(
            ClientError::from_result_code(ResultCode::EnterpriseOnly),
            ClientError::CapabilityUnsupported(_)
        ));
        assert!(!ClientError::CapabilityUnsupported("x".into()).is_retryable());
    }

    #[test]
    fn argument_errors_unwrap_from_protocol_errors() {
        let err: ClientError = ProtocolError::Argument(ArgumentError::EmptyBinName).into();
        assert!(matches!(err, ClientError::InvalidArgument(ArgumentError::EmptyBinName)));
        let err: ClientError = ProtocolError::Truncated.into();
        assert!(matches!(err, ClientError::Protocol(ProtocolError::Truncated)));
    }
}
