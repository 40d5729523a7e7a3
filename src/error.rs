//! Error types for zrpc.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::RemoteFailure;

/// Main error type for all zrpc operations.
#[derive(Debug, Error)]
pub enum ZrpcError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON conversion error (dynamic values, JSON codec).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (wrong part count, undecodable payload, broken alternation).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The registry has no method under this name.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// The remote server answered that the method does not exist.
    #[error("Method not implemented: {0}")]
    MethodNotImplemented(String),

    /// The remote handler failed; carries the marshalled failure.
    #[error("Remote failure: {0}")]
    Remote(RemoteFailure),

    /// Method names with the reserved `_` prefix cannot be called.
    #[error("Reserved method name: {0}")]
    ReservedName(String),

    /// Address string could not be parsed or is unsupported on this platform.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Endpoint closed, or peer went away.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl ZrpcError {
    /// Wrap a codec failure that happened while reading an incoming message.
    pub(crate) fn undecodable(what: &str, err: ZrpcError) -> Self {
        ZrpcError::Protocol(format!("undecodable {}: {}", what, err))
    }

    /// The remote failure, if this error carries one.
    pub fn remote_failure(&self) -> Option<&RemoteFailure> {
        match self {
            ZrpcError::Remote(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Result type alias using ZrpcError.
pub type Result<T> = std::result::Result<T, ZrpcError>;
