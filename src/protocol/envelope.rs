//! Response envelope and remote failure marshalling.
//!
//! The envelope is a single codec-encoded map with two named fields:
//!
//! | `status` | `result`                                   |
//! |----------|--------------------------------------------|
//! | `true`   | handler return value                       |
//! | `false`  | `[{"kind": .., "message": ..}, "<trace>"]` |
//! | `null`   | `null` (method unknown)                    |
//!
//! An absent `status` field decodes the same as `null`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ZrpcError};

/// Reply to a request-reply call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// `Some(true)` success, `Some(false)` handler failed, `None` unknown method.
    #[serde(default)]
    pub status: Option<bool>,
    /// Meaning depends on `status`.
    #[serde(default)]
    pub result: Value,
}

/// Decoded meaning of an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Handler returned a value.
    Success(Value),
    /// Handler failed.
    Failed(RemoteFailure),
    /// No such method on the server.
    UnknownMethod,
}

impl ResponseEnvelope {
    /// Successful call.
    pub fn success(result: Value) -> Self {
        Self {
            status: Some(true),
            result,
        }
    }

    /// Handler failure.
    pub fn failure(failure: &RemoteFailure) -> Self {
        Self {
            status: Some(false),
            result: failure.to_wire(),
        }
    }

    /// Method not found.
    pub fn unknown_method() -> Self {
        Self {
            status: None,
            result: Value::Null,
        }
    }

    /// Acknowledgment for the shutdown sentinel.
    pub fn kill_ack() -> Self {
        Self::success(Value::Bool(true))
    }

    /// Interpret the envelope.
    ///
    /// # Errors
    ///
    /// Protocol error if a failure result does not have the
    /// `[error_value, trace]` shape.
    pub fn into_outcome(self) -> Result<Outcome> {
        match self.status {
            Some(true) => Ok(Outcome::Success(self.result)),
            Some(false) => RemoteFailure::from_wire(self.result).map(Outcome::Failed),
            None => Ok(Outcome::UnknownMethod),
        }
    }
}

/// The error value half of a remote failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorValue {
    /// Error category, e.g. `ValueError`, `Panic`, `Timeout`.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

/// A handler failure as seen across the wire.
///
/// Carries the error kind and message plus the trace text formatted on the
/// server at the point of failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    /// Error kind and message.
    pub error: ErrorValue,
    /// Formatted trace captured on the server.
    pub trace: String,
}

impl RemoteFailure {
    /// Create a failure.
    pub fn new(kind: impl Into<String>, message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            error: ErrorValue {
                kind: kind.into(),
                message: message.into(),
            },
            trace: trace.into(),
        }
    }

    /// Error kind.
    pub fn kind(&self) -> &str {
        &self.error.kind
    }

    /// Error message.
    pub fn message(&self) -> &str {
        &self.error.message
    }

    /// Wire form: `[error_value, trace]`.
    pub fn to_wire(&self) -> Value {
        Value::Array(vec![
            serde_json::json!({
                "kind": self.error.kind,
                "message": self.error.message,
            }),
            Value::String(self.trace.clone()),
        ])
    }

    /// Parse the wire form.
    pub fn from_wire(value: Value) -> Result<Self> {
        let (error, trace): (ErrorValue, String) = serde_json::from_value(value)
            .map_err(|e| ZrpcError::Protocol(format!("malformed remote failure: {}", e)))?;
        Ok(Self { error, trace })
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error.kind, self.error.message)
    }
}

impl std::error::Error for RemoteFailure {}
