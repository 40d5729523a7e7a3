//! Call frame: the three-part message for one invocation.
//!
//! ```text
//! part 0: method name, raw UTF-8 (never passed through the codec)
//! part 1: codec-encoded positional arguments (sequence)
//! part 2: codec-encoded keyword arguments (mapping)
//! ```
//!
//! All three parts are always present, even for empty arguments.

use bytes::Bytes;
use serde_json::{Map, Value};

use super::message::Multipart;
use crate::codec::Codec;
use crate::error::{Result, ZrpcError};

/// Number of parts in a call frame.
pub const CALL_FRAME_PARTS: usize = 3;

/// Method name that shuts a server or worker down.
pub const KILL_SERVER: &str = "kill_server";

/// Prefix reserved for client-internal names; never sent as a method.
pub const RESERVED_PREFIX: &str = "_";

/// Keyword consumed by the client to suppress remote failures.
pub const SUPPRESS_KEYWORD: &str = "_suppress";

/// A call frame whose payloads are still encoded.
///
/// Receivers split a message into this first, then decode the two payloads
/// independently with [`CallFrame::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    /// Method name.
    pub method: String,
    /// Encoded positional arguments.
    pub args: Bytes,
    /// Encoded keyword arguments.
    pub kwargs: Bytes,
}

impl CallFrame {
    /// Encode arguments with codec `C` and build a frame.
    pub fn encode<C: Codec>(method: &str, args: &[Value], kwargs: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            method: method.to_string(),
            args: Bytes::from(C::encode(args)?),
            kwargs: Bytes::from(C::encode(kwargs)?),
        })
    }

    /// Split a received message into a call frame.
    ///
    /// # Errors
    ///
    /// Protocol error if the part count is not 3 or the name is not UTF-8.
    pub fn from_message(message: Multipart) -> Result<Self> {
        if message.len() != CALL_FRAME_PARTS {
            return Err(ZrpcError::Protocol(format!(
                "call frame must have {} parts, got {}",
                CALL_FRAME_PARTS,
                message.len()
            )));
        }

        let mut parts = message.into_parts().into_iter();
        let (name, args, kwargs) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(args), Some(kwargs)) => (name, args, kwargs),
            _ => return Err(ZrpcError::Protocol("truncated call frame".to_string())),
        };

        let method = String::from_utf8(name.to_vec())
            .map_err(|_| ZrpcError::Protocol("method name is not valid UTF-8".to_string()))?;

        Ok(Self {
            method,
            args,
            kwargs,
        })
    }

    /// Build the wire message.
    pub fn into_message(self) -> Multipart {
        Multipart::from(vec![Bytes::from(self.method.into_bytes()), self.args, self.kwargs])
    }

    /// Whether this is the shutdown sentinel.
    #[inline]
    pub fn is_kill(&self) -> bool {
        self.method == KILL_SERVER
    }

    /// Decode both payloads with codec `C`.
    ///
    /// # Errors
    ///
    /// Undecodable payloads are reported as protocol errors.
    pub fn decode<C: Codec>(&self) -> Result<(Vec<Value>, Map<String, Value>)> {
        let args: Vec<Value> =
            C::decode(&self.args).map_err(|e| ZrpcError::undecodable("positional arguments", e))?;
        let kwargs: Map<String, Value> =
            C::decode(&self.kwargs).map_err(|e| ZrpcError::undecodable("keyword arguments", e))?;
        Ok((args, kwargs))
    }
}
