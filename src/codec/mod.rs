//! Codec module - serialization/deserialization for call payloads.
//!
//! Positional arguments, keyword arguments and response envelopes all pass
//! through a [`Codec`]. The method name never does: it travels as a raw
//! UTF-8 part.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (default)
//! - [`JsonCodec`] - JSON using `serde_json`, handy for debugging captures
//!
//! # Design
//!
//! Codecs are marker structs with associated functions rather than trait
//! objects. Servers, clients and workers are generic over `C: Codec`, so the
//! codec is selected at compile time and both ends must agree on it.
//!
//! # Example
//!
//! ```
//! use zrpc::codec::{Codec, JsonCodec, MsgPackCodec};
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let encoded = JsonCodec::encode(&vec![1, 2, 3]).unwrap();
//! assert_eq!(encoded, b"[1,2,3]");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Serializer contract: `encode(value) -> bytes`, `decode(bytes) -> value`.
///
/// Decoding malformed input must fail rather than panic.
pub trait Codec: Send + Sync + 'static {
    /// Short name used in logs.
    const NAME: &'static str;

    /// Encode a value to bytes.
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>>;

    /// Decode bytes to a value.
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}
