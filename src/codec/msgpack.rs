//! MsgPack codec using `rmp-serde`.
//!
//! Always encodes with `to_vec_named` so structs become maps keyed by
//! field name. The response envelope relies on this: its `status` and
//! `result` fields must be addressable by name on the wire.
//!
//! # Example
//!
//! ```
//! use zrpc::codec::{Codec, MsgPackCodec};
//! use serde_json::{json, Value};
//!
//! let args = vec![json!("hi"), json!({"depth": 2})];
//! let bytes = MsgPackCodec::encode(&args).unwrap();
//! let back: Vec<Value> = MsgPackCodec::decode(&bytes).unwrap();
//! assert_eq!(back, args);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Codec;
use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    const NAME: &'static str = "msgpack";

    #[inline]
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    #[inline]
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::{json, Map, Value};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        id: u32,
        name: String,
        active: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = TestStruct {
            id: 42,
            name: "test".to_string(),
            active: true,
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: TestStruct = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_structs_are_maps() {
        let test = TestStruct {
            id: 1,
            name: "x".to_string(),
            active: false,
        };

        let encoded = MsgPackCodec::encode(&test).unwrap();

        // fixmap with 3 entries, not fixarray
        assert_eq!(encoded[0], 0x83);
    }

    #[test]
    fn test_dynamic_positional_args() {
        let args = vec![json!("hi"), json!(3), json!([1, 2]), Value::Null];
        let encoded = MsgPackCodec::encode(&args).unwrap();

        assert_eq!(encoded[0], 0x94, "Expected fixarray with 4 elements");

        let decoded: Vec<Value> = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, args);
    }

    #[test]
    fn test_dynamic_keyword_args() {
        let mut kwargs = Map::new();
        kwargs.insert("foo".to_string(), json!("a"));
        kwargs.insert("bar".to_string(), json!({"nested": true}));

        let encoded = MsgPackCodec::encode(&kwargs).unwrap();
        let decoded: Map<String, Value> = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, kwargs);
    }

    #[test]
    fn test_empty_args_still_encode() {
        let encoded = MsgPackCodec::encode(&Vec::<Value>::new()).unwrap();
        assert_eq!(encoded, vec![0x90]);

        let encoded = MsgPackCodec::encode(&Map::new()).unwrap();
        assert_eq!(encoded, vec![0x80]);
    }

    #[test]
    fn test_null_is_nil() {
        let encoded = MsgPackCodec::encode(&Value::Null).unwrap();
        assert_eq!(encoded, vec![0xc0]);
    }

    #[test]
    fn test_float_survives() {
        let encoded = MsgPackCodec::encode(&json!(3.5)).unwrap();
        let decoded: Value = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.as_f64(), Some(3.5));
    }

    #[test]
    fn test_binary_decodes_as_bytes() {
        let data: Vec<u8> = vec![0x01, 0x02, 0x03];
        let encoded = MsgPackCodec::encode(&serde_bytes::Bytes::new(&data)).unwrap();
        assert_eq!(encoded[0], 0xc4, "Expected bin8 format");

        let decoded: serde_bytes::ByteBuf = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.as_ref(), &data);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<TestStruct> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_error_on_truncated_data() {
        let encoded = MsgPackCodec::encode(&vec!["a", "b", "c"]).unwrap();
        let result: Result<Vec<String>> = MsgPackCodec::decode(&encoded[..encoded.len() - 1]);
        assert!(result.is_err());
    }
}
