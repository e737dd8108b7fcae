//! Pluggable payload serializers.
//!
//! Each serializer owns a fixed wire tag carried in the frame header. Tag
//! lookup is a fixed table; name lookup goes through the extension loader in
//! `parallax-common`.

mod binary;
mod cbor;
mod json;

pub use binary::BinarySerializer;
pub use cbor::CborSerializer;
pub use json::JsonSerializer;

use crate::error::SerializationError;
use crate::message::{RpcRequest, RpcResponse};

/// Wire tag for the JSON serializer.
pub const TAG_JSON: u8 = 1;
/// Wire tag for the self-describing CBOR serializer.
pub const TAG_CBOR: u8 = 2;
/// Wire tag for the compact binary serializer.
pub const TAG_BINARY: u8 = 3;

/// A payload serializer.
///
/// Implementations must be stateless or internally synchronized; a single
/// instance is shared across all connections.
pub trait Serializer: Send + Sync {
    /// The fixed byte tag carried in the frame header.
    fn tag(&self) -> u8;

    /// The extension name of this serializer.
    fn name(&self) -> &'static str;

    /// Serializes a request payload.
    fn serialize_request(&self, request: &RpcRequest) -> Result<Vec<u8>, SerializationError>;

    /// Deserializes a request payload.
    fn deserialize_request(&self, bytes: &[u8]) -> Result<RpcRequest, SerializationError>;

    /// Serializes a response payload.
    fn serialize_response(&self, response: &RpcResponse) -> Result<Vec<u8>, SerializationError>;

    /// Deserializes a response payload.
    fn deserialize_response(&self, bytes: &[u8]) -> Result<RpcResponse, SerializationError>;
}

static JSON: JsonSerializer = JsonSerializer;
static CBOR: CborSerializer = CborSerializer;
static BINARY: BinarySerializer = BinarySerializer;

/// Resolves a serializer by its wire tag.
#[must_use]
pub fn by_tag(tag: u8) -> Option<&'static dyn Serializer> {
    match tag {
        TAG_JSON => Some(&JSON),
        TAG_CBOR => Some(&CBOR),
        TAG_BINARY => Some(&BINARY),
        _ => None,
    }
}

/// All built-in serializers in declaration order.
#[must_use]
pub fn builtin() -> [&'static dyn Serializer; 3] {
    [&JSON, &CBOR, &BINARY]
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::message::STATUS_FAILURE;
    use crate::value::Value;

    fn sample_request() -> RpcRequest {
        let mut map = BTreeMap::new();
        map.insert("k".to_owned(), Value::Int(-7));
        RpcRequest::new(
            "com.example.Hello",
            "sayHello",
            vec![
                Value::from("world"),
                Value::Int(42),
                Value::Float(2.5),
                Value::Bool(true),
                Value::Bytes(vec![0, 1, 2, 255]),
                Value::List(vec![Value::Null, Value::from("x")]),
                Value::Map(map),
            ],
        )
        .with_group("default")
        .with_version("1.0")
        .with_token("tok-123")
    }

    #[test]
    fn tag_lookup() {
        assert_eq!(by_tag(TAG_JSON).map(Serializer::name), Some("json"));
        assert_eq!(by_tag(TAG_CBOR).map(Serializer::name), Some("cbor"));
        assert_eq!(by_tag(TAG_BINARY).map(Serializer::name), Some("binary"));
        assert!(by_tag(0).is_none());
        assert!(by_tag(200).is_none());
    }

    #[test]
    fn request_roundtrip_all_codecs() {
        let request = sample_request();
        for serializer in builtin() {
            let bytes = serializer.serialize_request(&request).unwrap();
            let decoded = serializer.deserialize_request(&bytes).unwrap();
            assert_eq!(decoded, request, "codec {}", serializer.name());
        }
    }

    #[test]
    fn response_roundtrip_all_codecs() {
        let success = RpcResponse::success(Value::from("result"));
        let failure = RpcResponse::failure(STATUS_FAILURE, "boom")
            .with_extension("error_code", "BUSINESS_ERROR");

        for serializer in builtin() {
            for response in [&success, &failure] {
                let bytes = serializer.serialize_response(response).unwrap();
                let decoded = serializer.deserialize_response(&bytes).unwrap();
                assert_eq!(&decoded, response, "codec {}", serializer.name());
            }
        }
    }

    #[test]
    fn corrupt_input_is_rejected() {
        let garbage = [0xFFu8, 0x00, 0x13, 0x37];
        for serializer in builtin() {
            assert!(
                serializer.deserialize_request(&garbage).is_err(),
                "codec {}",
                serializer.name()
            );
        }
    }
}
