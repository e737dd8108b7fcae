//! Compact binary serializer.

use super::{Serializer, TAG_BINARY};
use crate::error::SerializationError;
use crate::message::{RpcRequest, RpcResponse};

/// Compact binary codec.
///
/// The layout is derived from the payload type definitions, so the stream
/// carries no field names or type markers. Densest of the built-in codecs;
/// both peers must agree on the payload schema version.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinarySerializer;

impl Serializer for BinarySerializer {
    fn tag(&self) -> u8 {
        TAG_BINARY
    }

    fn name(&self) -> &'static str {
        "binary"
    }

    fn serialize_request(&self, request: &RpcRequest) -> Result<Vec<u8>, SerializationError> {
        bincode::serialize(request).map_err(|e| SerializationError::Serialize(e.to_string()))
    }

    fn deserialize_request(&self, bytes: &[u8]) -> Result<RpcRequest, SerializationError> {
        bincode::deserialize(bytes).map_err(|e| SerializationError::Deserialize(e.to_string()))
    }

    fn serialize_response(&self, response: &RpcResponse) -> Result<Vec<u8>, SerializationError> {
        bincode::serialize(response).map_err(|e| SerializationError::Serialize(e.to_string()))
    }

    fn deserialize_response(&self, bytes: &[u8]) -> Result<RpcResponse, SerializationError> {
        bincode::deserialize(bytes).map_err(|e| SerializationError::Deserialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn densest_of_the_builtin_codecs() {
        let request = RpcRequest::new(
            "com.example.Orders",
            "placeOrder",
            vec![Value::from("order-1"), Value::Int(3), Value::Bool(false)],
        );

        let binary = BinarySerializer.serialize_request(&request).unwrap();
        let json = serde_json::to_vec(&request).unwrap();
        assert!(binary.len() < json.len());
    }

    #[test]
    fn empty_input_fails() {
        assert!(BinarySerializer.deserialize_request(&[]).is_err());
    }
}
