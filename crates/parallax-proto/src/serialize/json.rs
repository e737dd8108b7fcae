//! JSON serializer.

use serde::Serialize;

use super::{Serializer, TAG_JSON};
use crate::error::SerializationError;
use crate::message::{RpcRequest, RpcResponse};

/// Human-readable JSON codec.
///
/// Unknown fields on input are ignored; null fields are omitted on
/// output. The omission happens here rather than through serde attributes
/// so the binary codecs keep a fixed field layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl JsonSerializer {
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, SerializationError> {
        let mut json =
            serde_json::to_value(value).map_err(|e| SerializationError::Serialize(e.to_string()))?;
        if let serde_json::Value::Object(ref mut map) = json {
            map.retain(|_, field| !field.is_null());
        }
        serde_json::to_vec(&json).map_err(|e| SerializationError::Serialize(e.to_string()))
    }
}

impl Serializer for JsonSerializer {
    fn tag(&self) -> u8 {
        TAG_JSON
    }

    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize_request(&self, request: &RpcRequest) -> Result<Vec<u8>, SerializationError> {
        Self::encode(request)
    }

    fn deserialize_request(&self, bytes: &[u8]) -> Result<RpcRequest, SerializationError> {
        serde_json::from_slice(bytes).map_err(|e| SerializationError::Deserialize(e.to_string()))
    }

    fn serialize_response(&self, response: &RpcResponse) -> Result<Vec<u8>, SerializationError> {
        Self::encode(response)
    }

    fn deserialize_response(&self, bytes: &[u8]) -> Result<RpcResponse, SerializationError> {
        serde_json::from_slice(bytes).map_err(|e| SerializationError::Deserialize(e.to_string()))
    }
}
