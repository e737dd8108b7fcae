//! Self-describing binary serializer (CBOR).

use super::{Serializer, TAG_CBOR};
use crate::error::SerializationError;
use crate::message::{RpcRequest, RpcResponse};

/// Portable binary codec carrying type information in the stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct CborSerializer;

impl CborSerializer {
    fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, SerializationError> {
        let mut out = Vec::new();
        ciborium::into_writer(value, &mut out)
            .map_err(|e| SerializationError::Serialize(e.to_string()))?;
        Ok(out)
    }

    fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, SerializationError> {
        ciborium::from_reader(bytes).map_err(|e| SerializationError::Deserialize(e.to_string()))
    }
}

impl Serializer for CborSerializer {
    fn tag(&self) -> u8 {
        TAG_CBOR
    }

    fn name(&self) -> &'static str {
        "cbor"
    }

    fn serialize_request(&self, request: &RpcRequest) -> Result<Vec<u8>, SerializationError> {
        Self::encode(request)
    }

    fn deserialize_request(&self, bytes: &[u8]) -> Result<RpcRequest, SerializationError> {
        Self::decode(bytes)
    }

    fn serialize_response(&self, response: &RpcResponse) -> Result<Vec<u8>, SerializationError> {
        Self::encode(response)
    }

    fn deserialize_response(&self, bytes: &[u8]) -> Result<RpcResponse, SerializationError> {
        Self::decode(bytes)
    }
}
