//! Wire protocol for the Parallax RPC framework.
//!
//! Defines the framed binary protocol, the request/response payload model,
//! and the pluggable serializer and compressor implementations. Transport,
//! pooling, and dispatch live in the sibling crates.

pub mod compress;
pub mod error;
pub mod frame;
pub mod message;
pub mod serialize;
pub mod value;

pub use error::{CompressionError, ProtocolError, SerializationError};
pub use frame::{
    encode_request, encode_response, FrameDecoder, MessageType, RawFrame, DEFAULT_MAX_FRAME_SIZE,
    HEADER_LEN, MAGIC, VERSION,
};
pub use message::{
    now_millis, service_key, RpcRequest, RpcResponse, EXT_ERROR_CODE, EXT_RETRY_AFTER_MS,
    STATUS_FAILURE, STATUS_OK, STATUS_RATE_LIMITED, STATUS_UNAUTHENTICATED,
};
pub use value::Value;
