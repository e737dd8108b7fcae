//! Error types for the wire protocol.

use thiserror::Error;

/// Errors raised while encoding or decoding protocol frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Magic number mismatch on a frame boundary.
    #[error("bad magic number: {0:#010x}")]
    BadMagic(u32),

    /// Unsupported protocol version.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Unknown message type discriminant.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// No serializer registered for the tag.
    #[error("unknown codec tag: {0}")]
    UnknownCodec(u8),

    /// No compressor registered for the tag.
    #[error("unknown compressor tag: {0}")]
    UnknownCompressor(u8),

    /// Frame exceeds the configured size limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Declared frame length is shorter than the fixed header.
    #[error("frame length {0} shorter than header")]
    FrameTooShort(u32),

    /// Payload failed to serialize while building a frame.
    #[error("encode error: {0}")]
    Encode(String),

    /// Payload failed to decompress or deserialize.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Errors raised by serializer implementations.
#[derive(Error, Debug)]
pub enum SerializationError {
    /// Value could not be serialized.
    #[error("serialize failed: {0}")]
    Serialize(String),

    /// Bytes could not be deserialized into the target type.
    #[error("deserialize failed: {0}")]
    Deserialize(String),
}

/// Errors raised by compressor implementations.
///
/// Compression failures are recoverable (the caller falls back to the
/// uncompressed payload); decompression failures are fatal to the frame.
#[derive(Error, Debug)]
pub enum CompressionError {
    /// Payload could not be compressed.
    #[error("compress failed: {0}")]
    Compress(String),

    /// Payload could not be decompressed.
    #[error("decompress failed: {0}")]
    Decompress(String),
}

impl From<SerializationError> for ProtocolError {
    fn from(err: SerializationError) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<CompressionError> for ProtocolError {
    fn from(err: CompressionError) -> Self {
        Self::Decode(err.to_string())
    }
}
