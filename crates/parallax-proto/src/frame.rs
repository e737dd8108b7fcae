//! Frame encoding and length-prefixed stream decoding.
//!
//! Wire format (20-byte header, all integers big-endian):
//!
//! - Bytes 0-3: magic number `0xCAFEBABE`
//! - Byte 4: protocol version
//! - Bytes 5-8: total frame length including the header (u32)
//! - Byte 9: message type (1 = request, 2 = response)
//! - Byte 10: codec tag
//! - Byte 11: compression tag
//! - Bytes 12-19: request identifier (u64)
//! - Bytes 20..: payload

use bytes::{Buf, Bytes, BytesMut};

use crate::compress::{self, Compressor};
use crate::error::ProtocolError;
use crate::message::{RpcRequest, RpcResponse};
use crate::serialize::{self, Serializer};

/// Protocol magic number.
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Current protocol version.
pub const VERSION: u8 = 1;

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 20;

/// Default upper bound on a single frame, header included.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Message type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Client-to-server request.
    Request = 1,
    /// Server-to-client response.
    Response = 2,
}

impl MessageType {
    /// Creates a message type from its wire value.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Request),
            2 => Some(Self::Response),
            _ => None,
        }
    }

    /// Returns the wire value of this message type.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A complete frame pulled off the wire, payload still encoded.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Message type discriminant.
    pub message_type: MessageType,
    /// Codec tag of the payload.
    pub codec_tag: u8,
    /// Compression tag of the payload.
    pub compress_tag: u8,
    /// Request identifier for correlation.
    pub request_id: u64,
    /// Payload bytes after the header, possibly compressed.
    pub payload: Bytes,
}

impl RawFrame {
    /// Decompresses and deserializes the payload as a request.
    pub fn decode_request(&self) -> Result<RpcRequest, ProtocolError> {
        let serializer = resolve_serializer(self.codec_tag)?;
        let plain = self.decompressed_payload()?;
        serializer
            .deserialize_request(&plain)
            .map_err(ProtocolError::from)
    }

    /// Decompresses and deserializes the payload as a response.
    pub fn decode_response(&self) -> Result<RpcResponse, ProtocolError> {
        let serializer = resolve_serializer(self.codec_tag)?;
        let plain = self.decompressed_payload()?;
        serializer
            .deserialize_response(&plain)
            .map_err(ProtocolError::from)
    }

    fn decompressed_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        let compressor = compress::by_tag(self.compress_tag)
            .ok_or(ProtocolError::UnknownCompressor(self.compress_tag))?;
        compressor
            .decompress(&self.payload)
            .map_err(ProtocolError::from)
    }
}

fn resolve_serializer(tag: u8) -> Result<&'static dyn Serializer, ProtocolError> {
    serialize::by_tag(tag).ok_or(ProtocolError::UnknownCodec(tag))
}

/// Encodes a request into a single contiguous frame.
pub fn encode_request(
    serializer: &dyn Serializer,
    compressor: &dyn Compressor,
    request_id: u64,
    request: &RpcRequest,
) -> Result<Bytes, ProtocolError> {
    let payload = serializer
        .serialize_request(request)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    assemble(
        MessageType::Request,
        serializer.tag(),
        compressor,
        request_id,
        &payload,
    )
}

/// Encodes a response into a single contiguous frame.
pub fn encode_response(
    serializer: &dyn Serializer,
    compressor: &dyn Compressor,
    request_id: u64,
    response: &RpcResponse,
) -> Result<Bytes, ProtocolError> {
    let payload = serializer
        .serialize_response(response)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    assemble(
        MessageType::Response,
        serializer.tag(),
        compressor,
        request_id,
        &payload,
    )
}

fn assemble(
    message_type: MessageType,
    codec_tag: u8,
    compressor: &dyn Compressor,
    request_id: u64,
    payload: &[u8],
) -> Result<Bytes, ProtocolError> {
    let (wire_payload, compress_tag) = compress::compress_if_worthwhile(compressor, payload);

    let total_len = HEADER_LEN + wire_payload.len();
    if total_len > DEFAULT_MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: total_len,
            max: DEFAULT_MAX_FRAME_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(total_len);
    buf.extend_from_slice(&MAGIC.to_be_bytes());
    buf.extend_from_slice(&[VERSION]);
    buf.extend_from_slice(&(total_len as u32).to_be_bytes());
    buf.extend_from_slice(&[message_type.as_u8(), codec_tag, compress_tag]);
    buf.extend_from_slice(&request_id.to_be_bytes());
    buf.extend_from_slice(&wire_payload);

    Ok(buf.freeze())
}

/// Incremental decoder over a TCP byte stream.
///
/// Feed arbitrary chunks in, pull complete frames out. Incomplete frames
/// stay buffered until the remaining bytes arrive.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Creates a decoder with the default frame size bound.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a decoder with an explicit frame size bound.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_frame_size,
        }
    }

    /// Appends received bytes to the internal buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed by a complete frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Attempts to pull the next complete frame out of the buffer.
    ///
    /// Returns `Ok(None)` while the buffer holds less than one frame. Any
    /// error is connection-fatal: the byte stream can no longer be trusted
    /// to be frame-aligned.
    pub fn try_next(&mut self) -> Result<Option<RawFrame>, ProtocolError> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let magic = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]);
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }

        let version = self.buffer[4];
        if version != VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let total_len = u32::from_be_bytes([
            self.buffer[5],
            self.buffer[6],
            self.buffer[7],
            self.buffer[8],
        ]);
        if (total_len as usize) < HEADER_LEN {
            return Err(ProtocolError::FrameTooShort(total_len));
        }
        if total_len as usize > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: total_len as usize,
                max: self.max_frame_size,
            });
        }

        if self.buffer.len() < total_len as usize {
            return Ok(None);
        }

        let message_type = MessageType::from_u8(self.buffer[9])
            .ok_or(ProtocolError::UnknownMessageType(self.buffer[9]))?;
        let codec_tag = self.buffer[10];
        let compress_tag = self.buffer[11];
        let request_id = u64::from_be_bytes([
            self.buffer[12],
            self.buffer[13],
            self.buffer[14],
            self.buffer[15],
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        ]);

        self.buffer.advance(HEADER_LEN);
        let payload = self
            .buffer
            .split_to(total_len as usize - HEADER_LEN)
            .freeze();

        Ok(Some(RawFrame {
            message_type,
            codec_tag,
            compress_tag,
            request_id,
            payload,
        }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::{GzipCompressor, NoneCompressor};
    use crate::serialize::JsonSerializer;
    use crate::value::Value;

    fn sample_request() -> RpcRequest {
        RpcRequest::new("hello", "sayHello", vec![Value::from("world")])
            .with_group("default")
            .with_version("1.0")
    }

    #[test]
    fn encode_decode_roundtrip() {
        let request = sample_request();
        let frame = encode_request(&JsonSerializer, &NoneCompressor, 7, &request).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.feed(&frame);
        let raw = decoder.try_next().unwrap().expect("one frame");

        assert_eq!(raw.message_type, MessageType::Request);
        assert_eq!(raw.request_id, 7);
        assert_eq!(raw.decode_request().unwrap(), request);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn total_length_field_matches_wire_size() {
        let request = sample_request();
        let frame = encode_request(&JsonSerializer, &NoneCompressor, 1, &request).unwrap();

        let total_len = u32::from_be_bytes([frame[5], frame[6], frame[7], frame[8]]) as usize;
        assert_eq!(total_len, frame.len());
        assert_eq!(total_len, HEADER_LEN + (frame.len() - HEADER_LEN));
    }

    #[test]
    fn partial_feed_buffers_until_complete() {
        let request = sample_request();
        let frame = encode_request(&JsonSerializer, &NoneCompressor, 3, &request).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.feed(&frame[..10]);
        assert!(decoder.try_next().unwrap().is_none());

        decoder.feed(&frame[10..frame.len() - 1]);
        assert!(decoder.try_next().unwrap().is_none());

        decoder.feed(&frame[frame.len() - 1..]);
        let raw = decoder.try_next().unwrap().expect("frame completes");
        assert_eq!(raw.request_id, 3);
    }

    #[test]
    fn two_frames_in_one_feed() {
        let first = encode_request(&JsonSerializer, &NoneCompressor, 1, &sample_request()).unwrap();
        let second =
            encode_request(&JsonSerializer, &NoneCompressor, 2, &sample_request()).unwrap();

        let mut decoder = FrameDecoder::new();
        let mut joined = Vec::new();
        joined.extend_from_slice(&first);
        joined.extend_from_slice(&second);
        decoder.feed(&joined);

        assert_eq!(decoder.try_next().unwrap().unwrap().request_id, 1);
        assert_eq!(decoder.try_next().unwrap().unwrap().request_id, 2);
        assert!(decoder.try_next().unwrap().is_none());
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[0u8; HEADER_LEN]);
        assert!(matches!(
            decoder.try_next(),
            Err(ProtocolError::BadMagic(0))
        ));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let request = sample_request();
        let frame = encode_request(&JsonSerializer, &NoneCompressor, 1, &request).unwrap();
        let mut bytes = frame.to_vec();
        bytes[4] = 9;

        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);
        assert!(matches!(
            decoder.try_next(),
            Err(ProtocolError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let request = sample_request();
        let frame = encode_request(&JsonSerializer, &NoneCompressor, 1, &request).unwrap();

        let mut decoder = FrameDecoder::with_max_frame_size(32);
        decoder.feed(&frame);
        assert!(matches!(
            decoder.try_next(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn unknown_codec_tag_fails_payload_decode() {
        let request = sample_request();
        let frame = encode_request(&JsonSerializer, &NoneCompressor, 1, &request).unwrap();
        let mut bytes = frame.to_vec();
        bytes[10] = 42;

        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);
        let raw = decoder.try_next().unwrap().expect("framing still works");
        assert!(matches!(
            raw.decode_request(),
            Err(ProtocolError::UnknownCodec(42))
        ));
    }

    #[test]
    fn unknown_compressor_tag_fails_payload_decode() {
        let request = sample_request();
        let frame = encode_request(&JsonSerializer, &NoneCompressor, 1, &request).unwrap();
        let mut bytes = frame.to_vec();
        bytes[11] = 9;

        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);
        let raw = decoder.try_next().unwrap().expect("framing still works");
        assert!(matches!(
            raw.decode_request(),
            Err(ProtocolError::UnknownCompressor(9))
        ));
    }

    #[test]
    fn compressed_roundtrip_with_large_payload() {
        // 8 KiB of text compresses well under gzip and exercises the
        // compress-then-frame path end to end.
        let text: String = "lorem ipsum dolor sit amet ".repeat(320);
        assert!(text.len() >= 8 * 1024);
        let request = RpcRequest::new("hello", "echo", vec![Value::from(text)]);

        let frame = encode_request(&JsonSerializer, &GzipCompressor, 99, &request).unwrap();
        let total_len = u32::from_be_bytes([frame[5], frame[6], frame[7], frame[8]]) as usize;
        assert_eq!(total_len, frame.len());
        assert_eq!(frame[11], crate::compress::TAG_GZIP);

        let mut decoder = FrameDecoder::new();
        decoder.feed(&frame);
        let raw = decoder.try_next().unwrap().expect("one frame");
        assert_eq!(raw.decode_request().unwrap(), request);
    }

    #[test]
    fn response_roundtrip() {
        let response = RpcResponse::success(Value::Int(123));
        let frame = encode_response(&JsonSerializer, &NoneCompressor, 55, &response).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.feed(&frame);
        let raw = decoder.try_next().unwrap().expect("one frame");
        assert_eq!(raw.message_type, MessageType::Response);
        assert_eq!(raw.request_id, 55);
        assert_eq!(raw.decode_response().unwrap(), response);
    }
}
