//! LZ4 compressor.

use super::{Compressor, TAG_LZ4};
use crate::error::CompressionError;

/// LZ4 codec. The compressed payload is prefixed with the original length
/// as a big-endian `u32`, which the block decoder needs up front.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn tag(&self) -> u8 {
        TAG_LZ4
    }

    fn name(&self) -> &'static str {
        "lz4"
    }

    fn threshold(&self) -> usize {
        256
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let original_len = u32::try_from(data.len())
            .map_err(|_| CompressionError::Compress("payload exceeds u32 length".to_owned()))?;

        let compressed = lz4_flex::compress(data);
        let mut out = Vec::with_capacity(4 + compressed.len());
        out.extend_from_slice(&original_len.to_be_bytes());
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if data.len() < 4 {
            return Err(CompressionError::Decompress(
                "missing length prefix".to_owned(),
            ));
        }

        let original_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        lz4_flex::decompress(&data[4..], original_len)
            .map_err(|e| CompressionError::Decompress(e.to_string()))
    }
}
