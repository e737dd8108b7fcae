//! Snappy compressor.

use super::{Compressor, TAG_SNAPPY};
use crate::error::CompressionError;

/// Snappy codec. Fast with a modest ratio; applied from 512 bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnappyCompressor;

impl Compressor for SnappyCompressor {
    fn tag(&self) -> u8 {
        TAG_SNAPPY
    }

    fn name(&self) -> &'static str {
        "snappy"
    }

    fn threshold(&self) -> usize {
        512
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| CompressionError::Compress(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| CompressionError::Decompress(e.to_string()))
    }
}
