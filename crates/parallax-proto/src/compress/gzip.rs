//! Gzip compressor.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::{Compressor, TAG_GZIP};
use crate::error::CompressionError;

/// Gzip codec. Best ratio of the built-ins, highest CPU cost, so it only
/// kicks in for payloads of 1 KiB and up.
#[derive(Debug, Default, Clone, Copy)]
pub struct GzipCompressor;

impl Compressor for GzipCompressor {
    fn tag(&self) -> u8 {
        TAG_GZIP
    }

    fn name(&self) -> &'static str {
        "gzip"
    }

    fn threshold(&self) -> usize {
        1024
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(data)
            .map_err(|e| CompressionError::Compress(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| CompressionError::Compress(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| CompressionError::Decompress(e.to_string()))?;
        Ok(out)
    }
}
