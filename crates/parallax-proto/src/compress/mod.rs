//! Pluggable payload compressors.
//!
//! Compression is best-effort: a payload below the compressor's threshold,
//! a compressor failure, or output that is not strictly smaller all fall
//! back to the uncompressed payload (with the `none` tag on the wire).
//! Decompression is strict; a failure poisons the frame.

mod gzip;
mod lz4;
mod snappy;

pub use gzip::GzipCompressor;
pub use lz4::Lz4Compressor;
pub use snappy::SnappyCompressor;

use crate::error::CompressionError;

/// Wire tag for uncompressed payloads.
pub const TAG_NONE: u8 = 0;
/// Wire tag for gzip.
pub const TAG_GZIP: u8 = 1;
/// Wire tag for Snappy.
pub const TAG_SNAPPY: u8 = 2;
/// Wire tag for LZ4.
pub const TAG_LZ4: u8 = 3;

/// A payload compressor.
pub trait Compressor: Send + Sync {
    /// The fixed byte tag carried in the frame header.
    fn tag(&self) -> u8;

    /// The extension name of this compressor.
    fn name(&self) -> &'static str;

    /// Minimum payload size for compression to be attempted.
    fn threshold(&self) -> usize;

    /// Compresses `data`.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;

    /// Decompresses `data`.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;
}

/// Pass-through compressor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn tag(&self) -> u8 {
        TAG_NONE
    }

    fn name(&self) -> &'static str {
        "none"
    }

    fn threshold(&self) -> usize {
        usize::MAX
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }
}

static NONE: NoneCompressor = NoneCompressor;
static GZIP: GzipCompressor = GzipCompressor;
static SNAPPY: SnappyCompressor = SnappyCompressor;
static LZ4: Lz4Compressor = Lz4Compressor;

/// Resolves a compressor by its wire tag.
#[must_use]
pub fn by_tag(tag: u8) -> Option<&'static dyn Compressor> {
    match tag {
        TAG_NONE => Some(&NONE),
        TAG_GZIP => Some(&GZIP),
        TAG_SNAPPY => Some(&SNAPPY),
        TAG_LZ4 => Some(&LZ4),
        _ => None,
    }
}

/// All built-in compressors in declaration order.
#[must_use]
pub fn builtin() -> [&'static dyn Compressor; 4] {
    [&NONE, &GZIP, &SNAPPY, &LZ4]
}

/// Applies the threshold-and-shrink policy for an outbound payload.
///
/// Returns the bytes to put on the wire together with the effective
/// compression tag: the compressor's own tag when compression happened, or
/// `TAG_NONE` when the payload was left untouched.
#[must_use]
pub fn compress_if_worthwhile(compressor: &dyn Compressor, data: &[u8]) -> (Vec<u8>, u8) {
    if compressor.tag() == TAG_NONE || data.len() < compressor.threshold() {
        return (data.to_vec(), TAG_NONE);
    }

    match compressor.compress(data) {
        Ok(compressed) if compressed.len() < data.len() => (compressed, compressor.tag()),
        Ok(_) => (data.to_vec(), TAG_NONE),
        Err(e) => {
            tracing::warn!(
                compressor = compressor.name(),
                error = %e,
                "compression failed, sending payload uncompressed"
            );
            (data.to_vec(), TAG_NONE)
        }
    }
}
