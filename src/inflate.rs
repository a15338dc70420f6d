//! zlib inflation on top of libdeflater.
//!
//! libdeflater decompresses into a caller-sized buffer, so the output size has
//! to be guessed. The declared size from the archive is tried first and the
//! buffer grows on `InsufficientSpace`. Growth is capped by the largest
//! expansion DEFLATE can produce, so a lying size field cannot force a huge
//! allocation.

use libdeflater::{DecompressionError, Decompressor};
use thiserror::Error;

/// Upper bound of the DEFLATE expansion ratio.
const MAX_RATIO: usize = 1032;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid zlib stream")]
pub struct InflateError;

/// Inflates a zlib stream. `size_hint` is the expected output length, or 0
/// when unknown.
pub fn zlib_inflate(input: &[u8], size_hint: usize) -> Result<Vec<u8>, InflateError> {
    let limit = input.len().saturating_mul(MAX_RATIO).saturating_add(64);
    let mut capacity = if size_hint > 0 {
        size_hint.min(limit)
    } else {
        input.len().saturating_mul(4).clamp(64, limit)
    };

    let mut decompressor = Decompressor::new();
    loop {
        let mut out = vec![0u8; capacity];
        match decompressor.zlib_decompress(input, &mut out) {
            Ok(n) => {
                out.truncate(n);
                return Ok(out);
            }
            Err(DecompressionError::InsufficientSpace) if capacity < limit => {
                capacity = capacity.saturating_mul(2).min(limit);
            }
            Err(_) => return Err(InflateError),
        }
    }
}

#[cfg(test)]
pub(crate) fn zlib_deflate(input: &[u8]) -> Vec<u8> {
    use libdeflater::{CompressionLvl, Compressor};

    let mut compressor = Compressor::new(CompressionLvl::default());
    let mut out = vec![0u8; compressor.zlib_compress_bound(input.len())];
    let n = compressor.zlib_compress(input, &mut out).expect("compress");
    out.truncate(n);
    out
}
