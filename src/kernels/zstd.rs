//! Zstandard compression of archive entry payloads.
//!
//! Every compressed payload is prefixed with its uncompressed length (u64 LE)
//! so the decoder can pre-size its buffer and detect truncated frames. This
//! module is a panic-free wrapper around the `zstd` crate.

use std::io::Write;

use crate::error::TrackStateError;

const SIZE_HEADER_LEN: usize = 8;
/// Upper bound on the buffer pre-allocated from an untrusted size header. (64MB)
const MAX_PREALLOC: usize = 64 * 1024 * 1024;

/// Compresses `input_bytes` at `level` into a size-prefixed zstd frame.
pub fn encode(input_bytes: &[u8], level: i32) -> Result<Vec<u8>, TrackStateError> {
    let mut output_buf = Vec::with_capacity(SIZE_HEADER_LEN + input_bytes.len() / 2);
    output_buf.extend_from_slice(&(input_bytes.len() as u64).to_le_bytes());

    let mut encoder = zstd::stream::Encoder::new(&mut output_buf, level)
        .map_err(|e| TrackStateError::ZstdError(e.to_string()))?;
    encoder
        .write_all(input_bytes)
        .map_err(|e| TrackStateError::ZstdError(e.to_string()))?;
    // `finish` is essential to finalize the Zstd frame.
    encoder
        .finish()
        .map_err(|e| TrackStateError::ZstdError(e.to_string()))?;

    Ok(output_buf)
}

/// Inverse of `encode`.
pub fn decode(input_bytes: &[u8]) -> Result<Vec<u8>, TrackStateError> {
    if input_bytes.len() < SIZE_HEADER_LEN {
        return Err(TrackStateError::ZstdError(
            "Input stream too short to contain size header.".to_string(),
        ));
    }
    let (len_bytes, compressed) = input_bytes.split_at(SIZE_HEADER_LEN);
    let mut len_buf = [0u8; SIZE_HEADER_LEN];
    len_buf.copy_from_slice(len_bytes);
    let uncompressed_len = u64::from_le_bytes(len_buf) as usize;

    let mut decompressed = Vec::with_capacity(uncompressed_len.min(MAX_PREALLOC));
    zstd::stream::copy_decode(compressed, &mut decompressed)
        .map_err(|e| TrackStateError::ZstdError(e.to_string()))?;

    if decompressed.len() != uncompressed_len {
        return Err(TrackStateError::ZstdError(format!(
            "Decompressed size does not match header. Expected {}, got {}.",
            uncompressed_len,
            decompressed.len()
        )));
    }

    Ok(decompressed)
}
