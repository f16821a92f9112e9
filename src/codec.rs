//! Gzip codec for stored values.
//!
//! Compression is only engaged when the store is configured with
//! `compression = true`, and only for byte payloads. Both directions are
//! pure in-memory transforms.
//!
//! ```rust
//! use cache_kit_mongodb::codec::{compress, decompress};
//!
//! # fn main() -> cache_kit_mongodb::Result<()> {
//! let packed = compress(b"hello hello hello")?;
//! assert_eq!(decompress(&packed)?, b"hello hello hello");
//! # Ok(())
//! # }
//! ```

use crate::entry::CacheValue;
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compress bytes with gzip at the default level.
///
/// # Errors
///
/// Returns `Error::CodecError` if the encoder fails.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| {
            log::error!("Compression failed: {}", e);
            Error::CodecError(format!("compression failed: {}", e))
        })
}

/// Decompress gzip bytes.
///
/// # Errors
///
/// Returns `Error::CodecError` if the input is not a valid gzip stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder.read_to_end(&mut out).map_err(|e| {
        log::warn!("Decompression failed: {}", e);
        Error::CodecError(format!("decompression failed: {}", e))
    })?;
    Ok(out)
}

/// Compress a cache value.
///
/// # Errors
///
/// Returns `Error::CodecError` if the value is not a byte payload.
pub fn compress_value(value: &CacheValue) -> Result<CacheValue> {
    match value {
        CacheValue::Bytes(b) => Ok(CacheValue::Bytes(compress(b)?)),
        _ => Err(Error::CodecError(
            "value is not a compressible type (only byte payloads are)".to_string(),
        )),
    }
}

/// Decompress a cache value flagged as compressed.
///
/// # Errors
///
/// Returns `Error::CodecError` if the value is not bytes or not valid gzip.
pub fn decompress_value(value: &CacheValue) -> Result<CacheValue> {
    match value {
        CacheValue::Bytes(b) => Ok(CacheValue::Bytes(decompress(b)?)),
        _ => Err(Error::CodecError(
            "compressed value is not a byte payload".to_string(),
        )),
    }
}
