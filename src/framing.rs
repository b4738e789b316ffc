//! On-disk block framing — `CRC32 ‖ LEN32 ‖ VALUE`, all fields big-endian.
//!
//! # On-disk layout (8-byte header, all fields big-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   crc32   CRC32(LEN32‖VALUE)
//!    4      4   len     length of VALUE in bytes
//!    8      N   value   raw bytes, N == len
//! ```
//!
//! # Endianness
//! Big-endian throughout. This is deliberate: block numbers are encoded
//! big-endian into block keys
//! (`UUID ‖ block_number`, see `path_encoder`) so that lexicographic byte
//! ordering of keys matches numeric block order, which the fold engine's
//! sorted-enumeration guarantee depends on. The framing header inherits the
//! same convention for consistency within this crate, not because it is
//! load-bearing for ordering itself.
//!
//! # Checksums
//! The CRC32 covers `LEN32‖VALUE`. Any mismatch, short read, or malformed
//! header is reported as [`FramingError::BadCrc`]/`ShortPayload` and the
//! caller downgrades it to "not found" (§7) — no partial values are ever
//! returned.

use crate::error::FramingError;
use crc32fast::Hasher;

/// Fixed size of the `CRC32 ‖ LEN32` header, in bytes.
pub const HEADER_SIZE: usize = 8;

/// Pack `value` as `CRC32(LEN32‖VALUE) ‖ LEN32 ‖ VALUE`.
///
/// Returns [`FramingError::ValueTooLarge`] if `value` exceeds `block_size`
/// without writing anything.
pub fn pack(value: &[u8], block_size: u32) -> Result<Vec<u8>, FramingError> {
    if value.len() > block_size as usize {
        return Err(FramingError::ValueTooLarge {
            got: value.len(),
            max: block_size,
        });
    }

    let mut body = Vec::with_capacity(4 + value.len());
    body.extend_from_slice(&(value.len() as u32).to_be_bytes());
    body.extend_from_slice(value);

    let mut hasher = Hasher::new();
    hasher.update(&body);
    let crc = hasher.finalize();

    let mut out = Vec::with_capacity(HEADER_SIZE + value.len());
    out.extend_from_slice(&crc.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Unpack a slot previously produced by [`pack`].
///
/// Returns the exact `VALUE` bytes on success. Any header malformation,
/// short payload, or CRC mismatch is reported as a distinct [`FramingError`]
/// variant — callers that want spec §7 semantics map all of them to
/// "not found".
pub fn unpack(bytes: &[u8]) -> Result<Vec<u8>, FramingError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FramingError::ShortHeader);
    }

    let stored_crc = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    let len = u32::from_be_bytes(bytes[4..8].try_into().unwrap());

    let available = bytes.len() - HEADER_SIZE;
    if (len as usize) > available {
        return Err(FramingError::ShortPayload {
            declared: len,
            available,
        });
    }

    let mut hasher = Hasher::new();
    hasher.update(&bytes[4..HEADER_SIZE + len as usize]);
    let expected_crc = hasher.finalize();
    if expected_crc != stored_crc {
        return Err(FramingError::BadCrc {
            expected: expected_crc,
            stored: stored_crc,
        });
    }

    Ok(bytes[HEADER_SIZE..HEADER_SIZE + len as usize].to_vec())
}
