//! Transmission-corruption detection.
//!
//! CRC-32 (IEEE) over the sealed payload bytes. Deterministic and
//! order-sensitive, and every single-bit error changes the value. It is not a
//! security control; tampering is the AEAD tag's job.

use crate::error::{ProtocolError, Result};

/// Compute the integrity code of `bytes`.
#[inline]
pub fn checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Recompute and compare.
#[inline]
pub fn verify(bytes: &[u8], expected: u32) -> bool {
    checksum(bytes) == expected
}

/// Like [`verify`], reporting the mismatch as an error.
pub fn ensure(bytes: &[u8], expected: u32) -> Result<()> {
    let actual = checksum(bytes);
    if actual == expected {
        Ok(())
    } else {
        Err(ProtocolError::IntegrityMismatch { expected, actual })
    }
}
