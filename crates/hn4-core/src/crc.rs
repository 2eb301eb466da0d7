//! CRC32C primitive shim.
//!
//! Every header/superblock/epoch checksum in this crate goes through
//! [`crc32c`], never a hand-rolled polynomial.

/// CRC32C (Castagnoli) over `bytes`.
#[must_use]
pub fn crc32c(bytes: &[u8]) -> u32 {
    crc32c::crc32c(bytes)
}

/// Incrementally extend a running CRC32C, used when a header's checksum
/// field must be computed over a prefix that excludes itself.
#[must_use]
pub fn crc32c_append(crc: u32, bytes: &[u8]) -> u32 {
    crc32c::crc32c_append(crc, bytes)
}
