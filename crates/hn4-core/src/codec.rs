//! Compression codec boundary: a real compression codec is an external
//! collaborator, referenced only via the interface the write pipeline
//! calls through.

/// What the write pipeline's Phase 2 compression decision needs.
pub trait CompressionCodec: Send + Sync {
    /// Attempt to compress `input`. `None` means "did not help" — the
    /// caller falls back to the raw payload (Phase 2).
    fn compress(&self, input: &[u8]) -> Option<Vec<u8>>;

    /// Reverse `compress`. `original_len` is the decoded length to
    /// reconstruct.
    fn decompress(&self, input: &[u8], original_len: usize) -> Option<Vec<u8>>;
}

/// The reference codec: never compresses. Exercises every Phase 2 code path
/// that does not require an actual codec (HINT_COMPRESSED unset, overwrite
/// fast path, `len <= 128`) without pulling in a real compression
/// dependency the core has no business choosing on this crate's behalf.
#[derive(Debug, Default)]
pub struct NullCodec;

impl CompressionCodec for NullCodec {
    fn compress(&self, _input: &[u8]) -> Option<Vec<u8>> {
        None
    }

    fn decompress(&self, input: &[u8], original_len: usize) -> Option<Vec<u8>> {
        if input.len() == original_len {
            Some(input.to_vec())
        } else {
            None
        }
    }
}
