//! On-media data block header.

use crate::crc::{crc32c, crc32c_append};
use crate::types::magic::{BLOCK_MAGIC, STRM_MAGIC};

/// 48-byte on-media header, followed by `block_size - BLOCK_HEADER_SIZE`
/// bytes of payload.
pub const BLOCK_HEADER_SIZE: usize = 48;

/// Compression metadata packed into the header's `comp_meta` field:
/// bit 0 set iff the payload is compressed; the remaining bits carry the
/// compressed length (payload beyond it is the zero pad required for CRC
/// invariance Phase 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompMeta {
    pub compressed: bool,
    pub compressed_len: u32,
}

impl CompMeta {
    #[must_use]
    pub const fn encode(self) -> u32 {
        let flag = if self.compressed { 1 } else { 0 };
        (self.compressed_len << 1) | flag
    }

    #[must_use]
    pub const fn decode(raw: u32) -> Self {
        Self {
            compressed: raw & 1 == 1,
            compressed_len: raw >> 1,
        }
    }
}

/// A block header, value type: the anchor owns identity, the block header carries a copy
/// for verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Copy of the owning anchor's `seed_id`, i.e. its well id.
    pub well_id: u128,
    /// Logical block index `N`.
    pub seq_index: u64,
    pub generation: u32,
    pub data_crc: u32,
    pub comp_meta: CompMeta,
}

impl BlockHeader {
    /// Serialize the header, computing `header_crc` over everything
    /// preceding it.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        let mut w = 0usize;
        macro_rules! put {
            ($bytes:expr) => {{
                let b = $bytes;
                buf[w..w + b.len()].copy_from_slice(&b);
                w += b.len();
            }};
        }
        put!(self.well_id.to_le_bytes());
        put!(self.seq_index.to_le_bytes());
        put!(self.generation.to_le_bytes());
        put!(BLOCK_MAGIC.to_le_bytes());
        put!(self.data_crc.to_le_bytes());
        put!(self.comp_meta.encode().to_le_bytes());
        let header_crc = crc32c(&buf[..w]);
        buf[w..w + 4].copy_from_slice(&header_crc.to_le_bytes());
        buf
    }

    /// Parse and verify `magic` + `header_crc`.
    pub fn from_bytes(buf: &[u8; BLOCK_HEADER_SIZE]) -> Result<Self, crate::error::Hn4Error> {
        let mut r = 0usize;
        macro_rules! take {
            ($ty:ty) => {{
                const N: usize = std::mem::size_of::<$ty>();
                let v = <$ty>::from_le_bytes(buf[r..r + N].try_into().unwrap());
                r += N;
                v
            }};
        }
        let well_id = take!(u128);
        let seq_index = take!(u64);
        let generation = take!(u32);
        let magic = take!(u32);
        let data_crc = take!(u32);
        let comp_meta_raw = take!(u32);
        let stored_header_crc = take!(u32);

        if magic != BLOCK_MAGIC {
            return Err(crate::error::Hn4Error::PhantomBlock);
        }
        let computed = crc32c(&buf[..r - 4]);
        if computed != stored_header_crc {
            return Err(crate::error::Hn4Error::HeaderRot);
        }
        Ok(Self {
            well_id,
            seq_index,
            generation,
            data_crc,
            comp_meta: CompMeta::decode(comp_meta_raw),
        })
    }

    /// CRC32C over the full payload slot: covers exactly `payload_capacity`
    /// bytes, including any zero padding past the logical data length.
    #[must_use]
    pub fn compute_data_crc(payload_capacity_slot: &[u8]) -> u32 {
        crc32c_append(0, payload_capacity_slot)
    }
}

/// Returns true iff `header` is valid for `(well_id, seq_index,
/// expected_generation)` under strict generation equality.
#[must_use]
pub fn header_matches(header: &BlockHeader, well_id: u128, seq_index: u64, expected_generation: u32) -> bool {
    header.well_id == well_id && header.seq_index == seq_index && header.generation == expected_generation
}

/// 64-byte stream-mode sub-header embedded at the start of a `HINT_STREAM`
/// anchor's payload, immediately after [`BlockHeader`]. Chains consecutive
/// blocks together and carries the Stitcher's hyper-skip pointer.
pub const STREAM_HEADER_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamBlockHeader {
    pub length: u64,
    /// Physical block index of the next block in the stream chain, or `0`
    /// if this is the tail.
    pub next_strm: u64,
    /// Physical block index 1024 blocks ahead in the chain, maintained by
    /// the Stitcher; `0` if not yet stitched.
    pub hyper_strm: u64,
    pub seq_id: u64,
}

impl StreamBlockHeader {
    #[must_use]
    pub fn to_bytes(&self) -> [u8; STREAM_HEADER_SIZE] {
        let mut buf = [0u8; STREAM_HEADER_SIZE];
        let mut w = 0usize;
        macro_rules! put {
            ($bytes:expr) => {{
                let b = $bytes;
                buf[w..w + b.len()].copy_from_slice(&b);
                w += b.len();
            }};
        }
        put!(STRM_MAGIC.to_le_bytes());
        put!(self.length.to_le_bytes());
        put!(self.next_strm.to_le_bytes());
        put!(self.hyper_strm.to_le_bytes());
        put!(self.seq_id.to_le_bytes());
        let crc = crc32c(&buf[..w]);
        buf[w..w + 4].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; STREAM_HEADER_SIZE]) -> Result<Self, crate::error::Hn4Error> {
        let mut r = 0usize;
        macro_rules! take {
            ($ty:ty) => {{
                const N: usize = std::mem::size_of::<$ty>();
                let v = <$ty>::from_le_bytes(buf[r..r + N].try_into().unwrap());
                r += N;
                v
            }};
        }
        let magic = take!(u32);
        let length = take!(u64);
        let next_strm = take!(u64);
        let hyper_strm = take!(u64);
        let seq_id = take!(u64);
        let stored_crc = take!(u32);
        if magic != STRM_MAGIC {
            return Err(crate::error::Hn4Error::PhantomBlock);
        }
        if crc32c(&buf[..r - 4]) != stored_crc {
            return Err(crate::error::Hn4Error::HeaderRot);
        }
        Ok(Self { length, next_strm, hyper_strm, seq_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = BlockHeader {
            well_id: 0xABCD,
            seq_index: 4,
            generation: 2,
            data_crc: 0x1234_5678,
            comp_meta: CompMeta { compressed: true, compressed_len: 900 },
        };
        let bytes = h.to_bytes();
        let back = BlockHeader::from_bytes(&bytes).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn bad_magic_is_phantom() {
        let h = BlockHeader {
            well_id: 1,
            seq_index: 0,
            generation: 1,
            data_crc: 0,
            comp_meta: CompMeta::default(),
        };
        let mut bytes = h.to_bytes();
        // Corrupt the magic field in place (offset 16+8+4 = 28).
        bytes[28] ^= 0xFF;
        assert!(matches!(
            BlockHeader::from_bytes(&bytes),
            Err(crate::error::Hn4Error::PhantomBlock)
        ));
    }

    #[test]
    fn stream_header_round_trips() {
        let h = StreamBlockHeader { length: 4096, next_strm: 17, hyper_strm: 0, seq_id: 3 };
        let bytes = h.to_bytes();
        assert_eq!(StreamBlockHeader::from_bytes(&bytes).unwrap(), h);
    }

    #[test]
    fn comp_meta_round_trips() {
        let m = CompMeta { compressed: true, compressed_len: 123_456 };
        assert_eq!(CompMeta::decode(m.encode()), m);
        let m2 = CompMeta { compressed: false, compressed_len: 0 };
        assert_eq!(CompMeta::decode(m2.encode()), m2);
    }
}
