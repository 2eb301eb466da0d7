//! Magic constants.

pub const SB_MAGIC: u64 = 0x4859_4452_415F_4E34;
pub const BLOCK_MAGIC: u32 = 0x424C_4B30;
pub const STRM_MAGIC: u32 = u32::from_le_bytes(*b"STRM");
pub const RDIR_MAGIC: u32 = u32::from_le_bytes(*b"RDIR");
pub const META_MAGIC: u32 = u32::from_le_bytes(*b"META");
pub const NANO_MAGIC: u32 = 0x4E41_4E4F;
pub const NANO_PENDING_MAGIC: u32 = 0x504E_4447;
pub const CHRON_MAGIC: u64 = u64::from_le_bytes(*b"CHRONICL");
pub const ENDIAN_TAG: u32 = 0x1122_3344;
