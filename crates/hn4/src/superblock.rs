//! On-media superblock: the first thing [`crate::mount`] reads
//! and the last thing [`crate::format_volume`] writes. Carries exactly the
//! geometry `VolumeGeometry` needs to reconstruct itself, plus the `dirty`
//! flag that tells a future mount whether the volume shut down cleanly.
//!
//! Three identical copies (North/East/West) are kept at LBA 0,
//! 33%·capacity, and 66%·capacity; a reader accepts the first copy whose
//! CRC verifies, so a single corrupted copy does not fail the mount.

use hn4_core::crc::crc32c;
use hn4_core::error::Hn4Error;
use hn4_core::geometry::VolumeGeometry;
use hn4_core::placement::FluxGeometry;
use hn4_core::types::magic::{ENDIAN_TAG, SB_MAGIC};
use hn4_hal::{BlockHal, DeviceClass, IoOp, Profile};

/// Fixed on-media size of one superblock copy: 8 KB.
pub const SUPERBLOCK_SIZE: usize = 8192;

/// The CRC32C trailer covers every byte preceding it: the final 4 bytes
/// cover the preceding 8188 bytes.
const CRC_COVERED: usize = SUPERBLOCK_SIZE - 4;

fn encode_device_class(dc: DeviceClass) -> u8 {
    match dc {
        DeviceClass::Ssd => 0,
        DeviceClass::Hdd => 1,
        DeviceClass::Zns => 2,
        DeviceClass::Tape => 3,
    }
}

fn decode_device_class(v: u8) -> Result<DeviceClass, Hn4Error> {
    match v {
        0 => Ok(DeviceClass::Ssd),
        1 => Ok(DeviceClass::Hdd),
        2 => Ok(DeviceClass::Zns),
        3 => Ok(DeviceClass::Tape),
        _ => Err(Hn4Error::BadSuperblock),
    }
}

fn encode_profile(p: Profile) -> u8 {
    match p {
        Profile::System => 0,
        Profile::Pico => 1,
        Profile::Usb => 2,
        Profile::Ai => 3,
        Profile::Archive => 4,
        Profile::HyperCloud => 5,
    }
}

fn decode_profile(v: u8) -> Result<Profile, Hn4Error> {
    match v {
        0 => Ok(Profile::System),
        1 => Ok(Profile::Pico),
        2 => Ok(Profile::Usb),
        3 => Ok(Profile::Ai),
        4 => Ok(Profile::Archive),
        5 => Ok(Profile::HyperCloud),
        _ => Err(Hn4Error::BadSuperblock),
    }
}

/// In-RAM view of the on-media superblock: just enough to reconstruct a
/// [`VolumeGeometry`] and decide whether the last unmount was clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    pub device_class: DeviceClass,
    pub profile: Profile,
    pub block_size: u32,
    pub sector_size: u32,
    pub flux_start_lba: u64,
    pub flux_blocks: u64,
    pub horizon_start_block: u64,
    pub horizon_capacity_blocks: u64,
    /// Set at format/write time, cleared on a clean unmount.
    pub dirty: bool,
}

impl SuperBlock {
    #[must_use]
    pub fn from_geometry(geometry: &VolumeGeometry, dirty: bool) -> Self {
        Self {
            device_class: geometry.device_class,
            profile: geometry.profile,
            block_size: geometry.block_size,
            sector_size: geometry.sector_size,
            flux_start_lba: geometry.flux.flux_start_lba,
            flux_blocks: geometry.flux.flux_blocks,
            horizon_start_block: geometry.horizon_start_block,
            horizon_capacity_blocks: geometry.horizon_capacity_blocks,
            dirty,
        }
    }

    #[must_use]
    pub fn geometry(&self) -> VolumeGeometry {
        VolumeGeometry {
            flux: FluxGeometry { flux_start_lba: self.flux_start_lba, flux_blocks: self.flux_blocks },
            horizon_start_block: self.horizon_start_block,
            horizon_capacity_blocks: self.horizon_capacity_blocks,
            block_size: self.block_size,
            sector_size: self.sector_size,
            device_class: self.device_class,
            profile: self.profile,
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        let mut w = 0usize;
        macro_rules! put {
            ($bytes:expr) => {{
                let b = $bytes;
                buf[w..w + b.len()].copy_from_slice(&b);
                w += b.len();
            }};
        }
        put!(SB_MAGIC.to_le_bytes());
        put!(ENDIAN_TAG.to_le_bytes());
        put!([encode_device_class(self.device_class)]);
        put!([encode_profile(self.profile)]);
        put!(self.block_size.to_le_bytes());
        put!(self.sector_size.to_le_bytes());
        put!(self.flux_start_lba.to_le_bytes());
        put!(self.flux_blocks.to_le_bytes());
        put!(self.horizon_start_block.to_le_bytes());
        put!(self.horizon_capacity_blocks.to_le_bytes());
        put!([u8::from(self.dirty)]);
        let crc = crc32c(&buf[..CRC_COVERED]);
        buf[CRC_COVERED..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; SUPERBLOCK_SIZE]) -> Result<Self, Hn4Error> {
        let stored_crc = u32::from_le_bytes(buf[CRC_COVERED..].try_into().unwrap());
        if crc32c(&buf[..CRC_COVERED]) != stored_crc {
            return Err(Hn4Error::BadSuperblock);
        }
        let mut r = 0usize;
        macro_rules! take {
            ($ty:ty) => {{
                const N: usize = std::mem::size_of::<$ty>();
                let v = <$ty>::from_le_bytes(buf[r..r + N].try_into().unwrap());
                r += N;
                v
            }};
        }
        let magic = take!(u64);
        if magic != SB_MAGIC {
            return Err(Hn4Error::BadSuperblock);
        }
        let endian_tag = take!(u32);
        if endian_tag != ENDIAN_TAG {
            return Err(Hn4Error::EndianMismatch);
        }
        let device_class = decode_device_class(buf[r])?;
        r += 1;
        let profile = decode_profile(buf[r])?;
        r += 1;
        let block_size = take!(u32);
        let sector_size = take!(u32);
        let flux_start_lba = take!(u64);
        let flux_blocks = take!(u64);
        let horizon_start_block = take!(u64);
        let horizon_capacity_blocks = take!(u64);
        let dirty = buf[r] != 0;
        Ok(Self {
            device_class,
            profile,
            block_size,
            sector_size,
            flux_start_lba,
            flux_blocks,
            horizon_start_block,
            horizon_capacity_blocks,
            dirty,
        })
    }
}

/// The three copy offsets, in bytes from the start of the device:
/// LBA 0, 33% of capacity, 66% of capacity.
fn copy_offsets_bytes(total_capacity_bytes: u64) -> [u64; 3] {
    [0, total_capacity_bytes / 3, (total_capacity_bytes * 2) / 3]
}

fn copy_lba(offset_bytes: u64, sector_size: u32) -> u64 {
    offset_bytes / u64::from(sector_size)
}

/// Write all three superblock copies. A hard I/O error on any copy is
/// propagated; callers that care about partial writes inspect which copy
/// failed via the returned index.
pub fn write_copies(hal: &dyn BlockHal, total_capacity_bytes: u64, sb: &SuperBlock) -> Result<(), Hn4Error> {
    let caps = hal.get_caps();
    let bytes = sb.to_bytes();
    let sectors = u32::try_from(SUPERBLOCK_SIZE as u64 / u64::from(caps.logical_block_size)).unwrap_or(0);
    for offset in copy_offsets_bytes(total_capacity_bytes) {
        let lba = copy_lba(offset, caps.logical_block_size);
        let mut buf = bytes;
        hal.sync_io(IoOp::Write, lba, &mut buf, sectors)?;
    }
    hal.barrier()?;
    Ok(())
}

/// Read the first superblock copy that parses and verifies; falls back to
/// the next copy on a CRC failure, mirroring a quorum-of-3 read without
/// implementing full epoch-ring voting (out of scope).
pub fn read_quorum(hal: &dyn BlockHal, total_capacity_bytes: u64) -> Result<SuperBlock, Hn4Error> {
    let caps = hal.get_caps();
    let sectors = u32::try_from(SUPERBLOCK_SIZE as u64 / u64::from(caps.logical_block_size)).unwrap_or(0);
    let mut last_err = Hn4Error::BadSuperblock;
    for offset in copy_offsets_bytes(total_capacity_bytes) {
        let lba = copy_lba(offset, caps.logical_block_size);
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        if hal.sync_io(IoOp::Read, lba, &mut buf, sectors).is_err() {
            continue;
        }
        match SuperBlock::from_bytes(&buf) {
            Ok(sb) => return Ok(sb),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hn4_core::placement::FluxGeometry;
    use hn4_hal::{HwFlags, InMemoryHal};

    fn geometry() -> VolumeGeometry {
        VolumeGeometry {
            flux: FluxGeometry { flux_start_lba: 100, flux_blocks: 4096 },
            horizon_start_block: 4196,
            horizon_capacity_blocks: 256,
            block_size: 4096,
            sector_size: 512,
            device_class: DeviceClass::Ssd,
            profile: Profile::System,
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let sb = SuperBlock::from_geometry(&geometry(), true);
        let back = SuperBlock::from_bytes(&sb.to_bytes()).unwrap();
        assert_eq!(sb, back);
    }

    #[test]
    fn corrupt_crc_is_rejected() {
        let sb = SuperBlock::from_geometry(&geometry(), false);
        let mut bytes = sb.to_bytes();
        bytes[0] ^= 0xFF;
        assert!(matches!(SuperBlock::from_bytes(&bytes), Err(Hn4Error::BadSuperblock)));
    }

    #[test]
    fn write_then_read_quorum_round_trips() {
        let total_bytes = 64u64 * 1024 * 1024;
        let hal = InMemoryHal::new(total_bytes, DeviceClass::Ssd, HwFlags::empty(), 0);
        let sb = SuperBlock::from_geometry(&geometry(), false);
        write_copies(&hal, total_bytes, &sb).unwrap();
        let back = read_quorum(&hal, total_bytes).unwrap();
        assert_eq!(sb, back);
    }

    #[test]
    fn quorum_read_survives_a_corrupted_north_copy() {
        let total_bytes = 64u64 * 1024 * 1024;
        let hal = InMemoryHal::new(total_bytes, DeviceClass::Ssd, HwFlags::empty(), 0);
        let sb = SuperBlock::from_geometry(&geometry(), false);
        write_copies(&hal, total_bytes, &sb).unwrap();
        // Stomp the North copy directly; East/West still verify.
        let mut garbage = [0xFFu8; 512];
        hal.sync_io(IoOp::Write, 0, &mut garbage, 1).unwrap();
        let back = read_quorum(&hal, total_bytes).unwrap();
        assert_eq!(sb, back);
    }
}
