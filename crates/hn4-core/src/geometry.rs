//! On-media geometry shared by the allocator, resolver, and write pipeline
//! (layout table, condensed to what the placement math and I/O
//! addressing need).

use hn4_hal::{DeviceClass, Profile};

use crate::placement::FluxGeometry;

/// Everything needed to turn a logical block index into a physical LBA and
/// back, for both the Flux (ballistic) and Horizon (linear overflow)
/// regions.
#[derive(Debug, Clone, Copy)]
pub struct VolumeGeometry {
    pub flux: FluxGeometry,
    pub horizon_start_block: u64,
    pub horizon_capacity_blocks: u64,
    pub block_size: u32,
    pub sector_size: u32,
    pub device_class: DeviceClass,
    pub profile: Profile,
}

impl VolumeGeometry {
    #[must_use]
    pub const fn sectors_per_block(&self) -> u32 {
        self.block_size / self.sector_size
    }

    /// Convert a physical block index to its starting LBA (in sectors).
    #[must_use]
    pub fn block_to_lba(&self, block_index: u64) -> u64 {
        block_index * u64::from(self.sectors_per_block())
    }

    #[must_use]
    pub const fn total_flux_blocks(&self) -> u64 {
        self.flux.flux_blocks / 1 // blocks, already in block units
    }

    #[must_use]
    pub fn total_blocks(&self) -> u64 {
        self.horizon_start_block + self.horizon_capacity_blocks
    }
}
