//! Evacuator: ZNS zone packing.
//!
//! Runs only on zoned devices, one victim zone per pulse, round-robin across
//! the Flux region's zones. Stale blocks (header generation behind the
//! owning anchor) are left for the zone reset; live blocks are copied to a
//! fresh Horizon slot and the original zone is reset once every live block
//! has a confirmed copy elsewhere.

use std::sync::atomic::Ordering;

use hn4_hal::{BlockHal, DeviceClass, IoOp};

use crate::cortex::VolumeContext;
use crate::delta_table::seed_hash;
use crate::error::Hn4Error;
use crate::geometry::VolumeGeometry;
use crate::telemetry::LogLevel;
use crate::types::block::{BlockHeader, BLOCK_HEADER_SIZE};

/// Evacuator runs every 100 pulses, gated by the caller
/// (`scavenger::pulse`); this module only knows how to do one round.
/// Claim a raw Horizon slot without touching any anchor's addressing (the
/// evacuated block is found again purely through the Delta Table),
/// mirroring [`crate::allocator::horizon::horizon_allocate`]'s ring retry
/// without its anchor-specific bookkeeping.
const RAW_HORIZON_RETRY_LIMIT: u32 = 4;

fn raw_horizon_slot(ctx: &VolumeContext, geometry: &VolumeGeometry) -> Result<u64, Hn4Error> {
    let capacity = geometry.horizon_capacity_blocks;
    if capacity == 0 {
        return Err(Hn4Error::EventHorizon);
    }
    for _ in 0..RAW_HORIZON_RETRY_LIMIT {
        let slot = ctx.horizon_write_head.fetch_add(1, Ordering::AcqRel) % capacity;
        let block_index = geometry.horizon_start_block + slot;
        let (ok, changed) = ctx.bitmap_set(block_index)?;
        if ok && changed {
            return Ok(block_index);
        }
    }
    Err(Hn4Error::EventHorizon)
}

/// One Evacuator pulse: pack the next victim zone, or do nothing on a
/// non-zoned device.
pub fn pulse(ctx: &VolumeContext, hal: &dyn BlockHal, geometry: &VolumeGeometry) {
    if geometry.device_class != DeviceClass::Zns {
        return;
    }
    let caps = hal.get_caps();
    if !caps.is_zoned() || caps.zone_size_bytes == 0 {
        return;
    }
    let zone_blocks = caps.zone_size_bytes / u64::from(geometry.block_size);
    if zone_blocks == 0 {
        return;
    }
    let flux_start = geometry.flux.flux_start_lba;
    let zone_count = geometry.flux.flux_blocks / zone_blocks;
    if zone_count == 0 {
        return;
    }

    let zone_idx = ctx.evacuator_cursor.fetch_add(1, Ordering::AcqRel) % zone_count;
    let zone_start_block = flux_start + zone_idx * zone_blocks;
    let sectors = geometry.sectors_per_block();

    let mut must_move = 0u64;
    let mut moved = 0u64;

    for offset in 0..zone_blocks {
        let block_index = zone_start_block + offset;
        if !ctx.bitmap_test(block_index).unwrap_or_default().value {
            continue;
        }
        let mut buf = vec![0u8; geometry.block_size as usize];
        if hal.sync_io(IoOp::Read, geometry.block_to_lba(block_index), &mut buf, sectors).is_err() {
            continue;
        }
        let Ok(header_bytes): Result<[u8; BLOCK_HEADER_SIZE], _> = buf[..BLOCK_HEADER_SIZE].try_into() else {
            continue;
        };
        let Ok(header) = BlockHeader::from_bytes(&header_bytes) else {
            continue; // unreadable header: leave for the Auditor, not our problem.
        };
        let Some(owner) = ctx.cortex.get(header.well_id) else {
            continue; // orphaned block: the reset below will reclaim it.
        };
        if header.generation != owner.write_gen {
            continue; // stale shadow: reset reclaims it without copying.
        }

        must_move += 1;
        match raw_horizon_slot(ctx, geometry) {
            Ok(new_idx) => {
                if hal.sync_io(IoOp::Write, geometry.block_to_lba(new_idx), &mut buf, sectors).is_err() {
                    let _ = ctx.bitmap_clear(new_idx);
                    continue;
                }
                ctx.delta_table.register(
                    geometry.block_to_lba(block_index),
                    geometry.block_to_lba(new_idx),
                    u64::from(header.generation),
                    seed_hash(header.well_id),
                );
                moved += 1;
            }
            Err(_) => {}
        }
    }

    if must_move == 0 || moved != must_move {
        return;
    }

    let reset_sectors = u32::try_from(zone_blocks.saturating_mul(u64::from(sectors))).unwrap_or(u32::MAX);
    if hal
        .sync_io(IoOp::ZoneReset, geometry.block_to_lba(zone_start_block), &mut [], reset_sectors)
        .is_err()
    {
        return;
    }
    match hal.barrier() {
        Ok(()) => {
            for offset in 0..zone_blocks {
                let _ = ctx.bitmap_clear(zone_start_block + offset);
            }
            ctx.log(
                LogLevel::Info,
                "scavenger:evacuator",
                "zone_packed",
                "reset",
                format!("zone={zone_idx} moved={moved}"),
            );
        }
        Err(_) => ctx.raise_panic("evacuator_barrier_after_reset_failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::FluxGeometry;
    use crate::telemetry::NullSink;
    use crate::types::block::CompMeta;
    use crate::types::Anchor;
    use hn4_hal::{HwFlags, InMemoryHal, Profile};
    use std::sync::Arc;

    fn setup(zone_blocks: u64) -> (VolumeContext, InMemoryHal, VolumeGeometry) {
        let geometry = VolumeGeometry {
            flux: FluxGeometry { flux_start_lba: 0, flux_blocks: zone_blocks * 4 },
            horizon_start_block: zone_blocks * 4,
            horizon_capacity_blocks: 256,
            block_size: 4096,
            sector_size: 512,
            device_class: DeviceClass::Zns,
            profile: Profile::System,
        };
        let ctx = VolumeContext::new(geometry.total_blocks(), false, Arc::new(NullSink));
        let zone_size_bytes = zone_blocks * u64::from(geometry.block_size);
        let hal = InMemoryHal::new(geometry.total_blocks() * u64::from(geometry.block_size), DeviceClass::Zns, HwFlags::ZONED, zone_size_bytes);
        (ctx, hal, geometry)
    }

    fn plant_live_block(ctx: &VolumeContext, hal: &InMemoryHal, geometry: &VolumeGeometry, block_index: u64, seed_id: u128) {
        ctx.bitmap.set(block_index).unwrap();
        let anchor = Anchor::new(seed_id, 0, 1, 0, 0);
        ctx.cortex.insert(0, anchor);
        let header = BlockHeader { well_id: seed_id, seq_index: 0, generation: anchor.write_gen, data_crc: 0, comp_meta: CompMeta::default() };
        let mut buf = vec![0u8; geometry.block_size as usize];
        buf[..BLOCK_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        hal.sync_io(IoOp::Write, geometry.block_to_lba(block_index), &mut buf, geometry.sectors_per_block()).unwrap();
    }

    #[test]
    fn non_zoned_device_is_a_no_op() {
        let (ctx, hal, mut geometry) = setup(8);
        geometry.device_class = DeviceClass::Ssd;
        pulse(&ctx, &hal, &geometry);
        assert_eq!(ctx.evacuator_cursor.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn live_block_is_copied_out_before_reset() {
        let (ctx, hal, geometry) = setup(8);
        plant_live_block(&ctx, &hal, &geometry, 0, 42);
        pulse(&ctx, &hal, &geometry);
        assert!(!ctx.bitmap.test(0).unwrap().value);
        let redirect = ctx.delta_table.lookup(geometry.block_to_lba(0), seed_hash(42), 1);
        assert_ne!(redirect, 0);
    }

    #[test]
    fn empty_zone_is_skipped_without_side_effects() {
        let (ctx, hal, geometry) = setup(8);
        pulse(&ctx, &hal, &geometry);
        assert_eq!(hal.barrier_count(), 0);
    }
}
