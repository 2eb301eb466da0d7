//! Reaper: tombstone reclamation.

use hn4_hal::{BlockHal, IoOp, Profile};

use crate::cortex::VolumeContext;
use crate::delta_table::seed_hash;
use crate::error::Hn4Error;
use crate::geometry::VolumeGeometry;
use crate::placement::trajectory;
use crate::telemetry::LogLevel;
use crate::types::block::{BlockHeader, BLOCK_HEADER_SIZE};
use crate::types::{Anchor, DataClass};

/// Anchors scanned per pulse: a sliding window of 64 anchors.
const WINDOW_SIZE: usize = 64;

/// Grace period before a tombstoned anchor's blocks are reclaimed.
const GRACE_NS: u64 = 24 * 60 * 60 * 1_000_000_000;

/// Project every logical block of `anchor` to its expected physical index
/// under the anchor's own physics (shell 0 for Flux files, linear addressing
/// for Horizon files). Shared with the Auditor, which needs the same
/// projection to build its shadow bitmap.
pub(crate) fn blocks_of(geometry: &VolumeGeometry, anchor: &Anchor) -> Vec<u64> {
    let mut out = Vec::with_capacity(anchor.mass as usize);
    for n in 0..anchor.mass {
        let candidate = if anchor.data_class.contains(DataClass::HINT_HORIZON) {
            anchor.gravity_center.checked_add(n.checked_mul(anchor.quantum()).unwrap_or(u64::MAX))
        } else {
            trajectory(
                &geometry.flux,
                anchor.gravity_center,
                anchor.orbit_vector(),
                n,
                anchor.fractal_scale,
                0,
                geometry.device_class,
                geometry.profile,
            )
            .ok()
        };
        if let Some(idx) = candidate {
            if idx < geometry.total_blocks() {
                out.push(idx);
            }
        }
    }
    out
}

/// Re-read a candidate block and confirm it still belongs to `seed_id` at
/// `generation`.
fn still_owned(ctx: &VolumeContext, hal: &dyn BlockHal, geometry: &VolumeGeometry, block_index: u64, seed_id: u128, generation: u32) -> bool {
    if !ctx.bitmap_test(block_index).unwrap_or_default().value {
        return false;
    }
    let sectors = geometry.sectors_per_block();
    let mut buf = vec![0u8; geometry.block_size as usize];
    if hal.sync_io(IoOp::Read, geometry.block_to_lba(block_index), &mut buf, sectors).is_err() {
        return false;
    }
    let Ok(header_bytes): Result<[u8; BLOCK_HEADER_SIZE], _> = buf[..BLOCK_HEADER_SIZE].try_into() else {
        return false;
    };
    match BlockHeader::from_bytes(&header_bytes) {
        Ok(h) => h.well_id == seed_id && h.generation == generation,
        Err(_) => false,
    }
}

/// Coalesce sorted, deduplicated block indices into contiguous `(start,
/// count)` ranges so the flush can issue one DISCARD per run instead of one
/// per block.
fn coalesce(mut indices: Vec<u64>) -> Vec<(u64, u64)> {
    indices.sort_unstable();
    indices.dedup();
    let mut ranges = Vec::new();
    for idx in indices {
        if let Some(last) = ranges.last_mut() {
            let (start, count): &mut (u64, u64) = last;
            if *start + *count == idx {
                *count += 1;
                continue;
            }
        }
        ranges.push((idx, 1));
    }
    ranges
}

fn flush_range(ctx: &VolumeContext, hal: &dyn BlockHal, geometry: &VolumeGeometry, start: u64, count: u64, shred: bool) -> Result<(), Hn4Error> {
    let sectors_per_block = geometry.sectors_per_block();
    if shred {
        let zeros = vec![0u8; geometry.block_size as usize];
        for i in 0..count {
            let mut buf = zeros.clone();
            hal.sync_io(IoOp::Write, geometry.block_to_lba(start + i), &mut buf, sectors_per_block)?;
        }
    }
    let caps = hal.get_caps();
    if caps.hw_flags.contains(hn4_hal::HwFlags::DISCARD) {
        let lba = geometry.block_to_lba(start);
        let sectors = u32::try_from(count.saturating_mul(u64::from(sectors_per_block))).unwrap_or(u32::MAX);
        hal.sync_io(IoOp::Discard, lba, &mut [], sectors)?;
    }
    hal.barrier()?; // free-before-barrier is forbidden.
    for i in 0..count {
        ctx.bitmap_clear(start + i)?;
    }
    Ok(())
}

/// One Reaper pulse: scan the next window, bleach and reclaim anything past
/// its grace period.
pub fn pulse(ctx: &VolumeContext, hal: &dyn BlockHal, geometry: &VolumeGeometry) {
    let cursor = ctx.scavenger_cursor.load(std::sync::atomic::Ordering::Relaxed) as usize;
    let window = ctx.cortex.window(cursor, WINDOW_SIZE);
    if window.is_empty() {
        return;
    }
    ctx.scavenger_cursor
        .store((cursor + window.len()) as u64, std::sync::atomic::Ordering::Relaxed);

    let now = hal.get_time_ns();
    let pico = geometry.profile == Profile::Pico;

    let mut batch: Vec<u64> = Vec::new();
    let mut shred_needed = false;

    for (seed_id, anchor) in window {
        if !anchor.data_class.contains(DataClass::TOMBSTONE | DataClass::VALID) {
            continue;
        }
        if now.saturating_sub(anchor.mod_clock) < GRACE_NS {
            continue;
        }

        let bleached = anchor.bleached();
        let expected_gen = anchor.write_gen;
        if !ctx.cortex.replace_if_generation_unchanged(seed_id, expected_gen, bleached) {
            ctx.log(LogLevel::Debug, "scavenger:reaper", "abort", "generation_skew", format!("seed_id={seed_id}"));
            continue;
        }

        let hash = seed_hash(seed_id);
        let mut freed = Vec::new();
        for block_index in blocks_of(geometry, &anchor) {
            if !still_owned(ctx, hal, geometry, block_index, seed_id, expected_gen) {
                continue;
            }
            if ctx.delta_table.lookup(geometry.block_to_lba(block_index), hash, u64::from(expected_gen)) != 0 {
                // An in-flight migration still references this block; it is
                // not safe to discard yet.
                continue; // in-flight migration still references this block.
            }
            freed.push(block_index);
        }
        if freed.is_empty() {
            continue;
        }

        if anchor.data_class.contains(DataClass::FLAG_SHRED) {
            shred_needed = true;
        }

        if pico {
            let shred = anchor.data_class.contains(DataClass::FLAG_SHRED);
            for &idx in &freed {
                let _ = flush_range(ctx, hal, geometry, idx, 1, shred);
            }
        } else {
            batch.extend(freed);
        }
    }

    if !pico && !batch.is_empty() {
        for (start, count) in coalesce(batch) {
            let _ = flush_range(ctx, hal, geometry, start, count, shred_needed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::FluxGeometry;
    use crate::telemetry::NullSink;
    use crate::types::Permissions;
    use hn4_hal::{DeviceClass, HwFlags, InMemoryHal};
    use std::sync::Arc;

    fn setup() -> (VolumeContext, InMemoryHal, VolumeGeometry) {
        let geometry = VolumeGeometry {
            flux: FluxGeometry { flux_start_lba: 0, flux_blocks: 4096 },
            horizon_start_block: 4096,
            horizon_capacity_blocks: 256,
            block_size: 4096,
            sector_size: 512,
            device_class: DeviceClass::Ssd,
            profile: Profile::System,
        };
        let ctx = VolumeContext::new(geometry.total_blocks(), false, Arc::new(NullSink));
        let hal = InMemoryHal::new(geometry.total_blocks() * u64::from(geometry.block_size), DeviceClass::Ssd, HwFlags::DISCARD, 0);
        (ctx, hal, geometry)
    }

    fn write_live_block(ctx: &VolumeContext, hal: &InMemoryHal, geometry: &VolumeGeometry, anchor: &Anchor) {
        let mut a = *anchor;
        crate::write_pipeline::write(
            ctx,
            hal,
            geometry,
            &crate::codec::NullCodec,
            &mut a,
            0,
            &[0xAB; 16],
            16,
            Permissions::WRITE,
            false,
        )
        .unwrap();
    }

    #[test]
    fn old_tombstone_past_grace_is_reclaimed() {
        let (ctx, hal, geometry) = setup();
        let mut anchor = Anchor::new(100, 100, 17, 0, 0);
        anchor.permissions = Permissions::WRITE | Permissions::READ;
        ctx.cortex.insert(0, anchor);
        write_live_block(&ctx, &hal, &geometry, &anchor);
        let mut live = ctx.cortex.get(100).unwrap();

        live.data_class |= DataClass::TOMBSTONE;
        live.mod_clock = hal.get_time_ns();
        ctx.cortex.insert(0, live);

        let block_index = trajectory(&geometry.flux, live.gravity_center, live.orbit_vector(), 0, 0, 0, geometry.device_class, geometry.profile).unwrap();
        assert!(ctx.bitmap.test(block_index).unwrap().value);

        // The in-memory clock only ticks by 1 per call; jump it past the
        // grace period instead of calling the HAL that many times.
        hal.advance_clock(GRACE_NS + 1);
        pulse(&ctx, &hal, &geometry);

        assert!(!ctx.bitmap.test(block_index).unwrap().value);
        assert_eq!(hal.barrier_count(), 1);
        let after = ctx.cortex.get(100).unwrap();
        assert_eq!(after.mass, 0);
        assert_eq!(after.gravity_center, 0);
    }

    #[test]
    fn fresh_tombstone_within_grace_is_left_alone() {
        let (ctx, hal, geometry) = setup();
        let mut anchor = Anchor::new(101, 100, 17, 0, 0);
        anchor.data_class |= DataClass::TOMBSTONE;
        anchor.mod_clock = hal.get_time_ns();
        ctx.cortex.insert(0, anchor);
        pulse(&ctx, &hal, &geometry);
        assert_eq!(ctx.cortex.get(101).unwrap().mass, anchor.mass);
    }

    #[test]
    fn coalesce_merges_contiguous_runs() {
        let ranges = coalesce(vec![5, 6, 7, 10, 11, 20]);
        assert_eq!(ranges, vec![(5, 3), (10, 2), (20, 1)]);
    }
}
