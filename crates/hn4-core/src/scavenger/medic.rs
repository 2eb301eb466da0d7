//! Medic: osteoplasty / re-ballistification.
//!
//! Wakes once `trajectory_collapse_counter` climbs past
//! [`COLLAPSE_WAKE_THRESHOLD`]. Samples bone density for a window of live
//! Flux anchors, enqueues the densest into the shared [`MedicQueue`], then
//! drains and migrates the top few each pulse.

use std::sync::atomic::Ordering;

use hn4_hal::{BlockHal, IoOp};

use crate::allocator::{self, AllocIntent};
use crate::cortex::{MedicCandidate, VolumeContext, COLLAPSE_WAKE_THRESHOLD};
use crate::delta_table::seed_hash;
use crate::geometry::VolumeGeometry;
use crate::placement::{gravity_assist, trajectory};
use crate::resolver;
use crate::telemetry::LogLevel;
use crate::types::{Anchor, DataClass};

/// Anchors scanned per pulse while sampling bone density.
const SCAN_WINDOW: usize = 64;

/// Osteoplasty candidates drained per pulse.
const DRAIN_PER_PULSE: usize = 4;

/// Logical indices sampled to estimate bone density.
const SAMPLE_COUNT: u64 = 8;

/// Collision shells a sample probes looking for the block's current home.
const MAX_SAMPLE_SHELL: u8 = 11;

/// Bone density at or above which a full pivot is used instead of a soft
/// pivot (leaves the choice open; a severely fragmented file
/// gets the stronger full pivot).
const FULL_PIVOT_THRESHOLD: u32 = 10;

/// Density at or above which an anchor is worth enqueuing.
const ENQUEUE_THRESHOLD: u32 = 4;

/// First collision shell at which `anchor`'s block `n` is actually resident,
/// or `None` if it cannot be found in any shell (sparse block).
fn first_hit_shell(ctx: &VolumeContext, hal: &dyn BlockHal, geometry: &VolumeGeometry, anchor: &Anchor, n: u64) -> Option<u8> {
    for k in 0..=MAX_SAMPLE_SHELL {
        let candidate = trajectory(
            &geometry.flux,
            anchor.gravity_center,
            anchor.orbit_vector(),
            n,
            anchor.fractal_scale,
            k,
            geometry.device_class,
            geometry.profile,
        )
        .ok()?;
        if candidate >= geometry.total_blocks() {
            continue;
        }
        if resolver::verify_block(ctx, hal, geometry, candidate, anchor.seed_id(), n, anchor.write_gen)
            .ok()
            .flatten()
            .is_some()
        {
            return Some(k);
        }
    }
    None
}

/// Average first-hit shell across up to [`SAMPLE_COUNT`] logical indices,
/// weighted 2x for compressed files.
fn bone_density(ctx: &VolumeContext, hal: &dyn BlockHal, geometry: &VolumeGeometry, anchor: &Anchor) -> u32 {
    if anchor.mass == 0 {
        return 0;
    }
    let stride = (anchor.mass / SAMPLE_COUNT).max(1);
    let mut total = 0u32;
    let mut count = 0u32;
    let mut n = 0u64;
    while n < anchor.mass && count < SAMPLE_COUNT as u32 {
        if let Some(k) = first_hit_shell(ctx, hal, geometry, anchor, n) {
            total += u32::from(k);
            count += 1;
        }
        n += stride;
    }
    if count == 0 {
        return 0;
    }
    let avg = total / count;
    if anchor.data_class.contains(DataClass::HINT_COMPRESSED) {
        avg * 2
    } else {
        avg
    }
}

/// Scan the next window of the Cortex, enqueueing densely-packed Flux
/// anchors into the medic queue.
fn scan(ctx: &VolumeContext, hal: &dyn BlockHal, geometry: &VolumeGeometry) {
    let cursor = ctx.medic_scan_cursor.load(Ordering::Relaxed) as usize;
    let window = ctx.cortex.window(cursor, SCAN_WINDOW);
    if window.is_empty() {
        return;
    }
    ctx.medic_scan_cursor.store((cursor + window.len()) as u64, Ordering::Relaxed);

    for (seed_id, anchor) in window {
        if !anchor.data_class.contains(DataClass::VALID) || anchor.data_class.contains(DataClass::TOMBSTONE) {
            continue;
        }
        if anchor.data_class.contains(DataClass::HINT_HORIZON) {
            continue; // Osteoplasty only re-ballistifies Flux-resident files.
        }
        let density = bone_density(ctx, hal, geometry, &anchor);
        if density >= ENQUEUE_THRESHOLD {
            ctx.medic_queue.push(MedicCandidate { seed_id, bone_density: density });
        }
    }
}

/// Migrate every block of `seed_id`'s anchor onto a freshly pivoted orbit
/// vector, rolling back cleanly on any mid-migration generation skew.
fn osteoplasty(ctx: &VolumeContext, hal: &dyn BlockHal, geometry: &VolumeGeometry, candidate: MedicCandidate) {
    let Some(anchor) = ctx.cortex.get(candidate.seed_id) else { return };
    if anchor.data_class.contains(DataClass::HINT_HORIZON) || anchor.mass == 0 {
        return;
    }

    let snapshot_gen = anchor.write_gen;
    let full_pivot = candidate.bone_density >= FULL_PIVOT_THRESHOLD;
    let new_v = if full_pivot {
        (anchor.orbit_vector() ^ 0xDEAD_BEEF_CAFE_BABE) | 1
    } else {
        gravity_assist(anchor.orbit_vector())
    };

    let hash = seed_hash(candidate.seed_id);
    let sectors = geometry.sectors_per_block();
    let mut migrated: Vec<(u64, u64)> = Vec::new(); // (old_idx, new_idx)
    let mut ok = true;

    for n in 0..anchor.mass {
        if ctx.cortex.get(candidate.seed_id).map(|a| a.write_gen) != Some(snapshot_gen) {
            ok = false;
            break;
        }
        let old_idx = match resolver::resolve(ctx, hal, geometry, &anchor, n) {
            Ok(outcome) => outcome.value,
            Err(_) => continue, // sparse logical block: nothing to migrate.
        };

        let mut buf = vec![0u8; geometry.block_size as usize];
        if hal.sync_io(IoOp::Read, geometry.block_to_lba(old_idx), &mut buf, sectors).is_err() {
            ok = false;
            break;
        }

        match allocator::allocate_block(ctx, geometry, anchor.gravity_center, new_v, n, anchor.fractal_scale, AllocIntent::Normal) {
            Ok(allocated) => {
                let new_idx = allocated.block_index;
                if hal.sync_io(IoOp::Write, geometry.block_to_lba(new_idx), &mut buf, sectors).is_err() {
                    let _ = ctx.bitmap_clear(new_idx);
                    ok = false;
                    break;
                }
                ctx.delta_table
                    .register(geometry.block_to_lba(old_idx), geometry.block_to_lba(new_idx), u64::from(snapshot_gen), hash);
                migrated.push((old_idx, new_idx));
            }
            Err(_) => {
                ok = false;
                break;
            }
        }
    }

    if ok {
        let mut new_anchor = anchor;
        new_anchor.set_orbit_vector(new_v);
        let committed = {
            let _guard = ctx.l2_lock.lock();
            ctx.cortex.replace_if_generation_unchanged(candidate.seed_id, snapshot_gen, new_anchor)
        };
        if committed {
            for (old_idx, _) in &migrated {
                let _ = ctx.bitmap_clear(*old_idx);
            }
            for (old_idx, _) in &migrated {
                ctx.delta_table.clear(geometry.block_to_lba(*old_idx), hash);
            }
            let prev = ctx.trajectory_collapse_counter.load(Ordering::Relaxed);
            if prev > 0 {
                ctx.trajectory_collapse_counter.fetch_sub(1, Ordering::Relaxed);
            }
            ctx.log(
                LogLevel::Info,
                "scavenger:medic",
                "osteoplasty",
                "migrated",
                format!("seed_id={} blocks={}", candidate.seed_id, migrated.len()),
            );
            return;
        }
        ok = false;
    }

    if !ok {
        for (old_idx, new_idx) in &migrated {
            let _ = ctx.bitmap_clear(*new_idx);
            ctx.delta_table.clear(geometry.block_to_lba(*old_idx), hash);
        }
        ctx.log(
            LogLevel::Debug,
            "scavenger:medic",
            "osteoplasty",
            "generation_skew",
            format!("seed_id={}", candidate.seed_id),
        );
    }
}

/// One Medic pulse: wakes only above the collapse threshold,
/// samples a window, then drains and migrates the densest candidates.
pub fn pulse(ctx: &VolumeContext, hal: &dyn BlockHal, geometry: &VolumeGeometry) {
    if ctx.trajectory_collapse_counter.load(Ordering::Relaxed) <= COLLAPSE_WAKE_THRESHOLD {
        return;
    }

    scan(ctx, hal, geometry);

    for candidate in ctx.medic_queue.drain_top(DRAIN_PER_PULSE) {
        osteoplasty(ctx, hal, geometry, candidate);
    }
}
