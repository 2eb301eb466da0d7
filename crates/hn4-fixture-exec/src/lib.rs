//! Six concrete end-to-end scenarios, each a standalone, deterministic walk
//! through the real public API against [`InMemoryHal`]. Exposed both as
//! library functions (for `hn4-harness`'s `verify` subcommand) and as
//! `#[test]`s here.

use std::sync::Arc;

use hn4_core::cortex::{MedicCandidate, VolumeContext, COLLAPSE_WAKE_THRESHOLD};
use hn4_core::error::Hn4Error;
use hn4_core::placement::{trajectory, FluxGeometry};
use hn4_core::scavenger::{medic, reaper};
use hn4_core::telemetry::NullSink;
use hn4_core::types::{Anchor, DataClass, Permissions};
use hn4_core::{codec::NullCodec, geometry::VolumeGeometry, resolver, write_pipeline};
use hn4_hal::{BlockHal, DeviceClass, HwFlags, IoOp, InMemoryHal, Profile};

/// Outcome of running one scenario.
#[derive(Debug)]
pub struct ScenarioResult {
    pub name: &'static str,
    pub outcome: Result<(), String>,
}

impl ScenarioResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }
}

fn check(cond: bool, msg: &str) -> Result<(), String> {
    if cond { Ok(()) } else { Err(msg.to_string()) }
}

fn small_flux_geometry(device_class: DeviceClass) -> VolumeGeometry {
    VolumeGeometry {
        flux: FluxGeometry { flux_start_lba: 0, flux_blocks: 4096 },
        horizon_start_block: 4096,
        horizon_capacity_blocks: 256,
        block_size: 4096,
        sector_size: 512,
        device_class,
        profile: Profile::System,
    }
}

fn mounted(device_class: DeviceClass) -> (VolumeContext, InMemoryHal, VolumeGeometry) {
    let geo = small_flux_geometry(device_class);
    let ctx = VolumeContext::new(geo.total_blocks(), false, Arc::new(NullSink));
    let hal = InMemoryHal::new(geo.total_blocks() * u64::from(geo.block_size), device_class, HwFlags::empty(), 0);
    (ctx, hal, geo)
}

/// Scenario 1: write, read, same block.
pub fn write_read_same_block() -> ScenarioResult {
    let outcome = (|| {
        let (ctx, hal, geo) = mounted(DeviceClass::Ssd);
        let mut anchor = Anchor::new(0x01_00, 100, 17, 0, 0);
        ctx.cortex.insert(0, anchor);

        let payload = vec![0xAAu8; 1024];
        write_pipeline::write(&ctx, &hal, &geo, &NullCodec, &mut anchor, 0, &payload, payload.len(), Permissions::WRITE, false)
            .map_err(|e| format!("write failed: {e:?}"))?;
        check(anchor.write_gen == 2, &format!("expected write_gen=2, got {}", anchor.write_gen))?;

        let idx = resolver::resolve(&ctx, &hal, &geo, &anchor, 0).map_err(|e| format!("resolve failed: {e:?}"))?.value;
        check(ctx.bitmap.test(idx).map_err(|e| format!("{e:?}"))?.value, "resolved block should be marked resident")?;

        let (header, data) = resolver::verify_block(&ctx, &hal, &geo, idx, anchor.seed_id(), 0, anchor.write_gen)
            .map_err(|e| format!("verify failed: {e:?}"))?
            .ok_or("verify_block returned None")?;
        check(header.well_id == anchor.seed_id(), "well_id mismatch")?;
        check(header.seq_index == 0, "seq_index mismatch")?;
        check(header.generation == 2, "generation mismatch")?;
        check(data[..1024] == payload[..], "readback bytes do not match what was written")
    })();
    ScenarioResult { name: "write_read_same_block", outcome }
}

/// Scenario 2: overwrite eclipses the old block.
pub fn overwrite_eclipses_old() -> ScenarioResult {
    let outcome = (|| {
        let (ctx, hal, geo) = mounted(DeviceClass::Ssd);
        let mut anchor = Anchor::new(0x02_00, 100, 17, 0, 0);
        ctx.cortex.insert(0, anchor);

        write_pipeline::write(&ctx, &hal, &geo, &NullCodec, &mut anchor, 0, &[0xAA; 1024], 1024, Permissions::WRITE, false)
            .map_err(|e| format!("first write failed: {e:?}"))?;
        let old_idx = resolver::resolve(&ctx, &hal, &geo, &anchor, 0).map_err(|e| format!("{e:?}"))?.value;

        write_pipeline::write(&ctx, &hal, &geo, &NullCodec, &mut anchor, 0, &[0xBB; 1024], 1024, Permissions::WRITE, false)
            .map_err(|e| format!("second write failed: {e:?}"))?;
        check(anchor.write_gen == 3, &format!("expected write_gen=3, got {}", anchor.write_gen))?;

        let new_idx = resolver::resolve(&ctx, &hal, &geo, &anchor, 0).map_err(|e| format!("{e:?}"))?.value;
        check(new_idx != old_idx, "resolver still points at the old block")?;
        check(!ctx.bitmap.test(old_idx).map_err(|e| format!("{e:?}"))?.value, "old block's bitmap bit was not cleared")?;

        let (_, data) = resolver::verify_block(&ctx, &hal, &geo, new_idx, anchor.seed_id(), 0, anchor.write_gen)
            .map_err(|e| format!("{e:?}"))?
            .ok_or("verify_block returned None")?;
        check(data[..1024].iter().all(|&b| b == 0xBB), "read did not return the latest write's bytes")
    })();
    ScenarioResult { name: "overwrite_eclipses_old", outcome }
}

/// Scenario 3: tombstone with grace — left alone at t0+23h, reclaimed at
/// t0+25h.
pub fn tombstone_with_grace() -> ScenarioResult {
    const HOUR_NS: u64 = 60 * 60 * 1_000_000_000;

    let outcome = (|| {
        let (ctx, hal, geo) = mounted(DeviceClass::Ssd);
        let mut anchor = Anchor::new(0x03_00, 100, 17, 0, 0);
        ctx.cortex.insert(0, anchor);
        write_pipeline::write(&ctx, &hal, &geo, &NullCodec, &mut anchor, 0, &[0xCC; 16], 16, Permissions::WRITE, false)
            .map_err(|e| format!("seed write failed: {e:?}"))?;

        let mut tombstoned = anchor;
        tombstoned.data_class |= DataClass::TOMBSTONE;
        tombstoned.mod_clock = hal.get_time_ns();
        ctx.cortex.insert(0, tombstoned);

        hal.advance_clock(23 * HOUR_NS);
        reaper::pulse(&ctx, &hal, &geo);
        let at_23h = ctx.cortex.get(0x03_00).ok_or("anchor vanished at t0+23h")?;
        check(at_23h.mass != 0, "anchor was reclaimed before its grace period elapsed")?;

        hal.advance_clock(2 * HOUR_NS); // total elapsed since t0 is now 25h
        reaper::pulse(&ctx, &hal, &geo);
        let at_25h = ctx.cortex.get(0x03_00).ok_or("anchor vanished at t0+25h")?;
        check(at_25h.mass == 0, "anchor was not reclaimed past its grace period")
    })();
    ScenarioResult { name: "tombstone_with_grace", outcome }
}

/// Scenario 4: Horizon fallback once the Flux region is fully occupied.
pub fn horizon_fallback_when_flux_full() -> ScenarioResult {
    let outcome = (|| {
        let (ctx, hal, geo) = mounted(DeviceClass::Ssd);
        for idx in 0..geo.horizon_start_block {
            ctx.bitmap.set(idx).map_err(|e| format!("pre-fill failed at {idx}: {e:?}"))?;
        }

        let mut anchor = Anchor::new(0x04_00, 100, 17, 0, 0);
        ctx.cortex.insert(0, anchor);
        write_pipeline::write(&ctx, &hal, &geo, &NullCodec, &mut anchor, 0, &[0xDD; 16], 16, Permissions::WRITE, false)
            .map_err(|e| format!("horizon-fallback write failed: {e:?}"))?;

        check(anchor.data_class.contains(DataClass::HINT_HORIZON), "anchor did not gain HINT_HORIZON")?;
        let resolved = resolver::resolve(&ctx, &hal, &geo, &anchor, 0).map_err(|e| format!("{e:?}"))?.value;
        check(
            anchor.gravity_center == resolved,
            "G + N*quantum should equal the allocated block for N=0",
        )?;

        let (_, data) = resolver::verify_block(&ctx, &hal, &geo, resolved, anchor.seed_id(), 0, anchor.write_gen)
            .map_err(|e| format!("{e:?}"))?
            .ok_or("verify_block returned None")?;
        check(data[..16].iter().all(|&b| b == 0xDD), "horizon-resident block did not round-trip its payload")
    })();
    ScenarioResult { name: "horizon_fallback_when_flux_full", outcome }
}

/// Scenario 5: generation skew aborts an in-flight osteoplasty migration.
pub fn generation_skew_on_osteoplasty() -> ScenarioResult {
    let outcome = (|| {
        let (ctx, hal, geo) = mounted(DeviceClass::Ssd);
        let mut anchor = Anchor::new(0x05_00, 100, 17, 0, 0);
        ctx.cortex.insert(0, anchor);
        write_pipeline::write(&ctx, &hal, &geo, &NullCodec, &mut anchor, 0, &[0xEE; 16], 16, Permissions::WRITE, false)
            .map_err(|e| format!("seed write failed: {e:?}"))?;
        let before_idx = resolver::resolve(&ctx, &hal, &geo, &anchor, 0).map_err(|e| format!("{e:?}"))?.value;
        let gen_before = anchor.write_gen;

        // Concurrent user write bumps the generation before Medic commits.
        let mut concurrent = anchor;
        write_pipeline::write(&ctx, &hal, &geo, &NullCodec, &mut concurrent, 0, &[0xFF; 16], 16, Permissions::WRITE, false)
            .map_err(|e| format!("concurrent write failed: {e:?}"))?;
        check(concurrent.write_gen != gen_before, "concurrent write did not advance the generation")?;

        ctx.trajectory_collapse_counter.store(COLLAPSE_WAKE_THRESHOLD + 1, std::sync::atomic::Ordering::Relaxed);
        ctx.medic_queue.push(MedicCandidate { seed_id: 0x05_00, bone_density: 12 });
        medic::pulse(&ctx, &hal, &geo);

        let after = ctx.cortex.get(0x05_00).ok_or("anchor vanished")?;
        check(after.write_gen == concurrent.write_gen, "migration committed despite the generation skew")?;
        check(after.orbit_vector() == concurrent.orbit_vector(), "orbit vector changed despite the rolled-back migration")?;
        let still_resolves = resolver::resolve(&ctx, &hal, &geo, &after, 0).map(|o| o.value).ok();
        check(still_resolves == Some(before_idx), "file no longer resolves to its pre-migration block")
    })();
    ScenarioResult { name: "generation_skew_on_osteoplasty", outcome }
}

/// Scenario 6: ZNS genesis drift — `N=0` self-heals by adopting the
/// drive-reported LBA; any other `N` hard-fails with `Geometry` and taints
/// the volume.
pub fn zns_genesis_drift() -> ScenarioResult {
    let outcome = zns_genesis_drift_inner().and_then(|()| zns_genesis_drift_tail_fails());
    ScenarioResult { name: "zns_genesis_drift", outcome }
}

fn zns_geometry() -> VolumeGeometry {
    VolumeGeometry {
        flux: FluxGeometry { flux_start_lba: 0, flux_blocks: 4096 },
        horizon_start_block: 4096,
        horizon_capacity_blocks: 256,
        block_size: 4096,
        sector_size: 512,
        device_class: DeviceClass::Zns,
        profile: Profile::System,
    }
}

/// Consume one block's worth of sectors from `zone_start`'s append pointer,
/// but only when the predicted block already sits at the zone's first slot
/// (offset 0) — the only case where a virgin zone's pointer would otherwise
/// coincide with the prediction and no drift would occur.
fn force_drift_if_aligned(hal: &InMemoryHal, zone_start: u64, offset_in_zone: u64, sectors_per_block: u32) -> Result<(), String> {
    if offset_in_zone != 0 {
        return Ok(());
    }
    hal.sync_io(IoOp::ZoneAppend, zone_start, &mut vec![0u8; sectors_per_block as usize * 512], sectors_per_block)
        .map(|_| ())
        .map_err(|e| format!("dummy zone append failed: {e:?}"))
}

fn zns_genesis_drift_inner() -> Result<(), String> {
    const ZONE_SIZE_BYTES: u64 = 64 * 1024; // 128 sectors/zone, 16 blocks/zone
    let geo = zns_geometry();
    let ctx = VolumeContext::new(geo.total_blocks(), false, Arc::new(NullSink));
    let hal = InMemoryHal::new(geo.total_blocks() * u64::from(geo.block_size), DeviceClass::Zns, HwFlags::ZONED, ZONE_SIZE_BYTES);

    let mut anchor = Anchor::new(0x06_00, 100, 17, 0, 0);
    ctx.cortex.insert(0, anchor);

    let predicted = trajectory(&geo.flux, anchor.gravity_center, anchor.orbit_vector(), 0, anchor.fractal_scale, 0, geo.device_class, geo.profile)
        .map_err(|e| format!("trajectory failed: {e:?}"))?;
    let predicted_lba = geo.block_to_lba(predicted);
    let zone_sectors = ZONE_SIZE_BYTES / 512;
    let zone_start = (predicted_lba / zone_sectors) * zone_sectors;
    let offset_in_zone = predicted_lba - zone_start;
    force_drift_if_aligned(&hal, zone_start, offset_in_zone, geo.sectors_per_block())?;

    write_pipeline::write(&ctx, &hal, &geo, &NullCodec, &mut anchor, 0, &[0x11; 16], 16, Permissions::WRITE, false)
        .map_err(|e| format!("drifted write failed: {e:?}"))?;

    check(anchor.gravity_center != 100, "anchor's gravity_center should adopt the drive-reported LBA")?;
    let resolved = resolver::resolve(&ctx, &hal, &geo, &anchor, 0).map_err(|e| format!("{e:?}"))?.value;
    let (_, data) = resolver::verify_block(&ctx, &hal, &geo, resolved, anchor.seed_id(), 0, anchor.write_gen)
        .map_err(|e| format!("{e:?}"))?
        .ok_or("verify_block returned None")?;
    check(data[..16].iter().all(|&b| b == 0x11), "drift-corrected block did not round-trip its payload")
}

fn zns_genesis_drift_tail_fails() -> Result<(), String> {
    const ZONE_SIZE_BYTES: u64 = 64 * 1024;
    let geo = zns_geometry();
    let ctx = VolumeContext::new(geo.total_blocks(), false, Arc::new(NullSink));
    let hal = InMemoryHal::new(geo.total_blocks() * u64::from(geo.block_size), DeviceClass::Zns, HwFlags::ZONED, ZONE_SIZE_BYTES);

    // A fresh anchor: N=5 is written directly (no APPEND-only restriction in
    // play, so a sparse leading range is fine), matching the scenario's
    // framing of "the same drift occurs, but at N=5" without needing N=0..4
    // to have landed cleanly first.
    let mut anchor = Anchor::new(0x06_01, 100, 17, 0, 0);
    ctx.cortex.insert(0, anchor);

    let predicted = trajectory(&geo.flux, anchor.gravity_center, anchor.orbit_vector(), 5, anchor.fractal_scale, 0, geo.device_class, geo.profile)
        .map_err(|e| format!("trajectory failed: {e:?}"))?;
    let predicted_lba = geo.block_to_lba(predicted);
    let zone_sectors = ZONE_SIZE_BYTES / 512;
    let zone_start = (predicted_lba / zone_sectors) * zone_sectors;
    let offset_in_zone = predicted_lba - zone_start;
    force_drift_if_aligned(&hal, zone_start, offset_in_zone, geo.sectors_per_block())?;

    let gravity_before = anchor.gravity_center;
    match write_pipeline::write(&ctx, &hal, &geo, &NullCodec, &mut anchor, 5, &[0x33; 16], 16, Permissions::WRITE, false) {
        Err(Hn4Error::Geometry) => {}
        other => return Err(format!("expected Geometry error on a tail-index drift, got {other:?}")),
    }
    check(anchor.gravity_center == gravity_before, "anchor's gravity_center must be left unchanged on a rejected tail drift")?;

    // The dummy append above consumed exactly one block's worth of the
    // zone's write pointer, so the drifted write lands one block past
    // `predicted` — matching scenario 6's "bit 200 marked set (leak), bit
    // 204 cleared": the predicted bit must be released and the drive's
    // actual landing block must stay set, or the allocator could hand that
    // still-live LBA to a different file.
    let actual = predicted + 1;
    check(!ctx.bitmap.test(predicted).map_err(|e| format!("{e:?}"))?.value, "predicted block's bitmap bit should be released")?;
    check(ctx.bitmap.test(actual).map_err(|e| format!("{e:?}"))?.value, "the drive's actual landing block must remain marked resident (leaked, not freed)")
}

/// Every concrete scenario.
#[must_use]
pub fn run_all() -> Vec<ScenarioResult> {
    vec![
        write_read_same_block(),
        overwrite_eclipses_old(),
        tombstone_with_grace(),
        horizon_fallback_when_flux_full(),
        generation_skew_on_osteoplasty(),
        zns_genesis_drift(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_1() {
        let r = write_read_same_block();
        assert!(r.passed(), "{:?}", r.outcome);
    }

    #[test]
    fn scenario_2() {
        let r = overwrite_eclipses_old();
        assert!(r.passed(), "{:?}", r.outcome);
    }

    #[test]
    fn scenario_3() {
        let r = tombstone_with_grace();
        assert!(r.passed(), "{:?}", r.outcome);
    }

    #[test]
    fn scenario_4() {
        let r = horizon_fallback_when_flux_full();
        assert!(r.passed(), "{:?}", r.outcome);
    }

    #[test]
    fn scenario_5() {
        let r = generation_skew_on_osteoplasty();
        assert!(r.passed(), "{:?}", r.outcome);
    }

    #[test]
    fn scenario_6() {
        let r = zns_genesis_drift();
        assert!(r.passed(), "{:?}", r.outcome);
    }

    #[test]
    fn run_all_reports_six_scenarios() {
        assert_eq!(run_all().len(), 6);
    }
}
