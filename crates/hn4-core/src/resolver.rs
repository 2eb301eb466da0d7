//! Residency Resolver: given an anchor and a logical index,
//! find the physical block currently holding that data, verifying identity
//! before returning it.

use hn4_hal::{BlockHal, DeviceClass, IoOp};

use crate::cortex::VolumeContext;
use crate::delta_table::seed_hash;
use crate::error::{Hn4Error, Hn4Info, Outcome};
use crate::geometry::VolumeGeometry;
use crate::placement::trajectory;
use crate::types::anchor::DataClass;
use crate::types::block::{header_matches, BlockHeader, BLOCK_HEADER_SIZE};
use crate::types::Anchor;

/// Consult the Delta Table for an in-flight migration redirect of
/// `block_index`. Returns the redirected
/// physical block index, or `None` if there is no live redirect.
fn delta_redirect(ctx: &VolumeContext, geometry: &VolumeGeometry, anchor: &Anchor, block_index: u64) -> Option<u64> {
    let lba = geometry.block_to_lba(block_index);
    let hash = seed_hash(anchor.seed_id());
    let new_lba = ctx.delta_table.lookup(lba, hash, u64::from(anchor.write_gen));
    if new_lba == 0 {
        return None;
    }
    Some(new_lba / u64::from(geometry.sectors_per_block()))
}

/// Collision shells the resolver searches, inclusive: candidates for
/// shells `k = 0..11`.
const MAX_RESOLVE_SHELL: u8 = 11;

/// Block verification. Returns the parsed header iff the
/// candidate is valid for `(seed_id, n, expected_generation)`; `None` if any
/// check fails short of a hard I/O error.
pub fn verify_block(
    ctx: &VolumeContext,
    hal: &dyn BlockHal,
    geometry: &VolumeGeometry,
    block_index: u64,
    seed_id: u128,
    n: u64,
    expected_generation: u32,
) -> Result<Option<(BlockHeader, Vec<u8>)>, Hn4Error> {
    if block_index >= geometry.total_blocks() {
        return Ok(None);
    }
    if !ctx.bitmap_test(block_index)?.value {
        return Ok(None);
    }

    let sectors = geometry.sectors_per_block();
    let mut buf = vec![0u8; geometry.block_size as usize];
    hal.sync_io(IoOp::Read, geometry.block_to_lba(block_index), &mut buf, sectors)?;

    let header_bytes: [u8; BLOCK_HEADER_SIZE] = match buf[..BLOCK_HEADER_SIZE].try_into() {
        Ok(b) => b,
        Err(_) => return Ok(None),
    };
    let header = match BlockHeader::from_bytes(&header_bytes) {
        Ok(h) => h,
        Err(_) => return Ok(None),
    };

    if !header_matches(&header, seed_id, n, expected_generation) {
        return Ok(None);
    }

    let payload = buf[BLOCK_HEADER_SIZE..].to_vec();
    Ok(Some((header, payload)))
}

/// `resolve(anchor, N) -> phys_block_index`.
pub fn resolve(
    ctx: &VolumeContext,
    hal: &dyn BlockHal,
    geometry: &VolumeGeometry,
    anchor: &Anchor,
    n: u64,
) -> Result<Outcome<u64>, Hn4Error> {
    if anchor.data_class.contains(DataClass::HINT_HORIZON) {
        // Linear addressing: G was recomputed at allocation time so that
        // `G + N*quantum == allocated_index` ().
        let candidate = anchor
            .gravity_center
            .checked_add(n.checked_mul(anchor.quantum()).ok_or(Hn4Error::AlignmentFail)?)
            .ok_or(Hn4Error::AlignmentFail)?;
        if let Some(redirect) = delta_redirect(ctx, geometry, anchor, candidate) {
            if verify_block(ctx, hal, geometry, redirect, anchor.seed_id(), n, anchor.write_gen)?.is_some() {
                return Ok(Outcome::new(redirect, Hn4Info::Success));
            }
        }
        if let Some((_, _)) = verify_block(ctx, hal, geometry, candidate, anchor.seed_id(), n, anchor.write_gen)? {
            return Ok(Outcome::ok(candidate));
        }
        return Err(Hn4Error::NotFound);
    }

    let mut candidates = Vec::with_capacity(usize::from(MAX_RESOLVE_SHELL) + 1);
    for k in 0..=MAX_RESOLVE_SHELL {
        if let Ok(idx) = trajectory(
            &geometry.flux,
            anchor.gravity_center,
            anchor.orbit_vector(),
            n,
            anchor.fractal_scale,
            k,
            geometry.device_class,
            geometry.profile,
        ) {
            candidates.push(idx);
        }
    }

    if geometry.device_class == DeviceClass::Hdd {
        candidates.sort_unstable(); // C-LOOK: ascending-index probe order.
    }

    for candidate in candidates {
        if let Some(redirect) = delta_redirect(ctx, geometry, anchor, candidate) {
            if verify_block(ctx, hal, geometry, redirect, anchor.seed_id(), n, anchor.write_gen)?.is_some() {
                return Ok(Outcome::new(redirect, Hn4Info::Success));
            }
        }
        if let Some((_, _)) = verify_block(ctx, hal, geometry, candidate, anchor.seed_id(), n, anchor.write_gen)? {
            return Ok(Outcome::new(candidate, Hn4Info::Success));
        }
    }

    Err(Hn4Error::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::FluxGeometry;
    use crate::telemetry::NullSink;
    use crate::types::block::{BlockHeader, CompMeta};
    use hn4_hal::{HwFlags, InMemoryHal, Profile};
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
        let hal = InMemoryHal::new(geometry.total_blocks() * u64::from(geometry.block_size), DeviceClass::Ssd, HwFlags::empty(), 0);
        (ctx, hal, geometry)
    }

    fn write_block_at(hal: &InMemoryHal, geometry: &VolumeGeometry, block_index: u64, seed_id: u128, seq_index: u64, generation: u32) {
        let header = BlockHeader {
            well_id: seed_id,
            seq_index,
            generation,
            data_crc: 0,
            comp_meta: CompMeta::default(),
        };
        let mut buf = vec![0u8; geometry.block_size as usize];
        buf[..48].copy_from_slice(&header.to_bytes());
        hal.sync_io(IoOp::Write, geometry.block_to_lba(block_index), &mut buf, geometry.sectors_per_block()).unwrap();
    }

    #[test]
    fn resolve_finds_shell_zero_after_allocation() {
        let (ctx, hal, geometry) = setup();
        let anchor = Anchor::new(77, 100, 17, 0, 0);
        let idx = trajectory(&geometry.flux, anchor.gravity_center, anchor.orbit_vector(), 0, 0, 0, geometry.device_class, geometry.profile).unwrap();
        ctx.bitmap.set(idx).unwrap();
        write_block_at(&hal, &geometry, idx, anchor.seed_id(), 0, anchor.write_gen);
        let outcome = resolve(&ctx, &hal, &geometry, &anchor, 0).unwrap();
        assert_eq!(outcome.value, idx);
    }

    #[test]
    fn resolve_fails_when_nothing_allocated() {
        let (ctx, hal, geometry) = setup();
        let anchor = Anchor::new(1, 5, 9, 0, 0);
        assert!(matches!(resolve(&ctx, &hal, &geometry, &anchor, 0), Err(Hn4Error::NotFound)));
    }

    #[test]
    fn resolve_rejects_generation_mismatch() {
        let (ctx, hal, geometry) = setup();
        let mut anchor = Anchor::new(3, 10, 5, 0, 0);
        anchor.write_gen = 2;
        let idx = trajectory(&geometry.flux, anchor.gravity_center, anchor.orbit_vector(), 0, 0, 0, geometry.device_class, geometry.profile).unwrap();
        ctx.bitmap.set(idx).unwrap();
        write_block_at(&hal, &geometry, idx, anchor.seed_id(), 0, 1); // stale generation
        assert!(matches!(resolve(&ctx, &hal, &geometry, &anchor, 0), Err(Hn4Error::NotFound)));
    }

    #[test]
    fn horizon_hint_uses_linear_addressing() {
        let (ctx, hal, geometry) = setup();
        let mut anchor = Anchor::new(9, geometry.horizon_start_block + 3, 1, 0, 0);
        anchor.data_class |= DataClass::HINT_HORIZON;
        let block_index = geometry.horizon_start_block + 3;
        ctx.bitmap.set(block_index).unwrap();
        write_block_at(&hal, &geometry, block_index, anchor.seed_id(), 0, anchor.write_gen);
        let outcome = resolve(&ctx, &hal, &geometry, &anchor, 0).unwrap();
        assert_eq!(outcome.value, block_index);
    }
}
