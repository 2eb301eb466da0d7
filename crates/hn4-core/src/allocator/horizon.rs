//! Horizon fallback (Event Horizon, "D1.5") —
//!
//! A linear overflow ring used once the Flux region's collision-shell
//! search is exhausted.

use std::sync::atomic::Ordering;

use hn4_hal::Profile;

use crate::allocator::AllocIntent;
use crate::cortex::VolumeContext;
use crate::error::Hn4Error;
use crate::geometry::VolumeGeometry;

/// Horizon allocation retries only absorb thread contention on the ring
/// head, not a scan: up to 4 attempts.
const HORIZON_RETRY_LIMIT: u32 = 4;

/// Result of a successful Horizon allocation: the absolute block index and
/// the new `gravity_center` the caller must persist on the anchor so that
/// `G + N*quantum == allocated_index`.
#[derive(Debug, Clone, Copy)]
pub struct HorizonAllocation {
    pub block_index: u64,
    pub new_gravity_center: u64,
}

/// Allocate the next Horizon slot for logical index `n` at fractal scale
/// `m`. System-profile and metadata allocations are refused Horizon
/// fallback unless the volume is already in PANIC.
pub fn horizon_allocate(
    ctx: &VolumeContext,
    geometry: &VolumeGeometry,
    n: u64,
    m: u8,
    profile: Profile,
    intent: AllocIntent,
) -> Result<HorizonAllocation, Hn4Error> {
    let refused = profile == Profile::System || intent == AllocIntent::Metadata;
    if refused && !ctx.is_panicked() {
        return Err(Hn4Error::GravityCollapse);
    }

    let capacity = geometry.horizon_capacity_blocks;
    if capacity == 0 {
        return Err(Hn4Error::Enospc);
    }

    for _ in 0..HORIZON_RETRY_LIMIT {
        let slot = ctx.horizon_write_head.fetch_add(1, Ordering::AcqRel) % capacity;
        let block_index = geometry.horizon_start_block + slot;
        let (ok, changed) = ctx.bitmap_set(block_index)?;
        if ok && changed {
            let quantum = 1u64 << m;
            let new_gravity_center = block_index.saturating_sub(n.saturating_mul(quantum));
            return Ok(HorizonAllocation { block_index, new_gravity_center });
        }
        // Bit already set: the ring has lapped a live block. Horizon is full.
    }
    Err(Hn4Error::Enospc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::FluxGeometry;
    use crate::telemetry::NullSink;
    use hn4_hal::DeviceClass;
    use std::sync::Arc;

    fn geometry(capacity: u64) -> VolumeGeometry {
        VolumeGeometry {
            flux: FluxGeometry { flux_start_lba: 0, flux_blocks: 1024 },
            horizon_start_block: 1024,
            horizon_capacity_blocks: capacity,
            block_size: 4096,
            sector_size: 512,
            device_class: DeviceClass::Ssd,
            profile: Profile::Archive,
        }
    }

    #[test]
    fn allocates_sequential_ring_slots() {
        let geo = geometry(4);
        let ctx = VolumeContext::new(geo.total_blocks(), false, Arc::new(NullSink));
        let first = horizon_allocate(&ctx, &geo, 0, 0, Profile::Archive, AllocIntent::Normal).unwrap();
        let second = horizon_allocate(&ctx, &geo, 0, 0, Profile::Archive, AllocIntent::Normal).unwrap();
        assert_eq!(first.block_index, 1024);
        assert_eq!(second.block_index, 1025);
    }

    #[test]
    fn ring_fullness_yields_event_horizon_within_retry_cap() {
        let geo = geometry(2);
        let ctx = VolumeContext::new(geo.total_blocks(), false, Arc::new(NullSink));
        ctx.bitmap.set(1024).unwrap();
        ctx.bitmap.set(1025).unwrap();
        assert!(matches!(horizon_allocate(&ctx, &geo, 0, 0, Profile::Archive, AllocIntent::Normal), Err(Hn4Error::Enospc)));
    }

    #[test]
    fn system_profile_is_refused_unless_panicked() {
        let geo = geometry(4);
        let ctx = VolumeContext::new(geo.total_blocks(), false, Arc::new(NullSink));
        assert!(matches!(horizon_allocate(&ctx, &geo, 0, 0, Profile::System, AllocIntent::Normal), Err(Hn4Error::GravityCollapse)));
        ctx.raise_panic("test");
        assert!(horizon_allocate(&ctx, &geo, 0, 0, Profile::System, AllocIntent::Normal).is_ok());
    }

    #[test]
    fn metadata_intent_is_refused_unless_panicked_even_off_system_profile() {
        let geo = geometry(4);
        let ctx = VolumeContext::new(geo.total_blocks(), false, Arc::new(NullSink));
        assert!(matches!(
            horizon_allocate(&ctx, &geo, 0, 0, Profile::Archive, AllocIntent::Metadata),
            Err(Hn4Error::GravityCollapse)
        ));
        ctx.raise_panic("test");
        assert!(horizon_allocate(&ctx, &geo, 0, 0, Profile::Archive, AllocIntent::Metadata).is_ok());
    }
}
