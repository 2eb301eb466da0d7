//! Scavenger pulse benchmark: cost of one bounded `pulse()` call across a
//! populated Cortex.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hn4_core::codec::NullCodec;
use hn4_core::cortex::VolumeContext;
use hn4_core::placement::FluxGeometry;
use hn4_core::scavenger;
use hn4_core::telemetry::NullSink;
use hn4_core::types::{Anchor, DataClass, Permissions};
use hn4_core::{geometry::VolumeGeometry, write_pipeline};
use hn4_hal::{DeviceClass, HwFlags, InMemoryHal, Profile};

fn geometry() -> VolumeGeometry {
    VolumeGeometry {
        flux: FluxGeometry { flux_start_lba: 0, flux_blocks: 1 << 18 },
        horizon_start_block: 1 << 18,
        horizon_capacity_blocks: 2048,
        block_size: 4096,
        sector_size: 512,
        device_class: DeviceClass::Ssd,
        profile: Profile::System,
    }
}

/// A volume with 256 anchors, a quarter of them tombstoned (but well
/// within their grace period, so the Reaper's scan has real work to do
/// without actually reclaiming anything mid-benchmark).
fn populated() -> (VolumeContext, InMemoryHal, VolumeGeometry) {
    let geo = geometry();
    let ctx = VolumeContext::new(geo.total_blocks(), false, Arc::new(NullSink));
    let hal = InMemoryHal::new(geo.total_blocks() * u64::from(geo.block_size), DeviceClass::Ssd, HwFlags::empty(), 0);
    let codec = NullCodec;
    for i in 0..256u128 {
        let mut anchor = Anchor::new(i, 100 + i as u64 * 37, (i as u64 * 2) + 1, 0, 0);
        ctx.cortex.insert(0, anchor);
        write_pipeline::write(&ctx, &hal, &geo, &codec, &mut anchor, 0, &[0xAA; 64], 64, Permissions::WRITE, false).unwrap();
        if i % 4 == 0 {
            anchor.data_class |= DataClass::TOMBSTONE;
        }
        ctx.cortex.insert(0, anchor);
    }
    (ctx, hal, geo)
}

fn bench_pulse(c: &mut Criterion) {
    let (ctx, hal, geo) = populated();
    c.bench_function("scavenger_pulse", |b| {
        b.iter(|| {
            scavenger::pulse(&ctx, &hal, &geo);
            black_box(ctx.pulse_count.load(std::sync::atomic::Ordering::Relaxed));
        });
    });
}

criterion_group!(benches, bench_pulse);
criterion_main!(benches);
