//! Atomic Write Pipeline (Shadow Hop) end-to-end benchmark.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hn4_core::codec::NullCodec;
use hn4_core::cortex::VolumeContext;
use hn4_core::placement::FluxGeometry;
use hn4_core::telemetry::NullSink;
use hn4_core::types::{Anchor, Permissions};
use hn4_core::{geometry::VolumeGeometry, write_pipeline};
use hn4_hal::{DeviceClass, HwFlags, InMemoryHal, Profile};

fn geometry() -> VolumeGeometry {
    VolumeGeometry {
        flux: FluxGeometry { flux_start_lba: 0, flux_blocks: 1 << 20 },
        horizon_start_block: 1 << 20,
        horizon_capacity_blocks: 4096,
        block_size: 4096,
        sector_size: 512,
        device_class: DeviceClass::Ssd,
        profile: Profile::System,
    }
}

fn bench_sequential_write(c: &mut Criterion) {
    let geo = geometry();
    let mut group = c.benchmark_group("write_pipeline_sequential");
    for &payload_len in &[16usize, 1024, 4048] {
        group.throughput(Throughput::Bytes(payload_len as u64));
        group.bench_with_input(BenchmarkId::new("len", payload_len), &payload_len, |b, &len| {
            let ctx = VolumeContext::new(geo.total_blocks(), false, Arc::new(NullSink));
            let hal = InMemoryHal::new(geo.total_blocks() * u64::from(geo.block_size), DeviceClass::Ssd, HwFlags::empty(), 0);
            let codec = NullCodec;
            let mut anchor = Anchor::new(0xBEEF, 100, 17, 0, 0);
            ctx.cortex.insert(0, anchor);
            let payload = vec![0x5Au8; len];
            let mut n = 0u64;
            b.iter(|| {
                write_pipeline::write(&ctx, &hal, &geo, &codec, &mut anchor, n, &payload, len, Permissions::WRITE, false).unwrap();
                n += 1;
                black_box(anchor.write_gen);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sequential_write);
criterion_main!(benches);
