//! Placement function (`trajectory`) benchmarks across collision shells.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hn4_core::placement::{trajectory, FluxGeometry};
use hn4_hal::{DeviceClass, Profile};

fn geometry() -> FluxGeometry {
    FluxGeometry { flux_start_lba: 0, flux_blocks: 1 << 24 }
}

fn bench_trajectory_by_shell(c: &mut Criterion) {
    let geo = geometry();
    let mut group = c.benchmark_group("trajectory_shell");
    for k in [0u8, 3, 4, 11] {
        group.bench_with_input(BenchmarkId::new("k", k), &k, |b, &k| {
            let mut n = 0u64;
            b.iter(|| {
                let idx = trajectory(&geo, 100, 0x1357, n, 0, k, DeviceClass::Ssd, Profile::System).unwrap();
                n = n.wrapping_add(1);
                black_box(idx);
            });
        });
    }
    group.finish();
}

fn bench_trajectory_hdd_jitter(c: &mut Criterion) {
    let geo = geometry();
    c.bench_function("trajectory_hdd_jitter", |b| {
        let mut n = 0u64;
        b.iter(|| {
            let idx = trajectory(&geo, 100, 0x1357, n, 0, 7, DeviceClass::Hdd, Profile::Ai).unwrap();
            n = n.wrapping_add(1);
            black_box(idx);
        });
    });
}

criterion_group!(benches, bench_trajectory_by_shell, bench_trajectory_hdd_jitter);
criterion_main!(benches);
