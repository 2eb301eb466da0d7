//! Armored Bitmap benchmarks: the `test`/`set`/`clear` hot path.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hn4_core::bitmap::ArmoredBitmap;
use hn4_core::telemetry::NullSink;

fn bitmap(total_blocks: u64) -> ArmoredBitmap {
    ArmoredBitmap::new(total_blocks, false, Arc::new(NullSink))
}

fn bench_set_clear_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitmap_set_clear");
    for &total in &[4096u64, 65536, 1 << 20] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("roundtrip", total), &total, |b, &total| {
            let bm = bitmap(total);
            let mut idx = 0u64;
            b.iter(|| {
                bm.set(idx).unwrap();
                bm.clear(idx).unwrap();
                idx = (idx + 1) % total;
                black_box(idx);
            });
        });
    }
    group.finish();
}

fn bench_test(c: &mut Criterion) {
    let bm = bitmap(1 << 20);
    for i in (0..(1u64 << 20)).step_by(3) {
        bm.set(i).unwrap();
    }
    c.bench_function("bitmap_test_hot", |b| {
        let mut idx = 0u64;
        b.iter(|| {
            let v = bm.test(idx).unwrap().value;
            idx = (idx + 1) % (1 << 20);
            black_box(v);
        });
    });
}

criterion_group!(benches, bench_set_clear_roundtrip, bench_test);
criterion_main!(benches);
