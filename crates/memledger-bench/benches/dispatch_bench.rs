//! Tracked vs suspended dispatch benchmarks.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use memledger_membrane::{
    FatalPolicy, Journal, LibcBulk, Tag, Tracker, TrackerConfig, TrackingMode, site,
};

fn tracker(mode: TrackingMode) -> Tracker {
    Tracker::with_parts(
        TrackerConfig::default()
            .with_fatal(FatalPolicy::Abort)
            .with_tracking(mode),
        LibcBulk,
        Journal::discard(),
    )
}

fn bench_alloc_release_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[1, 64, 1024, 32768];
    let mut group = c.benchmark_group("alloc_release_cycle");

    for (label, mode) in [("tracked", TrackingMode::On), ("suspended", TrackingMode::Off)] {
        for &len in sizes {
            group.bench_with_input(BenchmarkId::new(label, len), &len, |b, &len| {
                let mut t = tracker(mode);
                let tag = Tag::new(site!()).with_type("u8").with_name("bench");
                b.iter(|| {
                    if let Ok(block) = t.alloc_vec(1, len, &tag) {
                        let _ = criterion::black_box(t.release(block));
                    }
                });
            });
        }
    }
    group.finish();
}

fn bench_rect_grow(c: &mut Criterion) {
    let mut group = c.benchmark_group("rect_grow");

    for (label, mode) in [("tracked", TrackingMode::On), ("suspended", TrackingMode::Off)] {
        group.bench_function(label, |b| {
            let mut t = tracker(mode);
            let tag = Tag::new(site!()).with_type("f64").with_name("field");
            b.iter(|| {
                let Ok(block) = t.alloc_rect(8, &[32, 32], &tag) else {
                    return;
                };
                if let Ok(block) = t.resize_rect(block, &[48, 48], site!()) {
                    let _ = criterion::black_box(t.release(block));
                }
            });
        });
    }
    group.finish();
}

fn bench_leak_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("leak_walk");

    group.bench_function("1000_live", |b| {
        let mut t = tracker(TrackingMode::On);
        let tag = Tag::new(site!()).with_type("Cell");
        let blocks: Vec<_> = (0..1000)
            .filter_map(|i| t.alloc_vec(8, i % 16 + 1, &tag).ok())
            .collect();
        b.iter(|| criterion::black_box(t.report_leaks()));
        for block in blocks {
            let _ = t.release(block);
        }
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_release_cycle,
    bench_rect_grow,
    bench_leak_walk
);
criterion_main!(benches);
