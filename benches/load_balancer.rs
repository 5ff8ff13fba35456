//! Benchmarks for sessionlb components.

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use sessionlb::backend::algorithms::sticky_hash;
use sessionlb::backend::{Selection, Target, TargetPool};
use sessionlb::metrics::MetricsCollector;
use sessionlb::session::SessionRegistry;
use std::time::Duration;

fn create_pool(selection: Selection, num_targets: u16) -> TargetPool {
    let targets = (0..num_targets)
        .map(|i| Target::new("127.0.0.1", 9000 + i))
        .collect();
    TargetPool::new(targets, selection)
}

fn client_keys(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("10.0.{}.{}", i / 256, i % 256))
        .collect()
}

fn benchmark_sticky_hash(c: &mut Criterion) {
    c.bench_function("sticky_hash", |b| {
        b.iter(|| {
            black_box(sticky_hash(black_box("192.168.100.200")));
        })
    });
}

fn benchmark_choose(c: &mut Criterion) {
    let mut group = c.benchmark_group("choose");

    let sticky = create_pool(Selection::Sticky, 10);
    group.bench_function("sticky", |b| {
        b.iter(|| {
            black_box(sticky.choose(black_box("192.168.1.100")));
        })
    });

    let random = create_pool(Selection::Random, 10);
    group.bench_function("random", |b| {
        b.iter(|| {
            black_box(random.choose(black_box("192.168.1.100")));
        })
    });

    // Half the pool down, so most keys take the secondary path.
    let mut degraded = create_pool(Selection::Sticky, 10);
    for i in (0..10).step_by(2) {
        degraded.deactivate(&Target::new("127.0.0.1", 9000 + i));
    }
    let keys = client_keys(64);
    group.bench_function("sticky_degraded", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(degraded.choose(key));
            }
        })
    });

    group.finish();
}

fn benchmark_sessions(c: &mut Criterion) {
    let pool = create_pool(Selection::Sticky, 10);
    let keys = client_keys(1000);

    let mut group = c.benchmark_group("sessions");
    group.throughput(Throughput::Elements(keys.len() as u64));

    group.bench_function("open_close", |b| {
        let mut registry = SessionRegistry::new(Duration::from_secs(30));
        b.iter(|| {
            for key in &keys {
                black_box(registry.open(key, &pool));
            }
            for key in &keys {
                black_box(registry.close(key, &pool));
            }
        })
    });

    group.bench_function("sweep", |b| {
        b.iter_batched(
            || {
                let mut registry = SessionRegistry::new(Duration::ZERO);
                for key in &keys {
                    registry.open(key, &pool);
                    registry.close(key, &pool);
                }
                registry
            },
            |mut registry| black_box(registry.sweep()),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn benchmark_metrics(c: &mut Criterion) {
    let collector = MetricsCollector::new();
    let target = Target::new("127.0.0.1", 9000);

    let mut group = c.benchmark_group("metrics");
    group.throughput(Throughput::Elements(1));

    group.bench_function("record_relay", |b| {
        b.iter(|| {
            collector.record_relay(
                black_box(1024),
                black_box(4096),
                black_box(Duration::from_millis(10)),
            );
        })
    });

    group.bench_function("set_target_active", |b| {
        b.iter(|| {
            collector.set_target_active(black_box(&target), black_box(true));
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_sticky_hash,
    benchmark_choose,
    benchmark_sessions,
    benchmark_metrics,
);

criterion_main!(benches);
