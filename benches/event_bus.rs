//! Event bus fan-out benchmark.
//!
//! Measures synchronous delivery latency as the number of subscribers grows,
//! split between exact-type and wildcard buckets.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ldh_init::bus::{EventBus, EventFilter, EventType, ServiceEvent};
use ldh_init::supervisor::ServiceStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn bench_emit_sync(c: &mut Criterion) {
    let subscriber_counts: &[usize] = &[1, 8, 64, 256];

    let mut group = c.benchmark_group("emit_sync");
    for &count in subscriber_counts {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        for i in 0..count {
            let hits = hits.clone();
            let filter = if i % 2 == 0 {
                EventFilter::All
            } else {
                EventFilter::Only(EventType::Running)
            };
            bus.subscribe(filter, move |_| {
                hits.fetch_add(1, Ordering::Relaxed);
            });
        }
        let event = ServiceEvent::new(EventType::Running, "bench", ServiceStatus::default());

        group.bench_with_input(BenchmarkId::from_parameter(count), &event, |b, e| {
            b.iter(|| bus.emit_sync(black_box(e)));
        });
    }
    group.finish();
}

fn bench_subscribe_unsubscribe(c: &mut Criterion) {
    let bus = EventBus::new();
    for _ in 0..128 {
        bus.subscribe(EventFilter::All, |_| {});
    }

    c.bench_function("subscribe_unsubscribe", |b| {
        b.iter(|| {
            let id = bus.subscribe(EventType::Failed, |_| {});
            black_box(bus.unsubscribe(&id))
        });
    });
}

criterion_group!(benches, bench_emit_sync, bench_subscribe_unsubscribe);
criterion_main!(benches);
