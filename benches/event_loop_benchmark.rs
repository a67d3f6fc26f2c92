/// Event loop / queue performance benchmarks using Criterion.
///
/// Run with: cargo bench --bench event_loop_benchmark
///
/// Benchmarks cover:
/// - Enqueue throughput at varying priority mixes
/// - Dequeue-under-contention from concurrent producers
/// - Aggregator burst collapsing
/// - End-to-end tick latency through a registered handler
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use perception_loop::event_loop::{EventLoopConfig, EventLoopCore};
use perception_loop::model::{Payload, PerceptionEvent, PerceptionKind};
use perception_loop::queue::EventQueue;
use perception_loop::{AggregationRule, EventAggregator, LatestWithTrail};
use std::sync::Arc;

fn make_event(priority: u8) -> PerceptionEvent {
    PerceptionEvent::new(PerceptionKind::Cursor, "benchmark", Payload::new(), priority)
}

fn bench_enqueue_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_enqueue");

    for event_count in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*event_count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(event_count), event_count, |b, &count| {
            b.iter(|| {
                let rt = tokio::runtime::Runtime::new().unwrap();
                rt.block_on(async {
                    let queue = EventQueue::new(count + 1);
                    for i in 0..count {
                        let priority = (i % 10) as u8 + 1;
                        queue.enqueue(make_event(priority)).await.unwrap();
                    }
                    black_box(queue.len().await);
                })
            });
        });
    }
    group.finish();
}

fn bench_concurrent_producers(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_concurrent_producers");

    for producer_count in [2, 4, 8].iter() {
        let events_per_producer = 500;
        let total = producer_count * events_per_producer;

        group.throughput(Throughput::Elements(total as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", producer_count, events_per_producer)),
            producer_count,
            |b, &producers| {
                b.iter(|| {
                    let rt = tokio::runtime::Runtime::new().unwrap();
                    rt.block_on(async {
                        let queue = Arc::new(EventQueue::new(producers * events_per_producer + 1));

                        let mut tasks = Vec::new();
                        for p in 0..producers {
                            let queue = queue.clone();
                            tasks.push(tokio::spawn(async move {
                                for i in 0..events_per_producer {
                                    let priority = ((p + i) % 10) as u8 + 1;
                                    let _ = queue.enqueue(make_event(priority)).await;
                                }
                            }));
                        }
                        for task in tasks {
                            task.await.unwrap();
                        }

                        while queue.dequeue().await.is_some() {}
                        black_box(&queue);
                    })
                });
            },
        );
    }
    group.finish();
}

fn bench_aggregator_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregator_burst_collapse");
    let burst_size = 1_000;
    group.throughput(Throughput::Elements(burst_size as u64));

    group.bench_function("mouse_position_window_32ms", |b| {
        b.iter(|| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let (aggregator, _rx) = EventAggregator::new();
                aggregator.configure(
                    "mouse_position",
                    AggregationRule {
                        window_ms: 32,
                        max_batch: burst_size,
                        reducer: Arc::new(LatestWithTrail),
                    },
                );
                let aggregator = Arc::new(aggregator);
                let mut last = None;
                for _ in 0..burst_size {
                    last = aggregator.add(make_event(5)).await;
                }
                black_box(last);
            })
        });
    });

    group.finish();
}

fn bench_tick_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_loop_tick_latency");

    group.bench_function("single_tick_with_handler", |b| {
        b.iter(|| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let queue = Arc::new(EventQueue::new(10));
                queue.enqueue(make_event(5)).await.unwrap();
                let core = EventLoopCore::new(
                    queue,
                    EventLoopConfig {
                        latency_target_ms: 0,
                        latency_window: 100,
                    },
                );
                core.register_handler("mouse_position", Arc::new(|_event: &PerceptionEvent| {}));
                let processed = core.tick().await;
                black_box(processed);
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_enqueue_throughput,
    bench_concurrent_producers,
    bench_aggregator_burst,
    bench_tick_latency,
);
criterion_main!(benches);
