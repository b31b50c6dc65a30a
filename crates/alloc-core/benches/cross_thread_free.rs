use std::sync::mpsc;
use std::thread;

use alloc_core::core::AllocatorConfig;
use alloc_core::HeapDescriptor;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

fn bench_cross_thread_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("cross_thread_free_handoff");
    for &count in &[256usize, 2048] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || HeapDescriptor::new(&AllocatorConfig::default()),
                |heap| {
                    let (tx, rx) = mpsc::channel::<usize>();
                    let producer_heap = heap.clone();
                    let producer = thread::spawn(move || {
                        let ctx = producer_heap.acquire_context();
                        for _ in 0..count {
                            let p = producer_heap.allocate(&ctx, 96, false).expect("allocate");
                            tx.send(p).expect("send");
                        }
                        producer_heap.dispose_context(ctx);
                    });
                    let consumer_heap = heap.clone();
                    let consumer = thread::spawn(move || {
                        let ctx = consumer_heap.acquire_context();
                        for p in rx.iter().take(count) {
                            consumer_heap.free(&ctx, black_box(p)).expect("foreign free");
                        }
                        consumer_heap.dispose_context(ctx);
                    });
                    producer.join().expect("producer");
                    consumer.join().expect("consumer");
                    heap.perform_global_cleanup();
                    heap.shutdown();
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_cross_thread_handoff);
criterion_main!(benches);
