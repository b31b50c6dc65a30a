use alloc_core::core::AllocatorConfig;
use alloc_core::HeapDescriptor;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

fn bench_allocate_free_steady_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_free_steady_state");
    for &size in &[16usize, 96, 512, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let heap = HeapDescriptor::new(&AllocatorConfig::default());
                    let ctx = heap.acquire_context();
                    (heap, ctx)
                },
                |(heap, ctx)| {
                    for _ in 0..1000 {
                        let p = heap.allocate(&ctx, size, false).expect("allocate");
                        heap.free(&ctx, black_box(p)).expect("free");
                    }
                    heap.shutdown();
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_allocate_then_free_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_then_free_batch");
    for &count in &[64usize, 512, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let heap = HeapDescriptor::new(&AllocatorConfig::default());
                    let ctx = heap.acquire_context();
                    (heap, ctx)
                },
                |(heap, ctx)| {
                    let mut ptrs = Vec::with_capacity(count);
                    for _ in 0..count {
                        ptrs.push(heap.allocate(&ctx, 96, false).expect("allocate"));
                    }
                    for p in ptrs {
                        heap.free(&ctx, black_box(p)).expect("free");
                    }
                    heap.shutdown();
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_allocate_free_steady_state,
    bench_allocate_then_free_batch
);
criterion_main!(benches);
