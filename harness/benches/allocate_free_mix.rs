use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use insmalloc_harness::utils::random_object_size;

fn bench_mixed_size_allocate_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_size_allocate_free");
    for &batch in &[256usize, 2048] {
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter_batched(
                || (0..batch).map(|_| random_object_size()).collect::<Vec<_>>(),
                |sizes| {
                    for size in sizes {
                        let p = unsafe { insmalloc::malloc(size) };
                        if !p.is_null() {
                            unsafe { insmalloc::free(black_box(p)) };
                        }
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_mixed_size_allocate_free);
criterion_main!(benches);
