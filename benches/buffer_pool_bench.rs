//! Buffer pool microbenchmark
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use netlayer::common::buffer::BufferPool;

fn bench_acquire_release_pooled_size(c: &mut Criterion) {
    let pool = BufferPool::new();

    let mut group = c.benchmark_group("buffer_pool");
    group.throughput(Throughput::Elements(1));

    group.bench_function("acquire_release_4k_hit", |b| {
        b.iter(|| {
            let buf = pool.acquire(black_box(4096));
            pool.release(buf);
        })
    });

    group.bench_function("acquire_release_oversize_unpooled", |b| {
        b.iter(|| {
            let buf = pool.acquire(black_box(200_000));
            pool.release(buf);
        })
    });

    group.finish();
}

fn bench_concurrent_bucket_churn(c: &mut Criterion) {
    let pool = BufferPool::new();

    c.bench_function("buffer_pool_churn_150_same_size", |b| {
        b.iter(|| {
            let bufs: Vec<_> = (0..150).map(|_| pool.acquire(black_box(1024))).collect();
            for buf in bufs {
                pool.release(buf);
            }
        })
    });
}

criterion_group!(benches, bench_acquire_release_pooled_size, bench_concurrent_bucket_churn);
criterion_main!(benches);
