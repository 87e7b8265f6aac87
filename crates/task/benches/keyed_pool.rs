//! Keyed worker pool benchmark
//!
//! Measures the dispatch path: add → claim (key gate) → execute → settle.
//! Key cardinality controls how much the per-key gate serializes work.

use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use amp_task::{work_fn, FixedScheduler, KeyedWorkerPool, PoolConfig, WorkContext};

const ITEMS_PER_ITER: u64 = 256;

/// Throughput of no-op items over a varying number of distinct keys
fn bench_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("keyed_pool/dispatch");
    group.throughput(Throughput::Elements(ITEMS_PER_ITER));

    for keys in [1u64, 8, 256] {
        group.bench_with_input(BenchmarkId::new("keys", keys), &keys, |b, &keys| {
            b.to_async(&rt).iter_custom(|iters| async move {
                let pool = KeyedWorkerPool::start_root(
                    PoolConfig::new("bench").with_worker_count(8).with_max_attempts(1),
                    Arc::new(FixedScheduler::new(Duration::from_millis(1))),
                )
                .unwrap();

                let start = Instant::now();
                for _ in 0..iters {
                    let mut handles = Vec::with_capacity(ITEMS_PER_ITER as usize);
                    for i in 0..ITEMS_PER_ITER {
                        handles.push(
                            pool.add(work_fn(i % keys, |_ctx: WorkContext| async { Ok(()) }))
                                .unwrap(),
                        );
                    }
                    for handle in handles {
                        handle.await;
                    }
                }
                let elapsed = start.elapsed();

                pool.close();
                elapsed
            });
        });
    }

    group.finish();
}

/// Contention on a single hot key while other keys keep flowing
fn bench_hot_key(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("keyed_pool/hot_key");
    group.throughput(Throughput::Elements(ITEMS_PER_ITER));

    for workers in [2usize, 8] {
        group.bench_with_input(
            BenchmarkId::new("workers", workers),
            &workers,
            |b, &workers| {
                b.to_async(&rt).iter_custom(|iters| async move {
                    let pool = KeyedWorkerPool::start_root(
                        PoolConfig::new("bench")
                            .with_worker_count(workers)
                            .with_max_attempts(1),
                        Arc::new(FixedScheduler::new(Duration::from_millis(1))),
                    )
                    .unwrap();

                    let start = Instant::now();
                    for _ in 0..iters {
                        let mut handles = Vec::with_capacity(ITEMS_PER_ITER as usize);
                        for i in 0..ITEMS_PER_ITER {
                            // Half the items share key 0
                            let key = if i % 2 == 0 { 0 } else { i };
                            handles.push(
                                pool.add(work_fn(key, |_ctx: WorkContext| async {
                                    tokio::task::yield_now().await;
                                    Ok(())
                                }))
                                .unwrap(),
                            );
                        }
                        for handle in handles {
                            handle.await;
                        }
                    }
                    let elapsed = start.elapsed();

                    pool.close();
                    elapsed
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_hot_key);
criterion_main!(benches);
