use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::future::join_all;
use leastload::{Balancer, LoadIndex, PoolConfig, TransformError};
use tokio::runtime::Builder;

// Requests per requester in the end-to-end benchmark.
const REQUESTS: usize = 256;
const REQUESTERS: usize = 4;

/// Re-sorts arbitrary workers the way completions do: remove, then reinsert.
fn bench_index_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_index");

    for pool_size in [8, 64, 512] {
        group.throughput(Throughput::Elements(pool_size as u64));
        group.bench_function(format!("extract_insert/{pool_size}"), |b| {
            let mut index = LoadIndex::with_workers(pool_size);
            b.iter(|| {
                for _ in 0..pool_size {
                    let worker = index.extract_min().unwrap();
                    index.insert(black_box(worker)).unwrap();
                }
            });
        });

        group.bench_function(format!("remove_insert/{pool_size}"), |b| {
            let mut index = LoadIndex::with_workers(pool_size);
            let workers: Vec<_> = (0..pool_size).filter_map(|i| index.worker(i)).collect();
            b.iter(|| {
                for &worker in workers.iter().rev() {
                    black_box(index.remove(worker).unwrap());
                    index.insert(worker).unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let rt = Builder::new_multi_thread()
        .worker_threads(8)
        .enable_all()
        .build()
        .unwrap();

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements((REQUESTS * REQUESTERS) as u64));

    for workers in [1, 4, 16] {
        group.bench_function(format!("workers/{workers}"), |b| {
            b.to_async(&rt).iter(|| async move {
                let (mut balancer, pool) = Balancer::new(
                    PoolConfig::new(workers, 4).with_request_buffer(16),
                    |x: u64| Ok::<_, TransformError>(black_box(x.wrapping_mul(31))),
                )
                .unwrap();

                let clients: Vec<_> = (0..REQUESTERS)
                    .map(|_| {
                        let requester = balancer.requester();
                        tokio::spawn(async move {
                            join_all((0..REQUESTS as u64).map(|p| requester.submit(p))).await
                        })
                    })
                    .collect();

                let report = balancer.run().await.unwrap();
                for client in join_all(clients).await {
                    black_box(client.unwrap());
                }
                black_box(report);
                pool.shutdown(core::time::Duration::from_secs(1))
                    .await
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_stats(c: &mut Criterion) {
    let index = LoadIndex::with_workers(64);
    c.bench_function("load_index/stats/64", |b| {
        b.iter(|| black_box(index.stats()));
    });
}

criterion_group!(benches, bench_index_cycle, bench_dispatch, bench_stats);
criterion_main!(benches);
