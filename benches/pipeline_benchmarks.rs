use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use demandweld::prelude::*;
use std::hint::black_box;

fn bench_basic_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("basic_pipeline");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("collect", size), size, |b, &size| {
            b.iter(|| {
                runtime.block_on(async {
                    let items = Flow::range(0..size).to_vec().await.unwrap();
                    black_box(items);
                })
            });
        });

        group.bench_with_input(BenchmarkId::new("map", size), size, |b, &size| {
            b.iter(|| {
                runtime.block_on(async {
                    let items = Flow::range(0..size)
                        .map(|x| black_box(x * 2))
                        .to_vec()
                        .await
                        .unwrap();
                    black_box(items);
                })
            });
        });
    }

    group.finish();
}

fn bench_generator_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("generator_handoff");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for size in [1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("emit", size), size, |b, &size| {
            b.iter(|| {
                runtime.block_on(async {
                    let flow = Flow::generate(move |co| async move {
                        for i in 0..size {
                            co.emit(black_box(i)).await?;
                        }
                        Ok(())
                    });
                    black_box(flow.count().await.unwrap());
                })
            });
        });
    }

    group.finish();
}

fn bench_combinators(c: &mut Criterion) {
    let mut group = c.benchmark_group("combinators");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("filter_map_limit", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let items = Flow::range(0..10000)
                    .filter(|x| x % 2 == 0)
                    .map(|x| black_box(x * 3))
                    .limit(1000)
                    .to_vec()
                    .await
                    .unwrap();
                black_box(items);
            })
        });
    });

    group.bench_function("merge_four", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let merged = Flow::merge((0..4).map(|i| Flow::range(i * 2500..(i + 1) * 2500)))
                    .count()
                    .await
                    .unwrap();
                black_box(merged);
            })
        });
    });

    group.finish();
}

fn bench_batch_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_size");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for batch_size in [1, 16, 100, 500].iter() {
        group.bench_with_input(
            BenchmarkId::new("stage_batch_size", batch_size),
            batch_size,
            |b, &batch_size| {
                b.iter(|| {
                    runtime.block_on(async {
                        let sink = CollectSink::new();
                        Flow::range(0..10000)
                            .batch_size(batch_size)
                            .map(|x| black_box(x + 1))
                            .sink(sink)
                            .await
                            .unwrap();
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_basic_pipeline,
    bench_generator_handoff,
    bench_combinators,
    bench_batch_size
);
criterion_main!(benches);
