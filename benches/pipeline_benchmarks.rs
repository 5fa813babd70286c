use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use chunkweld::channel::{Channel, ChannelConfig, PullOutcome};
use chunkweld::core::Sequencer;
use chunkweld::pipeline::Pipeline;
use chunkweld::sinks::CountSink;
use chunkweld::sources::MemorySource;
use chunkweld::transforms::{gzip_compress, gzip_decompress, uppercase, MapTransform};

fn payloads(count: usize, size: usize) -> Vec<Bytes> {
    (0..count)
        .map(|i| Bytes::from(vec![b'a' + (i % 26) as u8; size]))
        .collect()
}

fn bench_basic_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("basic_pipeline");

    for count in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*count as u64));

        group.bench_with_input(BenchmarkId::new("identity", count), count, |b, &count| {
            b.iter(|| {
                tokio::runtime::Runtime::new().unwrap().block_on(async {
                    let source = MemorySource::new(payloads(count, 64));
                    let sink = CountSink::new();

                    Pipeline::builder()
                        .source(source)
                        .transform(MapTransform::new(|b: Bytes| black_box(b)))
                        .sink(sink)
                        .build()
                        .unwrap()
                        .run()
                        .await
                        .unwrap();
                })
            });
        });

        group.bench_with_input(BenchmarkId::new("uppercase", count), count, |b, &count| {
            b.iter(|| {
                tokio::runtime::Runtime::new().unwrap().block_on(async {
                    let source = MemorySource::new(payloads(count, 64));
                    let sink = CountSink::new();

                    Pipeline::builder()
                        .source(source)
                        .transform(uppercase())
                        .sink(sink)
                        .build()
                        .unwrap()
                        .run()
                        .await
                        .unwrap();
                })
            });
        });
    }

    group.finish();
}

fn bench_drivers(c: &mut Criterion) {
    let mut group = c.benchmark_group("drivers");
    group.throughput(Throughput::Elements(10000));

    group.bench_function("cooperative", |b| {
        b.iter(|| {
            tokio::runtime::Runtime::new().unwrap().block_on(async {
                Pipeline::builder()
                    .source(MemorySource::new(payloads(10000, 64)))
                    .transform(uppercase())
                    .sink(CountSink::new())
                    .build()
                    .unwrap()
                    .run()
                    .await
                    .unwrap();
            })
        });
    });

    group.bench_function("task_per_stage", |b| {
        b.iter(|| {
            tokio::runtime::Runtime::new().unwrap().block_on(async {
                Pipeline::builder()
                    .source(MemorySource::new(payloads(10000, 64)))
                    .transform(uppercase())
                    .sink(CountSink::new())
                    .build()
                    .unwrap()
                    .run_concurrent()
                    .await
                    .unwrap();
            })
        });
    });

    group.finish();
}

fn bench_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel");

    for capacity in [1, 16, 256].iter() {
        group.bench_with_input(
            BenchmarkId::new("push_pull", capacity),
            capacity,
            |b, &capacity| {
                b.iter(|| {
                    let channel = Channel::new(ChannelConfig::new(capacity)).unwrap();
                    let mut seq = Sequencer::new();
                    let mut pulled = 0;
                    while pulled < 10000 {
                        while channel.try_push(seq.next("x")).unwrap().is_accepted() {}
                        while let PullOutcome::Chunk(chunk) = channel.try_pull().unwrap() {
                            black_box(chunk);
                            pulled += 1;
                        }
                    }
                })
            },
        );
    }

    group.finish();
}

fn bench_gzip(c: &mut Criterion) {
    let mut group = c.benchmark_group("gzip");

    for chunk_size in [1024, 16 * 1024, 64 * 1024].iter() {
        group.throughput(Throughput::Bytes(1024 * 1024));
        group.bench_with_input(
            BenchmarkId::new("round_trip", chunk_size),
            chunk_size,
            |b, &chunk_size| {
                b.iter(|| {
                    tokio::runtime::Runtime::new().unwrap().block_on(async {
                        let data: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
                        let chunks: Vec<Vec<u8>> =
                            data.chunks(chunk_size).map(|c| c.to_vec()).collect();

                        Pipeline::builder()
                            .source(MemorySource::new(chunks))
                            .transform(gzip_compress())
                            .transform(gzip_decompress())
                            .sink(CountSink::new())
                            .build()
                            .unwrap()
                            .run()
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
    bench_drivers,
    bench_channel,
    bench_gzip
);
criterion_main!(benches);
