//! Micro-benchmarks for the storage kernel's core operations.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! ```bash
//! cargo bench --bench micro
//! cargo bench --bench micro -- put
//! ```

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use coreengine::config::EngineConfig;
use coreengine::engine::{Engine, ScanOptions};
use tempfile::TempDir;

const VALUE_128B: &[u8; 128] = &[0xAB; 128];
const VALUE_1K: &[u8; 1024] = &[0xCD; 1024];

fn make_key(i: u64) -> Vec<u8> {
    format!("key-{i:012}").into_bytes()
}

fn open_small_buffer(dir: &std::path::Path) -> Engine {
    let mut config = EngineConfig::embedded(dir);
    config.write_buffer_size = 256 * 1024;
    Engine::open(config).unwrap()
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    for size in [128usize, 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let engine = open_small_buffer(dir.path());
            let value = vec![0xAB; size];
            let mut i = 0u64;
            b.iter(|| {
                engine.put(&make_key(i), black_box(&value)).unwrap();
                i += 1;
            });
        });
    }
    group.finish();
}

fn bench_get_hit(c: &mut Criterion) {
    c.bench_function("get_hit", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_small_buffer(dir.path());
        for i in 0..10_000u64 {
            engine.put(&make_key(i), VALUE_128B).unwrap();
        }
        let mut i = 0u64;
        b.iter(|| {
            let key = make_key(i % 10_000);
            black_box(engine.get(&key).unwrap());
            i += 1;
        });
    });
}

fn bench_get_miss(c: &mut Criterion) {
    c.bench_function("get_miss", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_small_buffer(dir.path());
        for i in 0..10_000u64 {
            engine.put(&make_key(i), VALUE_128B).unwrap();
        }
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("absent-{i:012}").into_bytes();
            black_box(engine.get(&key).unwrap());
            i += 1;
        });
    });
}

fn bench_delete(c: &mut Criterion) {
    c.bench_function("delete", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_small_buffer(dir.path());
        b.iter_batched(
            || {
                let i: u64 = rand::random();
                engine.put(&make_key(i), VALUE_1K).unwrap();
                i
            },
            |i| engine.delete(&make_key(i)).unwrap(),
            BatchSize::SmallInput,
        );
    });
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    for range in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(range), &range, |b, &range| {
            let dir = TempDir::new().unwrap();
            let engine = open_small_buffer(dir.path());
            for i in 0..10_000u64 {
                engine.put(&make_key(i), VALUE_128B).unwrap();
            }
            b.iter(|| {
                let start = make_key(0);
                let end = make_key(range as u64);
                black_box(
                    engine
                        .scan(Some(&start), Some(&end), ScanOptions::default())
                        .unwrap(),
                );
            });
        });
    }
    group.finish();
}

fn bench_batch_write(c: &mut Criterion) {
    c.bench_function("batch_write_100", |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_small_buffer(dir.path());
        let mut i = 0u64;
        b.iter(|| {
            let ops: Vec<(Vec<u8>, Option<Vec<u8>>)> = (0..100)
                .map(|j| (make_key(i * 100 + j), Some(VALUE_128B.to_vec())))
                .collect();
            engine.batch_write(&ops).unwrap();
            i += 1;
        });
    });
}

fn bench_vector_search(c: &mut Criterion) {
    c.bench_function("vector_search_k10_dim128", |b| {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::embedded(dir.path())
            .with_vector_index(128, coreengine::config::VectorMetric::Euclidean);
        let engine = Engine::open(config).unwrap();
        for i in 0..5_000u32 {
            let v: Vec<f32> = (0..128).map(|d| ((i + d) % 97) as f32).collect();
            engine.put_vector(format!("v{i}").into_bytes(), v).unwrap();
        }
        let query: Vec<f32> = (0..128).map(|d| (d % 97) as f32).collect();
        b.iter(|| black_box(engine.search_similar(&query, 10).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_put,
    bench_get_hit,
    bench_get_miss,
    bench_delete,
    bench_scan,
    bench_batch_write,
    bench_vector_search
);
criterion_main!(benches);
