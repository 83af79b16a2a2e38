//! Benchmarks for the expert swapper.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

use expert_swap::cache::swapper::Swapper;
use expert_swap::config::{CompressionConfig, SwapConfig, WorkloadConfig};
use expert_swap::transfer::codec::RecordCodec;
use expert_swap::transfer::disk_store::FileStore;
use expert_swap::transfer::executor::InlineExecutor;
use expert_swap::workload::{self, synthetic_expert};

fn bench_resident_get(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let config = SwapConfig {
        max_memory_experts: 64,
        ..SwapConfig::with_storage_dir(tmp.path())
    };
    let store = FileStore::open(tmp.path(), CompressionConfig::default()).unwrap();
    let mut swapper =
        Swapper::with_parts(config, Arc::new(store), Arc::new(InlineExecutor)).unwrap();

    let mut rng = StdRng::seed_from_u64(0);
    for i in 0..64 {
        swapper.register_record(synthetic_expert(&mut rng, i, 256), false);
    }
    let ids: Vec<String> = (0..64).map(workload::expert_id).collect();

    c.bench_function("get_resident_64", |b| {
        let mut next = 0usize;
        b.iter(|| {
            black_box(swapper.get(&ids[next % 64], None).unwrap());
            next += 1;
        })
    });
}

fn bench_codec(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0);
    // 3 × 64K FP16 elements (384KB, a small expert).
    let record = synthetic_expert(&mut rng, 0, 64 * 1024);
    let plain = RecordCodec::new(CompressionConfig::default());
    let zstd = RecordCodec::new(CompressionConfig {
        zstd_compression: true,
        zstd_level: 3,
    });

    c.bench_function("encode_plain_384kb", |b| {
        b.iter(|| black_box(plain.encode(black_box(&record)).unwrap()))
    });
    c.bench_function("encode_zstd_384kb", |b| {
        b.iter(|| black_box(zstd.encode(black_box(&record)).unwrap()))
    });

    let encoded = plain.encode(&record).unwrap();
    c.bench_function("decode_plain_384kb", |b| {
        b.iter(|| black_box(plain.decode(encoded.clone()).unwrap()))
    });
}

fn bench_workload(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let config = SwapConfig {
        max_memory_experts: 8,
        ..SwapConfig::with_storage_dir(tmp.path())
    };
    let store = FileStore::open(tmp.path(), CompressionConfig::default()).unwrap();
    let mut swapper =
        Swapper::with_parts(config, Arc::new(store), Arc::new(InlineExecutor)).unwrap();

    let plan = WorkloadConfig {
        experts: 32,
        expert_elements: 4096,
        rounds: 100,
        ..Default::default()
    };
    workload::seed_experts(&mut swapper, &plan).unwrap();

    c.bench_function("workload_32_experts_100_rounds", |b| {
        b.iter(|| black_box(workload::run(&mut swapper, &plan).unwrap()))
    });
    swapper.shutdown().unwrap();
}

criterion_group!(benches, bench_resident_get, bench_codec, bench_workload);
criterion_main!(benches);
