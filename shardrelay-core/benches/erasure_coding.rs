//! Benchmarks for shard packing and reconstruction
//!
//! Run with: cargo bench --package shardrelay-core --bench erasure_coding

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shardrelay_core::erasure::{pack, unpack};

fn generate_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

/// Pack payloads of typical transaction sizes across a small node set
fn bench_pack(c: &mut Criterion) {
    let mut group = c.benchmark_group("shard_pack");

    for size in [256, 4 * 1024, 64 * 1024] {
        let data = generate_data(size);
        group.throughput(Throughput::Bytes(size as u64));
        for nodes in [3usize, 5] {
            group.bench_with_input(
                BenchmarkId::new(format!("{}_nodes", nodes), size),
                &data,
                |b, data| b.iter(|| pack(black_box(data), nodes).unwrap()),
            );
        }
    }

    group.finish();
}

/// Unpack with all shards present versus the worst-case quorum
fn bench_unpack(c: &mut Criterion) {
    let mut group = c.benchmark_group("shard_unpack");

    for size in [4 * 1024, 64 * 1024] {
        let (shards, geometry) = pack(&generate_data(size), 3).unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        let full: Vec<Option<Vec<u8>>> = shards.iter().cloned().map(Some).collect();
        group.bench_with_input(BenchmarkId::new("all_present", size), &full, |b, full| {
            b.iter(|| unpack(black_box(full.clone()), &geometry).unwrap())
        });

        let mut quorum = full.clone();
        for slot in quorum.iter_mut().take(geometry.parity) {
            *slot = None;
        }
        group.bench_with_input(BenchmarkId::new("quorum_only", size), &quorum, |b, quorum| {
            b.iter(|| unpack(black_box(quorum.clone()), &geometry).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pack, bench_unpack);
criterion_main!(benches);
