//! Benchmarks for key derivation and shard sealing
//!
//! Run with: cargo bench --package shardrelay-core --bench crypto

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shardrelay_core::crypto::{ShardCipher, SymmetricKey};
use shardrelay_core::integrity;
use shardrelay_core::kdf::{self, KeyHierarchy, Src};

fn bench_key_hierarchy(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_hierarchy");

    group.bench_function("from_secret", |b| {
        b.iter(|| KeyHierarchy::from_secret(black_box(b"device code 0001")).unwrap())
    });

    let hierarchy = KeyHierarchy::from_secret(b"device code 0001").unwrap();
    for nodes in [3usize, 16, 64] {
        group.bench_with_input(BenchmarkId::new("encrypt_fan", nodes), &nodes, |b, &nodes| {
            b.iter(|| hierarchy.encrypt_fan(black_box(nodes)).unwrap())
        });
    }

    group.finish();
}

fn bench_shard_cipher(c: &mut Criterion) {
    let mut group = c.benchmark_group("shard_cipher");
    let key = SymmetricKey::generate();
    let src = Src::from_bytes([3, 1, 4, 1, 5, 9, 2, 6]);

    for size in [64, 1024, 16 * 1024] {
        let shard = vec![0x5A; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("seal", size), &shard, |b, shard| {
            b.iter(|| ShardCipher::seal(&key, &src, 7, black_box(shard)).unwrap())
        });

        let sealed = ShardCipher::seal(&key, &src, 7, &shard).unwrap();
        group.bench_with_input(BenchmarkId::new("open", size), &sealed, |b, sealed| {
            b.iter(|| ShardCipher::open(&key, &src, 7, black_box(sealed)).unwrap())
        });
    }

    group.finish();
}

fn bench_integrity(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_hmac");
    let key = SymmetricKey::generate();

    for size in [1024, 64 * 1024] {
        let envelope = vec![0xC3; size];
        let tag = integrity::sign(&key, &envelope);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("verify", size), &envelope, |b, envelope| {
            b.iter(|| integrity::verify(&key, black_box(envelope), &tag))
        });
    }

    group.finish();
}

fn bench_derive(c: &mut Criterion) {
    c.bench_function("hkdf_derive_32", |b| {
        b.iter(|| kdf::derive(black_box(b"secret"), b"salt", 32, b"info").unwrap())
    });
}

criterion_group!(benches, bench_key_hierarchy, bench_shard_cipher, bench_integrity, bench_derive);
criterion_main!(benches);
