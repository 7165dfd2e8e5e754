//! Performance benchmarks for TreeSync
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;
use treesync::cancel::CancelToken;
use treesync::config::{HashAlgorithm, SyncMode, SyncOptions};
use treesync::engine::{CopierOptions, FileCopier};
use treesync::store::{RedbStore, StateStore};

/// Create a test file of the specified size
fn create_test_file(dir: &std::path::Path, name: &str, size: usize) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = File::create(&path).unwrap();

    let chunk_size = 64 * 1024;
    let chunk: Vec<u8> = (0..chunk_size).map(|i| (i % 256) as u8).collect();
    let mut remaining = size;

    while remaining > 0 {
        let to_write = remaining.min(chunk_size);
        file.write_all(&chunk[..to_write]).unwrap();
        remaining -= to_write;
    }

    path
}

fn bench_sync_small_files(c: &mut Criterion) {
    let src_dir = TempDir::new().unwrap();

    for i in 0..100 {
        create_test_file(src_dir.path(), &format!("file_{}.txt", i), 1024);
    }

    c.bench_function("sync_100_small_files", |b| {
        b.iter(|| {
            let dst_dir = TempDir::new().unwrap();
            let db_dir = TempDir::new().unwrap();
            let opts = SyncOptions {
                source: src_dir.path().to_path_buf(),
                destination: dst_dir.path().join("out"),
                db_path: db_dir.path().join("state.db"),
                mode: SyncMode::Initial,
                max_concurrent: 4,
                ..SyncOptions::default()
            };
            let store = Arc::new(RedbStore::open(&opts.db_path, opts.mode).unwrap());
            black_box(treesync::engine::sync_once(opts, store as Arc<dyn StateStore>).unwrap());
        });
    });
}

fn bench_stream_copy(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_copy");

    for size in [1024 * 1024, 10 * 1024 * 1024].iter() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        let src_file = create_test_file(src_dir.path(), "large.bin", *size);

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(
            BenchmarkId::new(
                "buffered",
                humansize::format_size(*size as u64, humansize::BINARY),
            ),
            size,
            |b, _| {
                let dst_file = dst_dir.path().join("large.bin");
                let copier = FileCopier::new(CopierOptions {
                    buffer_size: 8 * 1024 * 1024,
                    fsync: false,
                    hash_algorithm: None,
                });
                let cancel = CancelToken::new();

                b.iter(|| {
                    black_box(copier.copy_file(&src_file, &dst_file, &cancel).unwrap());
                    let _ = std::fs::remove_file(&dst_file);
                });
            },
        );
    }

    group.finish();
}

fn bench_hash_algorithms(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_algorithms");

    let data_size = 10 * 1024 * 1024; // 10 MB
    let data: Vec<u8> = (0..data_size).map(|i| (i % 256) as u8).collect();

    group.throughput(Throughput::Bytes(data_size as u64));

    for algorithm in [
        HashAlgorithm::Md5,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha512,
    ] {
        group.bench_with_input(
            BenchmarkId::new("hash", algorithm.name()),
            &data,
            |b, data| {
                b.iter(|| black_box(treesync::hash::hash_bytes(data, algorithm)));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_sync_small_files,
    bench_stream_copy,
    bench_hash_algorithms
);

criterion_main!(benches);
