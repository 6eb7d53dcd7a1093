//! Parallel I/O benchmark for Stratafs
//!
//! Tests: How does a shared MemFs scale with concurrent writers?
//!
//! Threading model:
//! - One MemFs shared through Arc across worker threads
//! - Structural changes take the store lock, content I/O takes per-file locks
//! - Writers in separate directories only contend on the store lock

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use stratafs::fs::util;
use stratafs::{CopyOnWriteFs, Fs, MemFs, MountableFs};

/// Number of worker threads to benchmark
const THREAD_COUNTS: &[usize] = &[1, 2, 4, 8];

/// Files written by each worker per iteration
const FILES_PER_WORKER: usize = 64;

const PAYLOAD: &[u8] = b"the quick brown fox jumps over the lazy dog\n";

/// Each worker writes then reads back its own directory of files
fn run_workers(fs: Arc<dyn Fs>, workers: usize) {
    let handles: Vec<_> = (0..workers)
        .map(|w| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                let dir = PathBuf::from(format!("/w{w}"));
                let _ = fs.mkdir_all(&dir, 0o755);
                for i in 0..FILES_PER_WORKER {
                    let path = dir.join(format!("{i}.txt"));
                    let _ = util::write_file(fs.as_ref(), &path, PAYLOAD, 0o644);
                    let _ = black_box(util::read_file(fs.as_ref(), &path));
                }
            })
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }
}

fn bench_memfs(c: &mut Criterion) {
    let mut group = c.benchmark_group("memfs_parallel_io");

    for &workers in THREAD_COUNTS {
        group.throughput(Throughput::Elements((workers * FILES_PER_WORKER) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &n| {
            b.iter(|| run_workers(Arc::new(MemFs::new()), n));
        });
    }

    group.finish();
}

fn bench_layered(c: &mut Criterion) {
    let mut group = c.benchmark_group("mounted_overlay_io");

    for &workers in THREAD_COUNTS {
        group.throughput(Throughput::Elements((workers * FILES_PER_WORKER) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &n| {
            b.iter(|| {
                let base = Arc::new(MemFs::new());
                let overlay = CopyOnWriteFs::new(base, Arc::new(MemFs::new()));
                let mut ns = MountableFs::new(Arc::new(MemFs::new()));
                let _ = ns.mount("/w0", Arc::new(overlay));
                run_workers(Arc::new(ns), n);
            });
        });
    }

    group.finish();
}

fn bench_lookup_depth(c: &mut Criterion) {
    let fs = MemFs::new();
    let deep: PathBuf = (0..32).map(|i| format!("d{i}")).fold(PathBuf::from("/"), |p, d| p.join(d));
    let _ = fs.mkdir_all(&deep, 0o755);
    let _ = util::write_file(&fs, &deep.join("leaf"), PAYLOAD, 0o644);
    let leaf = deep.join("leaf");

    c.bench_function("memfs_stat_depth_32", |b| {
        b.iter(|| black_box(fs.stat(black_box(Path::new(&leaf)))))
    });
}

criterion_group!(benches, bench_memfs, bench_layered, bench_lookup_depth);
criterion_main!(benches);
