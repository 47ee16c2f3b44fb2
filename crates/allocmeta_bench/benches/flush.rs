//! Context flush benchmarks.

use allocmeta_bench::{bench_config, fill_all_segments, open_in_memory};
use allocmeta_core::{ContextManager, ContextOwner};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

/// Benchmark synchronous flushes of every context file to memory.
fn bench_flush_sync_memory(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush_sync_memory");

    for segments in [256u32, 4096, 65536].iter() {
        let manager = open_in_memory(bench_config(*segments));
        fill_all_segments(&manager);
        let bytes: usize = ContextOwner::ALL
            .iter()
            .map(|owner| manager.section_layout().file_size(*owner))
            .sum();

        group.throughput(Throughput::Bytes(bytes as u64));
        group.bench_with_input(BenchmarkId::from_parameter(segments), segments, |b, _| {
            b.iter(|| manager.flush_contexts_sync().unwrap());
        });
    }

    group.finish();
}

/// Benchmark synchronous flushes to a context directory.
fn bench_flush_sync_file(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush_sync_file");

    // Use smaller sample size for fsync-bound operations
    group.sample_size(20);

    for segments in [256u32, 4096].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(segments), segments, |b, &segments| {
            let temp_dir = TempDir::new().unwrap();
            let manager = ContextManager::open_dir(temp_dir.path(), bench_config(segments)).unwrap();
            fill_all_segments(&manager);

            b.iter(|| manager.flush_contexts_sync().unwrap());
        });
    }

    group.finish();
}

/// Benchmark snapshotting one section without writing it.
fn bench_context_section(c: &mut Criterion) {
    let manager = open_in_memory(bench_config(4096));
    fill_all_segments(&manager);

    c.bench_function("context_section_states", |b| {
        b.iter(|| black_box(manager.context_section(ContextOwner::AllocatorCtx, 3).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_flush_sync_memory,
    bench_flush_sync_file,
    bench_context_section
);
criterion_main!(benches);
