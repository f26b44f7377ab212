//! Mutation journal benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use linkdb_bench::utils::{random_keys, shuffled_ids};
use linkdb_core::{IndexId, JournalOp, KeyPolicy, LogicalId, MutationJournal};

/// Benchmark recording PUTs under distinct keys.
fn bench_record_puts(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_record_put");
    let logical = LogicalId::Index(IndexId::new(1));

    for count in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let ids = shuffled_ids(count);
            let keys = random_keys(count, 16);
            b.iter(|| {
                let mut journal = MutationJournal::new();
                for (key, rid) in keys.iter().zip(&ids) {
                    black_box(journal.record(logical, key, *rid, JournalOp::Put));
                }
                journal
            });
        });
    }

    group.finish();
}

/// Benchmark PUT/REMOVE pairs that cancel out.
fn bench_record_cancel(c: &mut Criterion) {
    let logical = LogicalId::Index(IndexId::new(1));
    let ids = shuffled_ids(1_000);
    let keys = random_keys(1_000, 16);

    c.bench_function("journal_put_remove_cancel", |b| {
        b.iter(|| {
            let mut journal = MutationJournal::new();
            for (key, rid) in keys.iter().zip(&ids) {
                journal.record(logical, key, *rid, JournalOp::Put);
                journal.record(logical, key, *rid, JournalOp::Remove);
            }
            black_box(journal.is_empty())
        });
    });
}

/// Benchmark key relocation under a single-key policy.
fn bench_relocation(c: &mut Criterion) {
    let logical = LogicalId::Index(IndexId::new(1));
    let ids = shuffled_ids(100);
    let keys = random_keys(10, 8);

    c.bench_function("journal_single_key_relocation", |b| {
        b.iter(|| {
            let mut journal = MutationJournal::new();
            journal.set_key_policy(logical, KeyPolicy::SingleKeyPerRecord);
            for key in &keys {
                for rid in &ids {
                    journal.record(logical, key, *rid, JournalOp::Put);
                }
            }
            black_box(journal.len())
        });
    });
}

/// Benchmark merged views over a populated journal.
fn bench_merged_view(c: &mut Criterion) {
    let logical = LogicalId::Index(IndexId::new(1));
    let ids = shuffled_ids(1_000);
    let key = b"hot".to_vec();
    let (durable, pending) = ids.split_at(500);

    let mut journal = MutationJournal::new();
    for rid in pending {
        journal.record(logical, &key, *rid, JournalOp::Put);
    }
    for rid in &durable[..100] {
        journal.record(logical, &key, *rid, JournalOp::Remove);
    }

    c.bench_function("journal_merged_view", |b| {
        b.iter(|| black_box(journal.merged_view(logical, &key, durable).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_record_puts,
    bench_record_cancel,
    bench_relocation,
    bench_merged_view
);
criterion_main!(benches);
