use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use leasehold_core::clock::SystemClock;
use leasehold_core::config::IdempotencyConfig;
use leasehold_core::conflict::ConflictEngine;
use leasehold_core::idempotency::IdempotencyCache;
use leasehold_core::infrastructure::LeaseStore;
use leasehold_core::infrastructure_in_memory::InMemoryLeaseStore;
use leasehold_core::types::*;

use std::sync::Arc;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn make_lease(holder: &str, mode: LockMode, id: &str) -> ResourceLock {
    ResourceLock::new(
        format!("lease_{holder}_{id}"),
        ResourceRef::new("batch", id),
        mode,
        holder.to_string(),
        5000,
        1000,
    )
}

// ─── Benchmarks ─────────────────────────────────────────────────────────────

fn bench_check_pair(c: &mut Criterion) {
    c.bench_function("conflict_check_pair", |b| {
        b.iter(|| ConflictEngine::check_pair(black_box(LockMode::Shared), black_box(LockMode::Exclusive)))
    });
}

fn bench_check_against_leases(c: &mut Criterion) {
    let mut group = c.benchmark_group("conflict_check_leases");

    for count in [10, 100, 1000] {
        let existing: Vec<ResourceLock> = (0..count)
            .map(|i| make_lease(&format!("reader_{i}"), LockMode::Shared, "b-0"))
            .collect();
        let resource = ResourceRef::new("batch", "b-0");

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                ConflictEngine::check_against_leases(
                    black_box("writer"),
                    LockMode::Exclusive,
                    black_box(&resource),
                    black_box(&existing),
                    2000,
                )
            })
        });
    }
    group.finish();
}

fn bench_acquire_release(c: &mut Criterion) {
    let store = InMemoryLeaseStore::new();
    let request = LeaseRequest::new(ResourceRef::new("batch", "b-1"), LockMode::Exclusive, "w1", 30_000);

    c.bench_function("in_memory_acquire_release", |b| {
        b.iter(|| {
            let result = store.try_acquire(black_box(&request), 1000);
            let _ = store.release(&request.resource, request.mode, &request.holder);
            result
        })
    });
}

fn bench_idempotency(c: &mut Criterion) {
    let cache: IdempotencyCache<String> =
        IdempotencyCache::new(&IdempotencyConfig::default(), Arc::new(SystemClock));
    for i in 0..1000 {
        cache.set(&format!("op_{i}"), Ok(format!("result_{i}")));
    }

    c.bench_function("idempotency_get_hit", |b| b.iter(|| cache.get(black_box("op_500"))));
    c.bench_function("idempotency_set", |b| {
        b.iter(|| cache.set(black_box("op_new"), Ok("done".to_string())))
    });
}

criterion_group!(
    benches,
    bench_check_pair,
    bench_check_against_leases,
    bench_acquire_release,
    bench_idempotency
);
criterion_main!(benches);
