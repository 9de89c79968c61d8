//! Criterion benchmarks for the cache and limiter hot paths.
//!
//! Benchmarks:
//! 1. Fast-tier hits (read lock + atomic recency stamp)
//! 2. Write-through `set` with and without a durable copy
//! 3. Inserts that trigger batch eviction
//! 4. Uncontended limiter acquire

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;

use navsync_core::{
    CacheSettings, DataType, MemoryStore, RateLimitSettings, RateLimiter, SyntheticSource,
    TieredCache,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn keys(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("FUND{i:05}")).collect()
}

fn cache_with(max: usize) -> TieredCache {
    let settings = CacheSettings {
        max_fast_tier_size: max,
        ..CacheSettings::default()
    };
    TieredCache::new(settings, Arc::new(MemoryStore::new())).unwrap()
}

// ── 1. Fast-tier hits ────────────────────────────────────────────────

fn bench_fast_hits(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_get_hit");
    for size in [100usize, 10_000] {
        let cache = cache_with(size * 2);
        let ks = keys(size);
        let payload = SyntheticSource::new(1).with_points(30).series("FUND00000");
        for k in &ks {
            cache.set(k, payload.clone(), DataType::History, false);
        }
        group.bench_with_input(BenchmarkId::from_parameter(size), &ks, |b, ks| {
            let mut i = 0usize;
            b.iter(|| {
                i = (i + 1) % ks.len();
                black_box(cache.get(&ks[i], DataType::History))
            })
        });
    }
    group.finish();
}

// ── 2. Write-through ─────────────────────────────────────────────────

fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_set");
    for persist in [false, true] {
        let cache = cache_with(50_000);
        let ks = keys(10_000);
        group.bench_with_input(BenchmarkId::new("persist", persist), &ks, |b, ks| {
            let mut i = 0usize;
            b.iter(|| {
                i = (i + 1) % ks.len();
                cache.set(&ks[i], json!(i), DataType::LatestValue, persist);
            })
        });
    }
    group.finish();
}

// ── 3. Eviction ──────────────────────────────────────────────────────

fn bench_eviction(c: &mut Criterion) {
    let ks = keys(20_000);
    c.bench_function("cache_set_with_eviction", |b| {
        b.iter_with_setup(
            || cache_with(1_000),
            |cache| {
                for (i, k) in ks.iter().take(5_000).enumerate() {
                    cache.set(k, json!(i), DataType::Metadata, false);
                }
                black_box(cache.stats().evictions)
            },
        )
    });
}

// ── 4. Limiter ───────────────────────────────────────────────────────

fn bench_limiter(c: &mut Criterion) {
    let limiter = RateLimiter::new(RateLimitSettings {
        max_calls_per_period: u32::MAX,
        period_seconds: 0.001,
        max_wait_seconds: None,
    })
    .unwrap();
    c.bench_function("limiter_acquire_uncontended", |b| {
        b.iter(|| limiter.acquire(black_box("nav")))
    });
}

criterion_group!(benches, bench_fast_hits, bench_set, bench_eviction, bench_limiter);
criterion_main!(benches);
