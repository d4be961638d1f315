// Quota admission benchmarks (Criterion)
//
// Key metrics measured:
// - Single fixed-window and sliding-window checks against the in-process store
// - Concurrent checks from many tasks on one organization
// - Counter key derivation
//
// Usage:
//   cargo bench --bench quota_check

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use regionguard_controlplane::clock::system_clock;
use regionguard_controlplane::quota::{
    InMemoryCounterStore, MetricType, QuotaConfig, QuotaEngine, QuotaPlan, QuotaRequest, QuotaScope,
    StaticLimitsProvider, TimeGranularity, WindowType,
};
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn engine() -> QuotaEngine {
    let clock = system_clock();
    let plan = QuotaPlan {
        max_concurrent_requests: u64::MAX,
        monthly_request_limit: u64::MAX / 4,
        monthly_token_limit: u64::MAX / 4,
    };
    QuotaEngine::new(
        QuotaConfig::default(),
        Arc::new(InMemoryCounterStore::new(clock.clone())),
        Arc::new(StaticLimitsProvider::new(Some(plan))),
        clock,
    )
}

/// Benchmark: one check per iteration for each window type
fn bench_single_check(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("single_check");

    for window in WindowType::ALL {
        let engine = engine();
        let request = QuotaRequest::new(MetricType::Tokens, TimeGranularity::Minute, window);
        group.bench_function(window.as_str(), |b| {
            b.iter(|| {
                let result = rt.block_on(engine.check_quota("bench-org", &request)).unwrap();
                black_box(result);
            });
        });
    }

    group.finish();
}

/// Benchmark: N tasks checking the same organization at once
fn bench_concurrent_checks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("concurrent_checks");
    group.sample_size(20);

    for tasks in [5usize, 10, 25, 50] {
        let engine = engine();
        let request = QuotaRequest::new(MetricType::Requests, TimeGranularity::Month, WindowType::Fixed);
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            b.iter(|| {
                rt.block_on(async {
                    let handles: Vec<_> = (0..tasks)
                        .map(|_| {
                            let engine = engine.clone();
                            let request = request.clone();
                            tokio::spawn(async move { engine.check_quota("bench-org", &request).await })
                        })
                        .collect();
                    for handle in handles {
                        black_box(handle.await.unwrap().unwrap());
                    }
                });
            });
        });
    }

    group.finish();
}

/// Benchmark: counter key derivation with and without escaping
fn bench_counter_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_key");

    let plain = QuotaScope::organization("acme", MetricType::Tokens, TimeGranularity::Minute, WindowType::Fixed)
        .unwrap()
        .with_user("alice")
        .unwrap();
    let escaped = QuotaScope::organization("ac:me%", MetricType::Tokens, TimeGranularity::Minute, WindowType::Fixed)
        .unwrap()
        .with_user("al:ice")
        .unwrap();

    group.bench_function("plain", |b| b.iter(|| black_box(plain.counter_key())));
    group.bench_function("escaped", |b| b.iter(|| black_box(escaped.counter_key())));

    group.finish();
}

criterion_group!(benches, bench_single_check, bench_concurrent_checks, bench_counter_key);
criterion_main!(benches);
