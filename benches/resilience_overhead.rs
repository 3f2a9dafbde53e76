//! Benchmarks for resilience overhead
//!
//! This benchmark measures:
//! - Orchestrator cost around an always-succeeding unit of work
//! - Circuit breaker admission and outcome recording
//! - Analytics writes and windowed rate queries
//! - Degradation parameter rewriting

use ai_resilience::resilience::analytics::ErrorAnalytics;
use ai_resilience::{
    CallOptions, CircuitBreaker, CircuitBreakerConfig, DegradationController, DegradationLevel,
    Error, ErrorCategory, ResilienceOrchestrator, RetryPolicy,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use std::time::Duration;

fn bench_orchestrator(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let orchestrator = ResilienceOrchestrator::default();
    let mut group = c.benchmark_group("orchestrator");

    group.bench_function("bare_success", |b| {
        b.to_async(&rt).iter(|| async {
            orchestrator
                .execute_with_resilience(
                    || async { Ok::<_, Error>(black_box(1u32)) },
                    CallOptions::new(),
                )
                .await
        })
    });

    group.bench_function("breaker_and_retry_success", |b| {
        b.to_async(&rt).iter(|| async {
            let options = CallOptions::new()
                .with_circuit_breaker("bench")
                .with_retry(RetryPolicy::new().with_base_delay(Duration::from_millis(1)));
            orchestrator
                .execute_with_resilience(|| async { Ok::<_, Error>(black_box(1u32)) }, options)
                .await
        })
    });

    group.finish();
}

fn bench_breaker(c: &mut Criterion) {
    let breaker = CircuitBreaker::new("bench", CircuitBreakerConfig::default());
    let mut group = c.benchmark_group("circuit_breaker");

    group.bench_function("acquire_and_record_success", |b| {
        b.iter(|| {
            if let Ok(permit) = black_box(breaker.try_acquire()) {
                permit.record_success();
            }
        })
    });

    group.bench_function("allow_check", |b| b.iter(|| black_box(breaker.allow())));

    group.finish();
}

fn bench_analytics(c: &mut Criterion) {
    let analytics = ErrorAnalytics::with_capacity(1000);
    let mut group = c.benchmark_group("analytics");
    group.throughput(Throughput::Elements(1));

    group.bench_function("record", |b| {
        b.iter(|| analytics.record_now(ErrorCategory::Network, "bench", "connection reset", false))
    });

    group.bench_function("error_rate_full_buffer", |b| {
        b.iter(|| black_box(analytics.error_rate(Duration::from_secs(60))))
    });

    group.bench_function("report", |b| b.iter(|| black_box(analytics.report())));

    group.finish();
}

fn bench_degradation(c: &mut Criterion) {
    let controller = DegradationController::new(Default::default());
    controller.set_level(DegradationLevel::Low);
    let params = json!({
        "width": 1024,
        "height": 768,
        "steps": 40,
        "batch_size": 4,
        "prompt": "a cat"
    });

    c.bench_function("adjust_parameters", |b| {
        b.iter(|| black_box(controller.adjust_parameters(black_box(&params))))
    });
}

criterion_group!(
    benches,
    bench_orchestrator,
    bench_breaker,
    bench_analytics,
    bench_degradation
);
criterion_main!(benches);
