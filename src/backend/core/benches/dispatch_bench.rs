//! Benchmarks for the hot paths of the dispatch pipeline.
use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use foreman_core::admission::{AdmissionController, SubmissionContext};
use foreman_core::config::{AdmissionConfig, GroupingConfig, RateLimitSpec};
use foreman_core::grouping::GroupingEngine;
use foreman_core::jobs::{
    Job, JobIdentity, JobKind, JobRecord, JobRegistry, JobResult, OneTimeJob,
};
use foreman_core::retry::RetryPolicy;

struct NoopJob {
    identity: JobIdentity,
}

#[async_trait]
impl Job for NoopJob {
    fn external_id(&self) -> &str {
        &self.identity.external_id
    }

    fn name(&self) -> &str {
        &self.identity.name
    }

    async fn run(&self) -> JobResult {
        Ok(())
    }
}

impl OneTimeJob for NoopJob {}

fn roomy_admission() -> AdmissionController {
    AdmissionController::new(AdmissionConfig {
        enabled: true,
        default: RateLimitSpec::per_minute(1e12),
        one_time: RateLimitSpec::per_minute(1e12),
        repetitive: RateLimitSpec::per_minute(1e12),
        ..AdmissionConfig::default()
    })
}

fn bench_admission_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission_check");
    let controller = roomy_admission();
    let ip_only = SubmissionContext::default().with_ip("10.0.0.1");
    let full = SubmissionContext::default()
        .with_ip("10.0.0.1")
        .with_user("user-1", "premium");
    let app = SubmissionContext::default().with_app_identity("app-1", "key-1");

    for (label, ctx) in [("ip_only", &ip_only), ("ip_and_user", &full), ("app_identity", &app)] {
        group.bench_with_input(BenchmarkId::from_parameter(label), ctx, |b, ctx| {
            b.iter(|| black_box(controller.check(ctx, "bench", JobKind::OneTime)));
        });
    }
    group.finish();
}

fn bench_admission_key_spread(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission_key_spread");
    for keys in [10, 1_000] {
        group.throughput(Throughput::Elements(keys as u64));
        group.bench_with_input(BenchmarkId::from_parameter(keys), &keys, |b, &n| {
            let controller = roomy_admission();
            let contexts: Vec<SubmissionContext> = (0..n)
                .map(|i| SubmissionContext::default().with_ip(format!("10.0.{}.{}", i / 256, i % 256)))
                .collect();
            b.iter(|| {
                for ctx in &contexts {
                    black_box(controller.check(ctx, "bench", JobKind::OneTime));
                }
            });
        });
    }
    group.finish();
}

fn bench_backoff_ladder(c: &mut Criterion) {
    let policy = RetryPolicy {
        max_attempts: 10,
        initial_delay_ms: 1000,
        multiplier: 2.0,
        max_delay_ms: 30_000,
        jitter_factor: 0.1,
    };
    let mut group = c.benchmark_group("retry_backoff");
    group.bench_function("raw", |b| {
        b.iter(|| {
            for attempt in 0..10 {
                black_box(policy.delay_for_attempt(attempt));
            }
        });
    });
    group.bench_function("jittered", |b| {
        b.iter(|| {
            for attempt in 0..10 {
                black_box(policy.jittered_delay_for_attempt(attempt));
            }
        });
    });
    group.finish();
}

fn grouped_record(id: usize) -> JobRecord {
    let mut record = JobRecord::new(
        format!("bench-{}", id),
        "bench job",
        "bench",
        JobKind::OneTime,
    );
    record.group_key = Some("bench".to_string());
    record.can_group = true;
    record
}

fn bench_grouping_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("grouping_append_take");
    for burst in [10, 100] {
        group.throughput(Throughput::Elements(burst as u64));
        group.bench_with_input(BenchmarkId::from_parameter(burst), &burst, |b, &n| {
            let engine = GroupingEngine::new(GroupingConfig::default());
            b.iter(|| {
                for i in 0..n {
                    black_box(engine.append("bench", grouped_record(i)));
                }
                black_box(engine.take("bench"));
            });
        });
    }
    group.finish();
}

fn bench_registry_instantiate(c: &mut Criterion) {
    let registry = JobRegistry::new();
    registry.register_one_time("bench", |identity| NoopJob { identity });

    c.bench_function("registry_instantiate", |b| {
        let identity = JobIdentity::new("bench-1", "bench job");
        b.iter(|| black_box(registry.instantiate_one_time("bench", identity.clone())));
    });
}

criterion_group!(
    benches,
    bench_admission_check,
    bench_admission_key_spread,
    bench_backoff_ladder,
    bench_grouping_cycle,
    bench_registry_instantiate
);
criterion_main!(benches);
