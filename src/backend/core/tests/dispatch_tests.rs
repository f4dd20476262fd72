//! End-to-end tests for the dispatch pipeline.
//!
//! Tests cover:
//! - One-time submission through record persistence and execution
//! - Fixed-delay, fixed-rate and cron schedule timing
//! - Schedule cancellation semantics
//! - Event stream contents

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use foreman_core::admission::{AdmissionController, SubmissionContext};
use foreman_core::config::{
    AdmissionConfig, GroupingConfig, OneTimePoolConfig, RetryConfig, SchedulerPoolConfig,
};
use foreman_core::dispatch::{Dispatcher, OneTimeSubmission, RepetitiveSubmission};
use foreman_core::error::ErrorCode;
use foreman_core::events::BroadcastSink;
use foreman_core::grouping::GroupingEngine;
use foreman_core::jobs::{
    Job, JobIdentity, JobRegistry, JobResult, JobStatus, OneTimeJob, RepetitionMode,
    RepetitiveJob,
};
use foreman_core::pools::{OneTimePool, SchedulerPool};
use foreman_core::retry::RetryEngine;
use foreman_core::store::{JobStore, MemoryStore};
use tokio::time::sleep;

// ============================================================================
// Fixtures
// ============================================================================

struct RecordingJob {
    identity: JobIdentity,
    runs: Arc<AtomicUsize>,
    hold: Duration,
}

#[async_trait]
impl Job for RecordingJob {
    fn external_id(&self) -> &str {
        &self.identity.external_id
    }

    fn name(&self) -> &str {
        &self.identity.name
    }

    async fn run(&self) -> JobResult {
        if !self.hold.is_zero() {
            sleep(self.hold).await;
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl OneTimeJob for RecordingJob {}

struct RecordingTicker {
    identity: JobIdentity,
    runs: Arc<AtomicUsize>,
    interval: Duration,
    hold: Duration,
    mode: RepetitionMode,
}

#[async_trait]
impl Job for RecordingTicker {
    fn external_id(&self) -> &str {
        &self.identity.external_id
    }

    fn name(&self) -> &str {
        &self.identity.name
    }

    async fn run(&self) -> JobResult {
        if !self.hold.is_zero() {
            sleep(self.hold).await;
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl RepetitiveJob for RecordingTicker {
    fn interval(&self) -> Duration {
        self.interval
    }

    fn mode(&self) -> RepetitionMode {
        self.mode
    }
}

struct Pipeline {
    dispatcher: Arc<Dispatcher>,
    store: Arc<MemoryStore>,
    sink: Arc<BroadcastSink>,
    one_time_runs: Arc<AtomicUsize>,
    slow_tick_runs: Arc<AtomicUsize>,
    fast_tick_runs: Arc<AtomicUsize>,
    cron_tick_runs: Arc<AtomicUsize>,
}

fn pipeline() -> Pipeline {
    let registry = Arc::new(JobRegistry::new());
    let one_time_runs = Arc::new(AtomicUsize::new(0));
    let slow_tick_runs = Arc::new(AtomicUsize::new(0));
    let fast_tick_runs = Arc::new(AtomicUsize::new(0));
    let cron_tick_runs = Arc::new(AtomicUsize::new(0));

    let runs = Arc::clone(&one_time_runs);
    registry.register_one_time("record", move |identity| RecordingJob {
        identity,
        runs: Arc::clone(&runs),
        hold: Duration::ZERO,
    });

    // Fixed-delay ticker whose run takes as long as its interval: with
    // delay spacing each cycle costs run + interval.
    let runs = Arc::clone(&slow_tick_runs);
    registry.register_repetitive("slow-tick", move |identity| RecordingTicker {
        identity,
        runs: Arc::clone(&runs),
        interval: Duration::from_millis(40),
        hold: Duration::from_millis(40),
        mode: RepetitionMode::FixedDelay,
    });

    // Fixed-rate ticker with the same run cost: the grid keeps firing
    // every interval regardless of run duration.
    let runs = Arc::clone(&fast_tick_runs);
    registry.register_repetitive("fast-tick", move |identity| RecordingTicker {
        identity,
        runs: Arc::clone(&runs),
        interval: Duration::from_millis(40),
        hold: Duration::from_millis(40),
        mode: RepetitionMode::FixedRate,
    });

    // Cron ticker; the fire times come from the request's expression, the
    // declared interval is unused in this mode.
    let runs = Arc::clone(&cron_tick_runs);
    registry.register_repetitive("cron-tick", move |identity| RecordingTicker {
        identity,
        runs: Arc::clone(&runs),
        interval: Duration::from_secs(60),
        hold: Duration::ZERO,
        mode: RepetitionMode::Cron,
    });

    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let sink = Arc::new(BroadcastSink::new(64));
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        store.clone(),
        Arc::new(AdmissionController::new(AdmissionConfig {
            enabled: false,
            ..AdmissionConfig::default()
        })),
        Arc::new(GroupingEngine::new(GroupingConfig::default())),
        Arc::new(RetryEngine::new(RetryConfig::default(), store.clone())),
        Arc::new(OneTimePool::new(OneTimePoolConfig::default())),
        Arc::new(SchedulerPool::new(SchedulerPoolConfig::default())),
        sink.clone(),
    ));

    Pipeline {
        dispatcher,
        store,
        sink,
        one_time_runs,
        slow_tick_runs,
        fast_tick_runs,
        cron_tick_runs,
    }
}

fn one_time(id: &str) -> OneTimeSubmission {
    OneTimeSubmission {
        external_id: id.to_string(),
        job_name: format!("job-{}", id),
        job_type: "record".to_string(),
        group_key: None,
        group_buffer_ms: None,
        priority: None,
    }
}

fn repetitive(id: &str, job_type: &str) -> RepetitiveSubmission {
    RepetitiveSubmission {
        external_id: id.to_string(),
        job_name: format!("job-{}", id),
        job_type: job_type.to_string(),
        cron_expression: None,
        group_key: None,
        group_buffer_ms: None,
        priority: None,
    }
}

async fn wait_for_status(store: &MemoryStore, id: &str, status: JobStatus) {
    for _ in 0..200 {
        if let Some(record) = store.find_by_external_id(id).await.unwrap() {
            if record.status == status {
                return;
            }
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("record {} never reached {:?}", id, status);
}

// ============================================================================
// One-Time Pipeline
// ============================================================================

#[tokio::test]
async fn test_one_time_submission_persists_and_runs() {
    let p = pipeline();
    let ctx = SubmissionContext::default();

    let record = p
        .dispatcher
        .submit_one_time(one_time("ot-1"), &ctx)
        .await
        .unwrap();
    assert_eq!(record.status, JobStatus::Pending);
    assert_eq!(record.pool_name, "one-time");

    wait_for_status(&p.store, "ot-1", JobStatus::Completed).await;
    assert_eq!(p.one_time_runs.load(Ordering::SeqCst), 1);

    let stats = p.dispatcher.stats();
    assert_eq!(stats.submitted_one_time, 1);
    assert_eq!(stats.completed_runs, 1);
    assert_eq!(stats.failed_runs, 0);
}

#[tokio::test]
async fn test_duplicate_one_time_ids_are_distinct_records() {
    // One-time ids are not deduplicated; resubmission overwrites the
    // terminal record and runs again.
    let p = pipeline();
    let ctx = SubmissionContext::default();

    p.dispatcher
        .submit_one_time(one_time("ot-1"), &ctx)
        .await
        .unwrap();
    wait_for_status(&p.store, "ot-1", JobStatus::Completed).await;

    p.dispatcher
        .submit_one_time(one_time("ot-1"), &ctx)
        .await
        .unwrap();
    wait_for_status(&p.store, "ot-1", JobStatus::Completed).await;

    assert_eq!(p.one_time_runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_events_follow_lifecycle() {
    let p = pipeline();
    let ctx = SubmissionContext::default();
    let mut events = p.sink.subscribe();

    p.dispatcher
        .submit_one_time(one_time("ot-1"), &ctx)
        .await
        .unwrap();
    wait_for_status(&p.store, "ot-1", JobStatus::Completed).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event.status);
    }
    assert_eq!(
        seen,
        vec![JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
    );
}

// ============================================================================
// Schedule Timing
// ============================================================================

#[tokio::test]
async fn test_fixed_rate_outpaces_fixed_delay() {
    let p = pipeline();
    let ctx = SubmissionContext::default();

    p.dispatcher
        .submit_repetitive(repetitive("slow", "slow-tick"), &ctx)
        .await
        .unwrap();
    p.dispatcher
        .submit_repetitive(repetitive("fast", "fast-tick"), &ctx)
        .await
        .unwrap();

    // Both jobs hold for one interval per run. Fixed-rate fires on the
    // 40ms grid (~7 ticks in 300ms); fixed-delay spaces run-end to
    // run-start (~3 completed runs).
    sleep(Duration::from_millis(300)).await;
    p.dispatcher.cancel_repetitive("slow").await.unwrap();
    p.dispatcher.cancel_repetitive("fast").await.unwrap();

    let slow = p.slow_tick_runs.load(Ordering::SeqCst);
    let fast = p.fast_tick_runs.load(Ordering::SeqCst);
    assert!(slow >= 2, "fixed-delay ran {} times", slow);
    assert!(
        fast > slow,
        "fixed-rate ({}) should outpace fixed-delay ({})",
        fast,
        slow
    );
}

#[tokio::test]
async fn test_cron_fires_on_its_expression_until_cancelled() {
    let p = pipeline();
    let ctx = SubmissionContext::default();

    let mut submission = repetitive("cron", "cron-tick");
    submission.cron_expression = Some("* * * * * *".to_string());
    let record = p.dispatcher.submit_repetitive(submission, &ctx).await.unwrap();
    assert_eq!(record.repetition_mode, Some(RepetitionMode::Cron));
    assert!(p.dispatcher.is_scheduled("cron"));

    // Every-second expression: the first fire lands within two seconds.
    let mut fired = 0;
    for _ in 0..40 {
        fired = p.cron_tick_runs.load(Ordering::SeqCst);
        if fired > 0 {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(fired >= 1, "cron schedule never fired");
    wait_for_status(&p.store, "cron", JobStatus::Completed).await;

    p.dispatcher.cancel_repetitive("cron").await.unwrap();
    assert!(!p.dispatcher.is_scheduled("cron"));

    // No fire after the cancel signal, past the next would-be occurrence.
    sleep(Duration::from_millis(50)).await;
    let after = p.cron_tick_runs.load(Ordering::SeqCst);
    sleep(Duration::from_millis(1300)).await;
    assert_eq!(p.cron_tick_runs.load(Ordering::SeqCst), after);
}

#[tokio::test]
async fn test_cancel_stops_future_fires() {
    let p = pipeline();
    let ctx = SubmissionContext::default();

    p.dispatcher
        .submit_repetitive(repetitive("slow", "slow-tick"), &ctx)
        .await
        .unwrap();
    assert!(p.dispatcher.is_scheduled("slow"));

    // Let at least one run land, then cancel mid-flight.
    sleep(Duration::from_millis(100)).await;
    let record = p.dispatcher.cancel_repetitive("slow").await.unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
    assert!(!p.dispatcher.is_scheduled("slow"));

    // An in-flight run completes; no new runs start after the signal.
    sleep(Duration::from_millis(100)).await;
    let after = p.slow_tick_runs.load(Ordering::SeqCst);
    sleep(Duration::from_millis(150)).await;
    assert_eq!(p.slow_tick_runs.load(Ordering::SeqCst), after);
}

#[tokio::test]
async fn test_cancel_is_not_idempotent() {
    let p = pipeline();
    let ctx = SubmissionContext::default();

    p.dispatcher
        .submit_repetitive(repetitive("slow", "slow-tick"), &ctx)
        .await
        .unwrap();
    p.dispatcher.cancel_repetitive("slow").await.unwrap();

    let err = p.dispatcher.cancel_repetitive("slow").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::JobNotFound);
}

#[tokio::test]
async fn test_schedule_conflict_and_resubmission() {
    let p = pipeline();
    let ctx = SubmissionContext::default();

    p.dispatcher
        .submit_repetitive(repetitive("slow", "slow-tick"), &ctx)
        .await
        .unwrap();
    let err = p
        .dispatcher
        .submit_repetitive(repetitive("slow", "slow-tick"), &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ScheduleConflict);

    // Cancellation frees the id for a fresh schedule.
    p.dispatcher.cancel_repetitive("slow").await.unwrap();
    p.dispatcher
        .submit_repetitive(repetitive("slow", "slow-tick"), &ctx)
        .await
        .unwrap();
    assert!(p.dispatcher.is_scheduled("slow"));
    p.dispatcher.cancel_repetitive("slow").await.unwrap();
}
