//! Dispatch core.
//!
//! The [`Dispatcher`] is the seam every submission flows through: admission
//! check, registry instancing, record bookkeeping, grouping hand-off, pool
//! placement, and retry redispatch. Rejections (admission, validation,
//! saturated queue, schedule conflict) are synchronous and touch no pool
//! state; execution outcomes surface only through the store and the event
//! sink.
//!
//! One-time jobs run on the bounded [`OneTimePool`]. Repetitive jobs own a
//! ticker task registered in the [`HandleMap`]; FIXED_DELAY ticks are
//! strictly sequential, FIXED_RATE ticks stay on the grid and may overlap,
//! CRON computes the next fire from the expression after the previous tick
//! completes. Cancellation flips a watch flag observed between ticks; an
//! in-flight run always finishes.

pub mod handle;

pub use handle::{HandleMap, ScheduledHandle};

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::admission::{AdmissionController, SubmissionContext};
use crate::error::{ErrorCode, ForemanError, Result};
use crate::events::{EventSink, JobEvent};
use crate::grouping::GroupingEngine;
use crate::jobs::{
    Job, JobIdentity, JobKind, JobPriority, JobRecord, JobRegistry, RepetitionMode, RepetitiveJob,
};
use crate::pools::{OneTimePool, SchedulerPool};
use crate::retry::RetryEngine;
use crate::store::JobStore;

// ═══════════════════════════════════════════════════════════════════════════════
// Submissions
// ═══════════════════════════════════════════════════════════════════════════════

/// Request to run a one-time job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimeSubmission {
    pub external_id: String,
    pub job_name: String,
    pub job_type: String,
    #[serde(default)]
    pub group_key: Option<String>,
    #[serde(default)]
    pub group_buffer_ms: Option<u64>,
    #[serde(default)]
    pub priority: Option<String>,
}

/// Request to schedule a repetitive job.
///
/// Interval, initial delay and mode come from the job instance itself; the
/// cron expression is the only schedule input carried on the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepetitiveSubmission {
    pub external_id: String,
    pub job_name: String,
    pub job_type: String,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub group_key: Option<String>,
    #[serde(default)]
    pub group_buffer_ms: Option<u64>,
    #[serde(default)]
    pub priority: Option<String>,
}

/// Dispatcher counters snapshot, served by the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStats {
    pub submitted_one_time: u64,
    pub submitted_repetitive: u64,
    pub grouped_buffered: u64,
    pub completed_runs: u64,
    pub failed_runs: u64,
    pub cancelled_schedules: u64,
    pub retry_redispatches: u64,
    pub active_schedules: usize,
}

#[derive(Default)]
struct DispatchCounters {
    submitted_one_time: AtomicU64,
    submitted_repetitive: AtomicU64,
    grouped_buffered: AtomicU64,
    completed_runs: AtomicU64,
    failed_runs: AtomicU64,
    cancelled_schedules: AtomicU64,
    retry_redispatches: AtomicU64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Dispatcher
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Dispatcher {
    registry: Arc<JobRegistry>,
    store: Arc<dyn JobStore>,
    admission: Arc<AdmissionController>,
    grouping: Arc<GroupingEngine>,
    retry: Arc<RetryEngine>,
    one_time_pool: Arc<OneTimePool>,
    scheduler_pool: Arc<SchedulerPool>,
    sink: Arc<dyn EventSink>,
    handles: HandleMap,
    counters: DispatchCounters,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<dyn JobStore>,
        admission: Arc<AdmissionController>,
        grouping: Arc<GroupingEngine>,
        retry: Arc<RetryEngine>,
        one_time_pool: Arc<OneTimePool>,
        scheduler_pool: Arc<SchedulerPool>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            store,
            admission,
            grouping,
            retry,
            one_time_pool,
            scheduler_pool,
            sink,
            handles: HandleMap::new(),
            counters: DispatchCounters::default(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Submission
    // ─────────────────────────────────────────────────────────────────────────

    /// Submit a one-time job.
    ///
    /// Returns the persisted record once the job is handed to its pool or
    /// buffered into its group. Execution outcome is observable through the
    /// store and the event sink only.
    pub async fn submit_one_time(
        self: &Arc<Self>,
        submission: OneTimeSubmission,
        ctx: &SubmissionContext,
    ) -> Result<JobRecord> {
        self.admission
            .check(ctx, &submission.job_type, JobKind::OneTime)
            .into_result()?;
        validate_identity(
            &submission.external_id,
            &submission.job_name,
            &submission.job_type,
        )?;
        match self.registry.kind_of(&submission.job_type) {
            Some(JobKind::OneTime) => {}
            Some(JobKind::Repetitive) => {
                return Err(ForemanError::validation(format!(
                    "Job type is repetitive, submit it as a schedule: {}",
                    submission.job_type
                )))
            }
            None => return Err(ForemanError::job_type_unknown(&submission.job_type)),
        }

        let mut record = JobRecord::new(
            &submission.external_id,
            &submission.job_name,
            &submission.job_type,
            JobKind::OneTime,
        )
        .with_priority(priority_from(submission.priority.as_deref()));
        apply_grouping(&mut record, &submission.group_key, submission.group_buffer_ms);
        let (retry_enabled, max_attempts) = self.retry.defaults_for(JobKind::OneTime);
        record.retry_enabled = retry_enabled;
        record.max_retry_attempts = max_attempts;

        self.store.save(&record).await?;
        self.counters
            .submitted_one_time
            .fetch_add(1, Ordering::Relaxed);
        counter!("foreman_jobs_submitted_total", "kind" => "one_time").increment(1);
        self.publish(&record, None);

        if record.can_group {
            self.buffer_grouped(record.clone());
            return Ok(record);
        }

        self.dispatch_one_time(record.clone(), None)?;
        Ok(record)
    }

    /// Schedule a repetitive job.
    ///
    /// The job instance's declared `interval()`, `initial_delay()` and
    /// `mode()` drive the schedule; a CRON-mode job additionally requires a
    /// parseable expression on the request. An external id with a live
    /// schedule is rejected; cancel first.
    pub async fn submit_repetitive(
        self: &Arc<Self>,
        submission: RepetitiveSubmission,
        ctx: &SubmissionContext,
    ) -> Result<JobRecord> {
        self.admission
            .check(ctx, &submission.job_type, JobKind::Repetitive)
            .into_result()?;
        validate_identity(
            &submission.external_id,
            &submission.job_name,
            &submission.job_type,
        )?;
        match self.registry.kind_of(&submission.job_type) {
            Some(JobKind::Repetitive) => {}
            Some(JobKind::OneTime) => {
                return Err(ForemanError::validation(format!(
                    "Job type is one-time, submit it as a single run: {}",
                    submission.job_type
                )))
            }
            None => return Err(ForemanError::job_type_unknown(&submission.job_type)),
        }

        let job = self.registry.instantiate_repetitive(
            &submission.job_type,
            JobIdentity::new(&submission.external_id, &submission.job_name),
        )?;
        let mode = job.mode();

        let cron_expression = submission.cron_expression.unwrap_or_default();
        if mode == RepetitionMode::Cron {
            if cron_expression.trim().is_empty() {
                return Err(ForemanError::missing_field("cron_expression"));
            }
            cron::Schedule::from_str(&cron_expression)
                .map_err(|e| ForemanError::invalid_cron(&cron_expression, e.to_string()))?;
        }

        if self.handles.contains(&submission.external_id) {
            return Err(ForemanError::schedule_conflict(&submission.external_id));
        }

        let mut record = JobRecord::new(
            &submission.external_id,
            &submission.job_name,
            &submission.job_type,
            JobKind::Repetitive,
        )
        .with_schedule(
            job.interval().as_millis() as u64,
            job.initial_delay().as_millis() as u64,
            mode,
        )
        .with_priority(priority_from(submission.priority.as_deref()));
        if mode == RepetitionMode::Cron {
            record = record.with_cron(&cron_expression);
        }
        apply_grouping(&mut record, &submission.group_key, submission.group_buffer_ms);
        let (retry_enabled, max_attempts) = self.retry.defaults_for(JobKind::Repetitive);
        record.retry_enabled = retry_enabled;
        record.max_retry_attempts = max_attempts;

        self.counters
            .submitted_repetitive
            .fetch_add(1, Ordering::Relaxed);
        counter!("foreman_jobs_submitted_total", "kind" => "repetitive").increment(1);

        if record.can_group {
            // Repetitive records persist at dispatch, after the group flush.
            self.buffer_grouped(record.clone());
            return Ok(record);
        }

        self.dispatch_repetitive(record.clone(), None).await?;
        Ok(record)
    }

    /// Cancel a scheduled repetitive job.
    ///
    /// Non-interrupting: the flag is observed between ticks, an in-flight
    /// run finishes. Errors with `JobNotFound` when no schedule is live.
    pub async fn cancel_repetitive(&self, external_id: &str) -> Result<JobRecord> {
        if !self.handles.cancel(external_id) {
            return Err(ForemanError::job_not_found(external_id));
        }
        self.counters
            .cancelled_schedules
            .fetch_add(1, Ordering::Relaxed);
        counter!("foreman_jobs_cancelled_total").increment(1);
        tracing::info!(external_id, "Schedule cancelled");

        match self.store.mark_cancelled(external_id).await {
            Ok(record) => {
                self.publish(&record, None);
                Ok(record)
            }
            Err(e) => {
                tracing::warn!(external_id, error = %e, "Schedule cancelled, record update failed");
                self.store
                    .find_by_external_id(external_id)
                    .await?
                    .ok_or_else(|| ForemanError::job_not_found(external_id))
            }
        }
    }

    /// Whether an external id currently holds a live schedule.
    pub fn is_scheduled(&self, external_id: &str) -> bool {
        self.handles.contains(external_id)
    }

    /// Number of live schedules.
    pub fn active_schedules(&self) -> usize {
        self.handles.len()
    }

    /// External ids of every live schedule.
    pub fn scheduled_ids(&self) -> Vec<String> {
        self.handles.ids()
    }

    /// Counters snapshot.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            submitted_one_time: self.counters.submitted_one_time.load(Ordering::Relaxed),
            submitted_repetitive: self.counters.submitted_repetitive.load(Ordering::Relaxed),
            grouped_buffered: self.counters.grouped_buffered.load(Ordering::Relaxed),
            completed_runs: self.counters.completed_runs.load(Ordering::Relaxed),
            failed_runs: self.counters.failed_runs.load(Ordering::Relaxed),
            cancelled_schedules: self.counters.cancelled_schedules.load(Ordering::Relaxed),
            retry_redispatches: self.counters.retry_redispatches.load(Ordering::Relaxed),
            active_schedules: self.handles.len(),
        }
    }

    /// Signal every live schedule to stop. Returns how many were signalled.
    pub fn cancel_all_schedules(&self) -> usize {
        self.handles.cancel_all()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Grouping
    // ─────────────────────────────────────────────────────────────────────────

    fn buffer_grouped(self: &Arc<Self>, record: JobRecord) {
        let Some(key) = record.group_key.clone() else {
            return;
        };
        let external_id = record.external_id.clone();
        let disposition = self.grouping.append(&key, record);
        self.counters.grouped_buffered.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            external_id,
            group_key = %key,
            group_size = disposition.group_size,
            "Submission buffered into group"
        );

        if disposition.first_in_list {
            let dispatcher = Arc::clone(self);
            let _ = self
                .scheduler_pool
                .schedule_once(disposition.window, async move {
                    dispatcher.flush_group(&key).await;
                });
        }
    }

    /// Flush a debounce group: the first record of each non-empty list runs
    /// annotated with that list's buffered count, the rest are absorbed.
    async fn flush_group(self: &Arc<Self>, key: &str) {
        // The second list's timer finds the group already gone.
        let Some(group) = self.grouping.take(key) else {
            return;
        };
        tracing::debug!(group_key = key, total = group.total(), "Flushing group");

        for (record, represented) in group.representatives() {
            let external_id = record.external_id.clone();
            let outcome = match record.kind {
                JobKind::OneTime => self.dispatch_one_time(record, Some(represented)),
                JobKind::Repetitive => self.dispatch_repetitive(record, Some(represented)).await,
            };
            if let Err(e) = outcome {
                tracing::warn!(group_key = key, external_id, error = %e, "Grouped dispatch failed");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // One-Time Path
    // ─────────────────────────────────────────────────────────────────────────

    /// Place a persisted one-time record on the pool.
    fn dispatch_one_time(
        self: &Arc<Self>,
        record: JobRecord,
        represented: Option<usize>,
    ) -> Result<()> {
        let job = self.registry.instantiate_one_time(
            &record.job_type,
            JobIdentity::new(&record.external_id, &record.job_name),
        )?;

        let slot = match self.one_time_pool.try_reserve() {
            Ok(slot) => slot,
            Err(e) => {
                let dispatcher = Arc::clone(self);
                let external_id = record.external_id.clone();
                tokio::spawn(async move {
                    dispatcher
                        .record_failure(&external_id, "Worker pool saturated", represented)
                        .await;
                });
                return Err(e);
            }
        };

        let dispatcher = Arc::clone(self);
        let external_id = record.external_id.clone();
        self.one_time_pool.execute(slot, async move {
            dispatcher
                .run_instance(&external_id, job.as_ref(), represented)
                .await
        });
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Repetitive Path
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist a repetitive record and start its ticker.
    async fn dispatch_repetitive(
        self: &Arc<Self>,
        record: JobRecord,
        represented: Option<usize>,
    ) -> Result<()> {
        let job = self.registry.instantiate_repetitive(
            &record.job_type,
            JobIdentity::new(&record.external_id, &record.job_name),
        )?;
        let mode = record.repetition_mode.unwrap_or_else(|| job.mode());
        let interval = Duration::from_millis(
            record
                .interval_ms
                .unwrap_or_else(|| job.interval().as_millis() as u64),
        );
        let initial_delay = Duration::from_millis(record.initial_delay_ms.unwrap_or(0));
        let cron_schedule = match mode {
            RepetitionMode::Cron => {
                let expression = record
                    .cron_expression
                    .clone()
                    .ok_or_else(|| ForemanError::missing_field("cron_expression"))?;
                Some(
                    cron::Schedule::from_str(&expression)
                        .map_err(|e| ForemanError::invalid_cron(&expression, e.to_string()))?,
                )
            }
            _ => None,
        };

        // Reserve the handle slot first so a conflicting submission never
        // clobbers the live schedule's record. The ticker waits for the
        // release sent once the record is persisted.
        let (release, released) = oneshot::channel::<()>();
        let dispatcher = Arc::clone(self);
        let external_id = record.external_id.clone();
        let generation = self
            .handles
            .insert_with(&record.external_id, move |observer, generation| {
                tokio::spawn(async move {
                    if released.await.is_err() {
                        return;
                    }
                    dispatcher
                        .ticker_loop(
                            external_id,
                            generation,
                            job,
                            mode,
                            interval,
                            initial_delay,
                            cron_schedule,
                            observer,
                        )
                        .await;
                })
            })?;

        if let Err(e) = self.store.save(&record).await {
            self.handles.remove_generation(&record.external_id, generation);
            return Err(e);
        }
        self.publish(&record, represented);
        let _ = release.send(());

        tracing::info!(
            external_id = %record.external_id,
            job_type = %record.job_type,
            mode = mode.name(),
            interval_ms = record.interval_ms,
            "Repetitive job scheduled"
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn ticker_loop(
        self: Arc<Self>,
        external_id: String,
        generation: u64,
        job: Arc<dyn RepetitiveJob>,
        mode: RepetitionMode,
        interval: Duration,
        initial_delay: Duration,
        cron_schedule: Option<cron::Schedule>,
        mut observer: watch::Receiver<bool>,
    ) {
        if !initial_delay.is_zero()
            && !sleep_unless_cancelled(&mut observer, initial_delay).await
        {
            return;
        }
        if *observer.borrow() {
            return;
        }

        match mode {
            // Strictly sequential: the next wait starts when the run ends.
            RepetitionMode::FixedDelay => loop {
                self.run_tick(&external_id, &job).await;
                if *observer.borrow() {
                    return;
                }
                if !sleep_unless_cancelled(&mut observer, interval).await {
                    return;
                }
            },
            // Grid ticks; a slow run does not shift the grid and the next
            // tick fires concurrently.
            RepetitionMode::FixedRate => {
                let mut grid = tokio::time::interval(interval.max(Duration::from_millis(1)));
                grid.set_missed_tick_behavior(MissedTickBehavior::Burst);
                loop {
                    tokio::select! {
                        _ = grid.tick() => {}
                        _ = observer.changed() => return,
                    }
                    if *observer.borrow() {
                        return;
                    }
                    let dispatcher = Arc::clone(&self);
                    let id = external_id.clone();
                    let instance = Arc::clone(&job);
                    tokio::spawn(async move {
                        dispatcher.run_tick(&id, &instance).await;
                    });
                }
            }
            // Next fire computed after the previous tick completes, UTC.
            RepetitionMode::Cron => {
                let Some(schedule) = cron_schedule else { return };
                loop {
                    let Some(next) = schedule.upcoming(Utc).next() else {
                        tracing::info!(external_id, "Cron schedule exhausted");
                        break;
                    };
                    let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    if !sleep_unless_cancelled(&mut observer, wait).await {
                        return;
                    }
                    if *observer.borrow() {
                        return;
                    }
                    self.run_tick(&external_id, &job).await;
                }
                // Natural end only. Matching on the generation leaves a
                // successor schedule alone if a cancel and resubmit raced
                // the final tick.
                self.handles.remove_generation(&external_id, generation);
            }
        }
    }

    /// One repetitive execution, accounted on the scheduler pool.
    async fn run_tick(&self, external_id: &str, job: &Arc<dyn RepetitiveJob>) {
        let outcome = self
            .scheduler_pool
            .run(self.run_instance(external_id, job.as_ref(), None))
            .await;
        if let Err(e) = outcome {
            tracing::debug!(external_id, error = %e, "Tick finished with error");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one job instance against its record.
    ///
    /// Store failures on this path are logged and swallowed; the run's own
    /// failure is what the returned `Result` carries, so pools count it.
    async fn run_instance<J>(
        &self,
        external_id: &str,
        job: &J,
        represented: Option<usize>,
    ) -> Result<()>
    where
        J: Job + ?Sized,
    {
        let record = match self.store.mark_started(external_id).await {
            Ok(record) => record,
            Err(e) if e.code() == ErrorCode::InvalidStateTransition => {
                tracing::debug!(external_id, "Record no longer runnable, skipping run");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(external_id, error = %e, "Could not mark record started");
                return Ok(());
            }
        };
        self.publish(&record, represented);

        let start = Instant::now();
        let outcome = job.run().await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                self.counters.completed_runs.fetch_add(1, Ordering::Relaxed);
                counter!("foreman_jobs_completed_total", "job_type" => record.job_type.clone())
                    .increment(1);
                match self.store.mark_completed(external_id, Some(elapsed_ms)).await {
                    Ok(updated) => self.publish(&updated, represented),
                    Err(e) => {
                        tracing::warn!(external_id, error = %e, "Could not mark record completed")
                    }
                }
                Ok(())
            }
            Err(job_error) => {
                self.counters.failed_runs.fetch_add(1, Ordering::Relaxed);
                counter!("foreman_jobs_failed_total", "job_type" => record.job_type.clone())
                    .increment(1);
                tracing::warn!(
                    external_id,
                    error_kind = %job_error.kind,
                    error = %job_error.message,
                    elapsed_ms,
                    "Job run failed"
                );
                match self.store.mark_failed(external_id, &job_error.message).await {
                    Ok(updated) => self.publish(&updated, represented),
                    Err(e) => {
                        tracing::warn!(external_id, error = %e, "Could not mark record failed")
                    }
                }
                if let Err(e) = self.retry.schedule_retry(external_id, &job_error).await {
                    tracing::warn!(external_id, error = %e, "Retry scheduling failed");
                }
                Err(ForemanError::execution_failed(&job_error.message))
            }
        }
    }

    /// Fail a record without running it (saturated pool at dispatch time).
    async fn record_failure(&self, external_id: &str, reason: &str, represented: Option<usize>) {
        self.counters.failed_runs.fetch_add(1, Ordering::Relaxed);
        match self.store.mark_failed(external_id, reason).await {
            Ok(record) => {
                counter!("foreman_jobs_failed_total", "job_type" => record.job_type.clone())
                    .increment(1);
                self.publish(&record, represented);
            }
            Err(e) => tracing::warn!(external_id, error = %e, "Could not record dispatch failure"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retry Sweep
    // ─────────────────────────────────────────────────────────────────────────

    /// Start the periodic retry sweep.
    pub fn spawn_retry_sweep(self: &Arc<Self>) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        let period = Duration::from_millis(self.retry.sweep_interval_ms().max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                dispatcher.sweep_due_retries().await;
            }
        })
    }

    /// One sweep pass: claim every due retry and redispatch it.
    pub async fn sweep_due_retries(self: &Arc<Self>) {
        let due = match self.retry.due_retries().await {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(error = %e, "Retry sweep could not list due records");
                return;
            }
        };

        for record in due {
            // A live schedule keeps running; redispatching under it would
            // double the ticker.
            if record.kind == JobKind::Repetitive && self.handles.contains(&record.external_id) {
                tracing::warn!(
                    external_id = %record.external_id,
                    "Schedule already live, skipping retry redispatch"
                );
                continue;
            }

            match self.retry.begin_redispatch(&record.external_id).await {
                Ok(Some(claimed)) => {
                    self.counters
                        .retry_redispatches
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        external_id = %claimed.external_id,
                        attempt = claimed.retry_count,
                        "Redispatching retried job"
                    );
                    let outcome = match claimed.kind {
                        JobKind::OneTime => self.dispatch_one_time(claimed, None),
                        JobKind::Repetitive => self.dispatch_repetitive(claimed, None).await,
                    };
                    if let Err(e) = outcome {
                        tracing::warn!(error = %e, "Retry redispatch failed");
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Retry claim failed"),
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    fn publish(&self, record: &JobRecord, represented: Option<usize>) {
        let mut event = JobEvent::from_record(record);
        if let Some(count) = represented {
            event = event.with_represented(count);
        }
        self.sink.publish(event);
    }
}

fn validate_identity(external_id: &str, job_name: &str, job_type: &str) -> Result<()> {
    if external_id.trim().is_empty() {
        return Err(ForemanError::missing_field("external_id"));
    }
    if job_name.trim().is_empty() {
        return Err(ForemanError::missing_field("job_name"));
    }
    if job_type.trim().is_empty() {
        return Err(ForemanError::missing_field("job_type"));
    }
    Ok(())
}

fn priority_from(name: Option<&str>) -> JobPriority {
    name.map(JobPriority::from_name).unwrap_or(JobPriority::Normal)
}

fn apply_grouping(record: &mut JobRecord, group_key: &Option<String>, buffer_ms: Option<u64>) {
    if let Some(key) = group_key {
        record.group_key = Some(key.clone());
        record.can_group = true;
        record.group_buffer_ms = buffer_ms;
    }
}

/// Sleep for `wait` unless cancellation lands first.
async fn sleep_unless_cancelled(observer: &mut watch::Receiver<bool>, wait: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(wait) => true,
        _ = observer.changed() => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AdmissionConfig, GroupingConfig, OneTimePoolConfig, RetryConfig, SchedulerPoolConfig,
    };
    use crate::events::NoopSink;
    use crate::jobs::{JobError, JobResult, OneTimeJob};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    struct CountingJob {
        identity: JobIdentity,
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn external_id(&self) -> &str {
            &self.identity.external_id
        }

        fn name(&self) -> &str {
            &self.identity.name
        }

        async fn run(&self) -> JobResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(JobError::transient("simulated failure"))
            } else {
                Ok(())
            }
        }
    }

    impl OneTimeJob for CountingJob {}

    struct CountingTicker {
        identity: JobIdentity,
        runs: Arc<AtomicUsize>,
        interval: Duration,
    }

    #[async_trait]
    impl Job for CountingTicker {
        fn external_id(&self) -> &str {
            &self.identity.external_id
        }

        fn name(&self) -> &str {
            &self.identity.name
        }

        async fn run(&self) -> JobResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl RepetitiveJob for CountingTicker {
        fn interval(&self) -> Duration {
            self.interval
        }
    }

    struct Harness {
        dispatcher: Arc<Dispatcher>,
        store: Arc<MemoryStore>,
        one_time_runs: Arc<AtomicUsize>,
        tick_runs: Arc<AtomicUsize>,
    }

    fn harness() -> Harness {
        let registry = Arc::new(JobRegistry::new());
        let one_time_runs = Arc::new(AtomicUsize::new(0));
        let tick_runs = Arc::new(AtomicUsize::new(0));

        let runs = Arc::clone(&one_time_runs);
        registry.register_one_time("count", move |identity| CountingJob {
            identity,
            runs: Arc::clone(&runs),
            fail: false,
        });
        let runs = Arc::clone(&one_time_runs);
        registry.register_one_time("explode", move |identity| CountingJob {
            identity,
            runs: Arc::clone(&runs),
            fail: true,
        });
        let runs = Arc::clone(&tick_runs);
        registry.register_repetitive("tick", move |identity| CountingTicker {
            identity,
            runs: Arc::clone(&runs),
            interval: Duration::from_millis(30),
        });

        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let retry_config = RetryConfig {
            initial_delay_ms: 20,
            max_delay_ms: 100,
            jitter_factor: 0.0,
            sweep_interval_ms: 25,
            ..RetryConfig::default()
        };
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            store.clone(),
            Arc::new(AdmissionController::new(AdmissionConfig {
                enabled: false,
                ..AdmissionConfig::default()
            })),
            Arc::new(GroupingEngine::new(GroupingConfig {
                default_buffer_ms: 40,
            })),
            Arc::new(RetryEngine::new(retry_config, store.clone())),
            Arc::new(OneTimePool::new(OneTimePoolConfig::default())),
            Arc::new(SchedulerPool::new(SchedulerPoolConfig::default())),
            Arc::new(NoopSink),
        ));

        Harness {
            dispatcher,
            store,
            one_time_runs,
            tick_runs,
        }
    }

    fn one_time(id: &str, job_type: &str) -> OneTimeSubmission {
        OneTimeSubmission {
            external_id: id.to_string(),
            job_name: format!("job-{}", id),
            job_type: job_type.to_string(),
            group_key: None,
            group_buffer_ms: None,
            priority: None,
        }
    }

    fn repetitive(id: &str) -> RepetitiveSubmission {
        RepetitiveSubmission {
            external_id: id.to_string(),
            job_name: format!("job-{}", id),
            job_type: "tick".to_string(),
            cron_expression: None,
            group_key: None,
            group_buffer_ms: None,
            priority: None,
        }
    }

    async fn wait_for_status(
        store: &MemoryStore,
        id: &str,
        status: crate::jobs::JobStatus,
    ) -> JobRecord {
        for _ in 0..200 {
            if let Some(record) = store.find_by_external_id(id).await.unwrap() {
                if record.status == status {
                    return record;
                }
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("record {} never reached {:?}", id, status);
    }

    #[tokio::test]
    async fn test_one_time_runs_to_completion() {
        let h = harness();
        let ctx = SubmissionContext::default();

        let record = h
            .dispatcher
            .submit_one_time(one_time("a", "count"), &ctx)
            .await
            .unwrap();
        assert_eq!(record.status, crate::jobs::JobStatus::Pending);

        let done = wait_for_status(&h.store, "a", crate::jobs::JobStatus::Completed).await;
        assert_eq!(h.one_time_runs.load(Ordering::SeqCst), 1);
        assert!(done.execution_time_ms.is_some());
        assert_eq!(h.dispatcher.stats().completed_runs, 1);
    }

    #[tokio::test]
    async fn test_unknown_type_is_rejected() {
        let h = harness();
        let ctx = SubmissionContext::default();

        let err = h
            .dispatcher
            .submit_one_time(one_time("a", "nope"), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobTypeUnknown);
        assert!(h.store.find_by_external_id("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_rejected() {
        let h = harness();
        let ctx = SubmissionContext::default();

        let err = h
            .dispatcher
            .submit_one_time(one_time("a", "tick"), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_blank_external_id_is_rejected() {
        let h = harness();
        let ctx = SubmissionContext::default();

        let err = h
            .dispatcher
            .submit_one_time(one_time("  ", "count"), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingRequiredField);
    }

    #[tokio::test]
    async fn test_failed_run_schedules_retry() {
        let h = harness();
        let ctx = SubmissionContext::default();

        h.dispatcher
            .submit_one_time(one_time("a", "explode"), &ctx)
            .await
            .unwrap();

        // The run fails, then the retry engine flips it back to PENDING.
        for _ in 0..200 {
            if let Some(record) = h.store.find_by_external_id("a").await.unwrap() {
                if record.retry_count > 0 {
                    assert_eq!(record.status, crate::jobs::JobStatus::Pending);
                    assert!(record.next_retry_at.is_some());
                    return;
                }
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("retry never scheduled");
    }

    #[tokio::test]
    async fn test_repetitive_ticks_and_cancel() {
        let h = harness();
        let ctx = SubmissionContext::default();

        h.dispatcher
            .submit_repetitive(repetitive("r"), &ctx)
            .await
            .unwrap();
        assert!(h.dispatcher.is_scheduled("r"));
        assert_eq!(h.dispatcher.active_schedules(), 1);

        sleep(Duration::from_millis(100)).await;
        assert!(h.tick_runs.load(Ordering::SeqCst) >= 2);

        let cancelled = h.dispatcher.cancel_repetitive("r").await.unwrap();
        assert_eq!(cancelled.status, crate::jobs::JobStatus::Cancelled);
        assert!(!h.dispatcher.is_scheduled("r"));

        let after = h.tick_runs.load(Ordering::SeqCst);
        sleep(Duration::from_millis(100)).await;
        // One in-flight tick may still land; the schedule itself is dead.
        assert!(h.tick_runs.load(Ordering::SeqCst) <= after + 1);
    }

    #[tokio::test]
    async fn test_schedule_conflict_rejected() {
        let h = harness();
        let ctx = SubmissionContext::default();

        h.dispatcher
            .submit_repetitive(repetitive("r"), &ctx)
            .await
            .unwrap();
        let err = h
            .dispatcher
            .submit_repetitive(repetitive("r"), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ScheduleConflict);

        // Cancelling frees the id for resubmission.
        h.dispatcher.cancel_repetitive("r").await.unwrap();
        h.dispatcher
            .submit_repetitive(repetitive("r"), &ctx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_not_found() {
        let h = harness();
        let err = h.dispatcher.cancel_repetitive("ghost").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobNotFound);
    }

    #[tokio::test]
    async fn test_cron_requires_expression() {
        let h = harness();
        let ctx = SubmissionContext::default();

        let registry = JobRegistry::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        registry.register_repetitive("cron-job", move |identity| CronTicker {
            identity,
            runs: Arc::clone(&counter),
        });
        // A cron job without an expression is a synchronous rejection.
        let mut submission = repetitive("c");
        submission.job_type = "cron-job".to_string();

        // Swap in a harness whose registry knows the cron job.
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(registry),
            store.clone(),
            Arc::new(AdmissionController::new(AdmissionConfig {
                enabled: false,
                ..AdmissionConfig::default()
            })),
            Arc::new(GroupingEngine::new(GroupingConfig::default())),
            Arc::new(RetryEngine::new(RetryConfig::default(), store.clone())),
            Arc::new(OneTimePool::new(OneTimePoolConfig::default())),
            Arc::new(SchedulerPool::new(SchedulerPoolConfig::default())),
            Arc::new(NoopSink),
        ));

        let err = dispatcher
            .submit_repetitive(submission.clone(), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingRequiredField);

        submission.cron_expression = Some("not a cron".to_string());
        let err = dispatcher
            .submit_repetitive(submission.clone(), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCronExpression);

        submission.cron_expression = Some("0 * * * * *".to_string());
        dispatcher.submit_repetitive(submission, &ctx).await.unwrap();
        assert!(dispatcher.is_scheduled("c"));
        let _ = h;
    }

    struct CronTicker {
        identity: JobIdentity,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Job for CronTicker {
        fn external_id(&self) -> &str {
            &self.identity.external_id
        }

        fn name(&self) -> &str {
            &self.identity.name
        }

        async fn run(&self) -> JobResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl RepetitiveJob for CronTicker {
        fn interval(&self) -> Duration {
            Duration::ZERO
        }

        fn mode(&self) -> RepetitionMode {
            RepetitionMode::Cron
        }
    }

    #[tokio::test]
    async fn test_grouped_submissions_run_one_representative() {
        let h = harness();
        let ctx = SubmissionContext::default();

        for i in 0..4 {
            let mut submission = one_time(&format!("g{}", i), "count");
            submission.group_key = Some("reports".to_string());
            submission.group_buffer_ms = Some(40);
            h.dispatcher.submit_one_time(submission, &ctx).await.unwrap();
        }

        wait_for_status(&h.store, "g0", crate::jobs::JobStatus::Completed).await;
        sleep(Duration::from_millis(60)).await;
        // One representative ran for the whole buffer.
        assert_eq!(h.one_time_runs.load(Ordering::SeqCst), 1);
        assert_eq!(h.dispatcher.stats().grouped_buffered, 4);
    }

    #[tokio::test]
    async fn test_retry_sweep_redispatches() {
        let h = harness();
        let ctx = SubmissionContext::default();

        h.dispatcher
            .submit_one_time(one_time("a", "explode"), &ctx)
            .await
            .unwrap();

        // First run fails and stamps a retry due ~20ms later.
        for _ in 0..200 {
            if h.store
                .find_by_external_id("a")
                .await
                .unwrap()
                .is_some_and(|r| r.retry_count > 0)
            {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }

        sleep(Duration::from_millis(40)).await;
        h.dispatcher.sweep_due_retries().await;

        for _ in 0..200 {
            if h.one_time_runs.load(Ordering::SeqCst) >= 2 {
                assert!(h.dispatcher.stats().retry_redispatches >= 1);
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("retry was never redispatched");
    }
}
