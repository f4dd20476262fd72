//! Retry engine.
//!
//! Decides, after a failed run, whether and when a job runs again.
//! Scheduling never executes anything: it flips the record FAILED ->
//! PENDING, stamps `next_retry_at`, and persists once. The dispatcher's
//! sweep finds due records and redispatches them through the normal path.
//!
//! Backoff ladder, before jitter: `initial * multiplier^n` for the n-th
//! retry counted from zero, clamped at the configured ceiling. With the
//! defaults that reads 1000, 2000, 4000, 8000 ms. Jitter then spreads the
//! result by the configured fraction either way.
//!
//! Guard order for scheduling: master/record enable switches, then error
//! classification, then the attempt ceiling. Classification is by error
//! kind string; the non-retryable list wins over the retryable list and
//! unknown kinds are retried.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use rand::Rng;
use serde::Serialize;

use crate::config::RetryConfig;
use crate::error::{ForemanError, Result};
use crate::jobs::{JobError, JobKind, JobRecord, JobStatus};
use crate::store::JobStore;

// ═══════════════════════════════════════════════════════════════════════════════
// Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolved backoff parameters for one record.
///
/// Per-record overrides beat the engine configuration; the attempt ceiling
/// always comes from the record itself.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl RetryPolicy {
    /// Raw backoff for the n-th retry (zero-based), clamped, no jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let raw = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_delay_ms as f64);
        capped.max(0.0) as u64
    }

    /// Backoff with jitter applied, never below zero.
    pub fn jittered_delay_for_attempt(&self, attempt: u32) -> u64 {
        let raw = self.delay_for_attempt(attempt) as f64;
        let spread: f64 = rand::thread_rng().gen();
        let factor = 1.0 + (spread - 0.5) * 2.0 * self.jitter_factor;
        (raw * factor).max(0.0) as u64
    }
}

/// What `schedule_retry` decided.
#[derive(Debug)]
pub enum RetryDisposition {
    /// Retry scheduled; the record is already saved
    Scheduled { record: JobRecord, delay_ms: u64 },
    /// Retries switched off globally or on the record
    Disabled,
    /// The error kind is classified non-retryable
    NotRetryable,
    /// Attempt ceiling reached, or the record is not in FAILED
    Exhausted,
}

/// Retry statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RetryStats {
    pub retry_enabled: bool,
    pub total_jobs: u64,
    pub failed_jobs: u64,
    /// FAILED records still below their attempt ceiling
    pub retryable_jobs: u64,
    /// PENDING records holding a scheduled retry
    pub retry_scheduled_jobs: u64,
    /// completed / (completed + failed), percent, two decimals
    pub success_rate: f64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════════

/// Retry decision-making over the record store.
pub struct RetryEngine {
    config: RetryConfig,
    store: Arc<dyn JobStore>,
}

impl RetryEngine {
    pub fn new(config: RetryConfig, store: Arc<dyn JobStore>) -> Self {
        Self { config, store }
    }

    /// Whether the engine schedules anything at all.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Sweep cadence for the dispatcher's retry loop.
    pub fn sweep_interval_ms(&self) -> u64 {
        self.config.sweep_interval_ms
    }

    /// Enabled switch and attempt ceiling for records of `kind`.
    ///
    /// Applied at submission time when records are created.
    pub fn defaults_for(&self, kind: JobKind) -> (bool, u32) {
        let overrides = match kind {
            JobKind::OneTime => &self.config.one_time,
            JobKind::Repetitive => &self.config.repetitive,
        };
        (
            overrides.enabled.unwrap_or(self.config.enabled),
            overrides.max_attempts.unwrap_or(self.config.max_attempts),
        )
    }

    /// Resolve the backoff policy for a record.
    pub fn policy_for(&self, record: &JobRecord) -> RetryPolicy {
        RetryPolicy {
            max_attempts: record.max_retry_attempts,
            initial_delay_ms: record.retry_delay_ms.unwrap_or(self.config.initial_delay_ms),
            multiplier: record
                .retry_multiplier
                .unwrap_or(self.config.backoff_multiplier),
            max_delay_ms: record.retry_max_delay_ms.unwrap_or(self.config.max_delay_ms),
            jitter_factor: self.config.jitter_factor,
        }
    }

    /// Classify an error kind. The non-retryable list wins; kinds on
    /// neither list are retried.
    pub fn is_retryable(&self, error: &JobError) -> bool {
        let kind = error.kind.as_str();
        if self
            .config
            .non_retryable_kinds
            .iter()
            .any(|k| k.eq_ignore_ascii_case(kind))
        {
            return false;
        }
        if self
            .config
            .retryable_kinds
            .iter()
            .any(|k| k.eq_ignore_ascii_case(kind))
        {
            return true;
        }
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scheduling
    // ─────────────────────────────────────────────────────────────────────────

    /// Schedule a retry for a freshly failed record.
    ///
    /// On success the record has been flipped back to PENDING with
    /// `next_retry_at` stamped and is persisted in one save.
    pub async fn schedule_retry(
        &self,
        external_id: &str,
        error: &JobError,
    ) -> Result<RetryDisposition> {
        let mut record = self
            .store
            .find_by_external_id(external_id)
            .await?
            .ok_or_else(|| ForemanError::job_not_found(external_id))?;

        if !self.config.enabled || !record.retry_enabled {
            tracing::debug!(external_id, "Retries disabled, not scheduling");
            return Ok(RetryDisposition::Disabled);
        }

        if !self.is_retryable(error) {
            tracing::info!(
                external_id,
                error_kind = %error.kind,
                "Error kind is non-retryable, not scheduling"
            );
            return Ok(RetryDisposition::NotRetryable);
        }

        if !record.can_retry() {
            tracing::warn!(
                external_id,
                retry_count = record.retry_count,
                max_attempts = record.max_retry_attempts,
                "Retry attempts exhausted"
            );
            return Ok(RetryDisposition::Exhausted);
        }

        // Backoff for this attempt is computed before the counter moves,
        // so the first retry waits the full initial delay.
        let policy = self.policy_for(&record);
        let delay_ms = policy.jittered_delay_for_attempt(record.retry_count);

        record.increment_retry_count()?;
        record.schedule_next_retry(delay_ms);
        record.retry_reason = Some(error.message.clone());
        self.store.save(&record).await?;

        counter!("foreman_retries_scheduled_total", "job_type" => record.job_type.clone())
            .increment(1);
        tracing::info!(
            external_id,
            attempt = record.retry_count,
            max_attempts = record.max_retry_attempts,
            delay_ms,
            "Retry scheduled"
        );

        Ok(RetryDisposition::Scheduled { record, delay_ms })
    }

    /// Records whose scheduled retry is due now.
    pub async fn due_retries(&self) -> Result<Vec<JobRecord>> {
        let eligible = self.store.find_retry_eligible().await?;
        Ok(eligible
            .into_iter()
            .filter(|record| record.is_retry_due())
            .collect())
    }

    /// Claim a due retry for redispatch.
    ///
    /// Clears `next_retry_at` and persists, so a second sweep cannot pick
    /// the same record up again. Returns `None` when the record is gone or
    /// its retry is not due.
    pub async fn begin_redispatch(&self, external_id: &str) -> Result<Option<JobRecord>> {
        let Some(mut record) = self.store.find_by_external_id(external_id).await? else {
            tracing::warn!(external_id, "Record vanished before retry redispatch");
            return Ok(None);
        };

        if !record.is_retry_due() {
            tracing::warn!(external_id, "Retry no longer due, skipping redispatch");
            return Ok(None);
        }

        record.next_retry_at = None;
        record.touch();
        self.store.save(&record).await?;
        Ok(Some(record))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Manual Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Force a retry of a FAILED record, due immediately.
    ///
    /// Skips error classification; the caller asked explicitly. The
    /// attempt ceiling still applies.
    pub async fn trigger_retry(&self, external_id: &str) -> Result<JobRecord> {
        let mut record = self
            .store
            .find_by_external_id(external_id)
            .await?
            .ok_or_else(|| ForemanError::job_not_found(external_id))?;

        if record.status != JobStatus::Failed {
            return Err(ForemanError::validation(format!(
                "Job '{}' is {:?}; only FAILED jobs can be retried",
                external_id, record.status
            )));
        }
        if !record.can_retry() {
            return Err(ForemanError::validation(format!(
                "Job '{}' has exhausted its {} retry attempts",
                external_id, record.max_retry_attempts
            )));
        }

        record.increment_retry_count()?;
        record.schedule_next_retry(0);
        record.retry_reason = Some("manual retry".to_string());
        self.store.save(&record).await?;

        counter!("foreman_retries_scheduled_total", "job_type" => record.job_type.clone())
            .increment(1);
        tracing::info!(external_id, attempt = record.retry_count, "Manual retry scheduled");
        Ok(record)
    }

    /// Drop any scheduled retry and switch retries off for the record.
    pub async fn cancel_retries(&self, external_id: &str) -> Result<JobRecord> {
        let mut record = self
            .store
            .find_by_external_id(external_id)
            .await?
            .ok_or_else(|| ForemanError::job_not_found(external_id))?;

        record.next_retry_at = None;
        record.retry_enabled = false;
        record.touch();
        self.store.save(&record).await?;

        tracing::info!(external_id, "Retries cancelled");
        Ok(record)
    }

    /// Zero the attempt counter and clear retry bookkeeping.
    pub async fn reset_retry_count(&self, external_id: &str) -> Result<JobRecord> {
        let mut record = self
            .store
            .find_by_external_id(external_id)
            .await?
            .ok_or_else(|| ForemanError::job_not_found(external_id))?;

        record.retry_count = 0;
        record.next_retry_at = None;
        record.last_retry_at = None;
        record.retry_reason = None;
        record.touch();
        self.store.save(&record).await?;

        tracing::info!(external_id, "Retry counter reset");
        Ok(record)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statistics
    // ─────────────────────────────────────────────────────────────────────────

    /// Aggregate retry posture across the store.
    pub async fn stats(&self) -> Result<RetryStats> {
        let store_stats = self.store.stats().await?;

        let retryable_jobs = self
            .store
            .find_by_status(JobStatus::Failed)
            .await?
            .iter()
            .filter(|record| record.can_retry())
            .count() as u64;

        let retry_scheduled_jobs = self
            .store
            .find_by_status(JobStatus::Pending)
            .await?
            .iter()
            .filter(|record| record.next_retry_at.is_some())
            .count() as u64;

        let finished = store_stats.completed_jobs + store_stats.failed_jobs;
        let success_rate = if finished == 0 {
            0.0
        } else {
            let rate = store_stats.completed_jobs as f64 / finished as f64 * 100.0;
            (rate * 100.0).round() / 100.0
        };

        Ok(RetryStats {
            retry_enabled: self.config.enabled,
            total_jobs: store_stats.total_jobs,
            failed_jobs: store_stats.failed_jobs,
            retryable_jobs,
            retry_scheduled_jobs,
            success_rate,
        })
    }
}
