//! Persistent job records and the status state machine.
//!
//! A `JobRecord` is the bookkeeping row for one submission: identity,
//! grouping and schedule parameters, execution timestamps, and retry state.
//! Records for one-time jobs walk the state machine once; records for
//! repetitive jobs cycle through the run states on every tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{ForemanError, Result};
use crate::jobs::job::{JobKind, JobPriority, RepetitionMode};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted, waiting to run (also the post-retry re-queue state)
    Pending,
    /// Currently executing
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error; may go back to Pending via retry
    Failed,
    /// Cancelled; terminal for both kinds
    Cancelled,
}

impl JobStatus {
    /// Check if the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Legal single-shot transitions.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Failed, Pending)
                | (Pending, Cancelled)
                | (Running, Cancelled)
        )
    }

    /// Parse a stored status name. Returns `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// The stable name stored in records and returned by the API.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Record
// ═══════════════════════════════════════════════════════════════════════════════

/// Bookkeeping record for one job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Internal record id
    pub id: Uuid,
    /// Caller-assigned external id, unique per submission
    pub external_id: String,
    /// Human-readable name
    pub job_name: String,
    /// Registered type name the job was instantiated from
    pub job_type: String,
    /// Submission kind
    pub kind: JobKind,

    /// Grouping key, when the submission opted into grouping
    pub group_key: Option<String>,
    /// Whether the submission opted into grouping
    pub can_group: bool,
    /// Buffer window used for the group this record joined
    pub group_buffer_ms: Option<u64>,

    /// Tick interval for repetitive jobs
    pub interval_ms: Option<u64>,
    /// Delay before the first tick
    pub initial_delay_ms: Option<u64>,
    /// Tick spacing policy for repetitive jobs
    pub repetition_mode: Option<RepetitionMode>,
    /// Cron expression, used when the mode is CRON
    pub cron_expression: Option<String>,

    /// Lifecycle status
    pub status: JobStatus,
    /// Priority recorded with the submission
    pub priority: JobPriority,
    /// Pool that owns execution for this record
    pub pool_name: String,

    /// When the submission was accepted
    pub submitted_at: DateTime<Utc>,
    /// When the most recent run started
    pub started_at: Option<DateTime<Utc>>,
    /// When the most recent run finished
    pub completed_at: Option<DateTime<Utc>>,
    /// Duration of the most recent run
    pub execution_time_ms: Option<u64>,
    /// Error message from the most recent failed run
    pub error_message: Option<String>,

    /// Whether this record participates in retries
    pub retry_enabled: bool,
    /// Attempt ceiling for this record
    pub max_retry_attempts: u32,
    /// Retries consumed so far
    pub retry_count: u32,
    /// Per-record initial delay override
    pub retry_delay_ms: Option<u64>,
    /// Per-record backoff multiplier override
    pub retry_multiplier: Option<f64>,
    /// Per-record backoff ceiling override
    pub retry_max_delay_ms: Option<u64>,
    /// When the last retry was scheduled
    pub last_retry_at: Option<DateTime<Utc>>,
    /// When the next retry becomes due
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Why the last retry was scheduled
    pub retry_reason: Option<String>,

    /// When this record was created
    pub created_at: DateTime<Utc>,
    /// When this record was last modified
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a record for a fresh submission.
    pub fn new(
        external_id: impl Into<String>,
        job_name: impl Into<String>,
        job_type: impl Into<String>,
        kind: JobKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            external_id: external_id.into(),
            job_name: job_name.into(),
            job_type: job_type.into(),
            kind,
            group_key: None,
            can_group: false,
            group_buffer_ms: None,
            interval_ms: None,
            initial_delay_ms: None,
            repetition_mode: None,
            cron_expression: None,
            status: JobStatus::Pending,
            priority: JobPriority::Normal,
            pool_name: match kind {
                JobKind::OneTime => "one-time".to_string(),
                JobKind::Repetitive => "scheduler".to_string(),
            },
            submitted_at: now,
            started_at: None,
            completed_at: None,
            execution_time_ms: None,
            error_message: None,
            retry_enabled: true,
            max_retry_attempts: 3,
            retry_count: 0,
            retry_delay_ms: None,
            retry_multiplier: None,
            retry_max_delay_ms: None,
            last_retry_at: None,
            next_retry_at: None,
            retry_reason: None,
            created_at: now,
            updated_at: None,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Record the grouping parameters the submission carried.
    pub fn with_grouping(mut self, group_key: impl Into<String>, buffer_ms: u64) -> Self {
        self.group_key = Some(group_key.into());
        self.can_group = true;
        self.group_buffer_ms = Some(buffer_ms);
        self
    }

    /// Record the schedule for a repetitive submission.
    pub fn with_schedule(
        mut self,
        interval_ms: u64,
        initial_delay_ms: u64,
        mode: RepetitionMode,
    ) -> Self {
        self.interval_ms = Some(interval_ms);
        self.initial_delay_ms = Some(initial_delay_ms);
        self.repetition_mode = Some(mode);
        self
    }

    /// Record the cron expression for a CRON-mode submission.
    pub fn with_cron(mut self, expression: impl Into<String>) -> Self {
        self.cron_expression = Some(expression.into());
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State Transitions
    // ─────────────────────────────────────────────────────────────────────────

    /// Mark as started.
    pub fn mark_started(&mut self) -> Result<()> {
        self.guard(JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Mark as completed. Uses the measured duration when given, otherwise
    /// derives it from `started_at`.
    pub fn mark_completed(&mut self, execution_time_ms: Option<u64>) -> Result<()> {
        self.guard(JobStatus::Completed)?;
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.execution_time_ms = execution_time_ms.or_else(|| {
            self.started_at
                .map(|s| (now - s).num_milliseconds().max(0) as u64)
        });
        self.touch();
        Ok(())
    }

    /// Mark as failed with the error from the run.
    pub fn mark_failed(&mut self, error_message: impl Into<String>) -> Result<()> {
        self.guard(JobStatus::Failed)?;
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.completed_at = Some(now);
        self.error_message = Some(error_message.into());
        if self.execution_time_ms.is_none() {
            self.execution_time_ms = self
                .started_at
                .map(|s| (now - s).num_milliseconds().max(0) as u64);
        }
        self.touch();
        Ok(())
    }

    /// Mark as cancelled. Terminal for both kinds.
    pub fn mark_cancelled(&mut self) -> Result<()> {
        self.guard(JobStatus::Cancelled)?;
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Repetitive records cycle through the run states once per tick, and
    /// may be cancelled from any of them; one-time records walk the state
    /// machine exactly once. Cancelled stays terminal for both.
    fn guard(&self, next: JobStatus) -> Result<()> {
        if self.kind == JobKind::Repetitive && !matches!(self.status, JobStatus::Cancelled) {
            return Ok(());
        }
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(ForemanError::invalid_state_transition(&self.status, &next))
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retry Bookkeeping
    // ─────────────────────────────────────────────────────────────────────────

    /// Check whether another retry may be scheduled for this record.
    pub fn can_retry(&self) -> bool {
        self.retry_enabled
            && self.retry_count < self.max_retry_attempts
            && self.status == JobStatus::Failed
    }

    /// Consume one retry: re-queue the record and clear the last run.
    pub fn increment_retry_count(&mut self) -> Result<()> {
        self.guard(JobStatus::Pending)?;
        self.retry_count += 1;
        self.status = JobStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.error_message = None;
        self.last_retry_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Stamp when the next retry becomes due.
    pub fn schedule_next_retry(&mut self, delay_ms: u64) {
        self.next_retry_at = Some(Utc::now() + chrono::Duration::milliseconds(delay_ms as i64));
        self.touch();
    }

    /// A retry is stamped but not yet due.
    pub fn is_retry_scheduled(&self) -> bool {
        self.next_retry_at.is_some_and(|at| at > Utc::now())
    }

    /// A stamped retry has come due.
    pub fn is_retry_due(&self) -> bool {
        self.next_retry_at.is_some_and(|at| at <= Utc::now())
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn one_time_record() -> JobRecord {
        JobRecord::new("job-1", "Test Job", "TestJob", JobKind::OneTime)
    }

    fn repetitive_record() -> JobRecord {
        JobRecord::new("rep-1", "Repeating Job", "TickJob", JobKind::Repetitive)
            .with_schedule(1_000, 0, RepetitionMode::FixedDelay)
    }

    #[test]
    fn test_status_names() {
        assert_eq!(JobStatus::from_name("COMPLETED"), Some(JobStatus::Completed));
        assert_eq!(JobStatus::from_name("running"), Some(JobStatus::Running));
        assert_eq!(JobStatus::from_name("EXPLODED"), None);
        assert_eq!(JobStatus::Failed.name(), "FAILED");
    }

    #[test]
    fn test_one_time_lifecycle() {
        let mut record = one_time_record();
        assert_eq!(record.status, JobStatus::Pending);

        record.mark_started().unwrap();
        assert_eq!(record.status, JobStatus::Running);
        assert!(record.started_at.is_some());

        record.mark_completed(Some(42)).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.execution_time_ms, Some(42));
        assert!(record.status.is_terminal());
    }

    #[test]
    fn test_one_time_transitions_are_monotonic() {
        let mut record = one_time_record();
        record.mark_started().unwrap();
        record.mark_completed(None).unwrap();

        // Completed one-time records cannot run or fail again.
        assert!(record.mark_started().is_err());
        assert!(record.mark_failed("late failure").is_err());
        assert!(record.mark_cancelled().is_err());
    }

    #[test]
    fn test_failure_then_retry_requeues() {
        let mut record = one_time_record();
        record.mark_started().unwrap();
        record.mark_failed("boom").unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.can_retry());

        record.increment_retry_count().unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.retry_count, 1);
        assert!(record.started_at.is_none());
        assert!(record.error_message.is_none());
        assert!(record.last_retry_at.is_some());
    }

    #[test]
    fn test_can_retry_ceiling() {
        let mut record = one_time_record();
        record.max_retry_attempts = 2;

        for _ in 0..2 {
            record.mark_started().unwrap();
            record.mark_failed("boom").unwrap();
            assert!(record.can_retry());
            record.increment_retry_count().unwrap();
        }

        record.mark_started().unwrap();
        record.mark_failed("boom").unwrap();
        assert!(!record.can_retry());

        record.retry_enabled = false;
        assert!(!record.can_retry());
    }

    #[test]
    fn test_retry_due_and_scheduled() {
        let mut record = one_time_record();
        assert!(!record.is_retry_due());
        assert!(!record.is_retry_scheduled());

        record.schedule_next_retry(60_000);
        assert!(record.is_retry_scheduled());
        assert!(!record.is_retry_due());

        record.next_retry_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(record.is_retry_due());
        assert!(!record.is_retry_scheduled());
    }

    #[test]
    fn test_repetitive_records_cycle() {
        let mut record = repetitive_record();
        record.mark_started().unwrap();
        record.mark_completed(None).unwrap();

        // Next tick re-runs the record.
        record.mark_started().unwrap();
        assert_eq!(record.status, JobStatus::Running);
        record.mark_failed("tick failed").unwrap();

        // And the one after recovers.
        record.mark_started().unwrap();
        record.mark_completed(None).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[test]
    fn test_cancelled_is_terminal_for_repetitive() {
        let mut record = repetitive_record();
        record.mark_started().unwrap();
        record.mark_cancelled().unwrap();

        // A straggling tick cannot resurrect the record.
        assert!(record.mark_started().is_err());
        assert!(record.mark_completed(None).is_err());
        assert_eq!(record.status, JobStatus::Cancelled);
    }

    #[test]
    fn test_repetitive_cancel_between_ticks() {
        // The last tick finished; cancelling the schedule still lands.
        let mut record = repetitive_record();
        record.mark_started().unwrap();
        record.mark_completed(None).unwrap();

        record.mark_cancelled().unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
    }

    #[test]
    fn test_cancel_from_pending() {
        let mut record = one_time_record();
        record.mark_cancelled().unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert!(record.mark_started().is_err());
    }

    #[test]
    fn test_record_round_trip() {
        let record = repetitive_record()
            .with_grouping("reports", 5_000)
            .with_cron("0 0 * * * *")
            .with_priority(JobPriority::High);

        let json = serde_json::to_string(&record).unwrap();
        let back: JobRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(back.external_id, record.external_id);
        assert_eq!(back.kind, JobKind::Repetitive);
        assert_eq!(back.repetition_mode, Some(RepetitionMode::FixedDelay));
        assert_eq!(back.group_key.as_deref(), Some("reports"));
        assert_eq!(back.cron_expression.as_deref(), Some("0 0 * * * *"));
        assert_eq!(back.priority, JobPriority::High);
        assert_eq!(back.status, JobStatus::Pending);
        assert!(json.contains("\"PENDING\""));
        assert!(json.contains("\"REPETITIVE\""));
    }
}
