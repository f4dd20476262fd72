//! Job definitions and traits.
//!
//! This module provides the core abstractions for defining dispatchable jobs:
//!
//! - **Job trait**: Identity and execution, shared by both job kinds
//! - **OneTimeJob / RepetitiveJob**: The two submission kinds
//! - **RepetitionMode**: How a repetitive job's ticks are spaced
//! - **JobError**: Execution failure with a kind used for retry classification

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ForemanError;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Kind
// ═══════════════════════════════════════════════════════════════════════════════

/// The two kinds of job the dispatcher accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    /// Runs exactly once, then reaches a terminal state
    OneTime,
    /// Runs on a schedule until cancelled
    Repetitive,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneTime => write!(f, "one_time"),
            Self::Repetitive => write!(f, "repetitive"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Repetition Mode
// ═══════════════════════════════════════════════════════════════════════════════

/// Spacing policy for repetitive job ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepetitionMode {
    /// Next tick starts `interval` after the previous tick finished
    FixedDelay,
    /// Ticks stay on the interval grid; slow ticks may overlap the next one
    FixedRate,
    /// Next tick at the first cron occurrence after the previous tick finished
    Cron,
}

impl RepetitionMode {
    /// Parse a stored mode name. Returns `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "FIXED_DELAY" => Some(Self::FixedDelay),
            "FIXED_RATE" => Some(Self::FixedRate),
            "CRON" => Some(Self::Cron),
            _ => None,
        }
    }

    /// The stable name stored in job records.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FixedDelay => "FIXED_DELAY",
            Self::FixedRate => "FIXED_RATE",
            Self::Cron => "CRON",
        }
    }
}

impl Default for RepetitionMode {
    fn default() -> Self {
        Self::FixedDelay
    }
}

impl fmt::Display for RepetitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Priority
// ═══════════════════════════════════════════════════════════════════════════════

/// Priority recorded on submissions. Level 1 is the most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPriority {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

impl JobPriority {
    /// Numeric level, 1 (critical) through 5 (background).
    pub const fn level(&self) -> u8 {
        match self {
            Self::Critical => 1,
            Self::High => 2,
            Self::Normal => 3,
            Self::Low => 4,
            Self::Background => 5,
        }
    }

    /// Look up by numeric level; unknown levels resolve to `Normal`.
    pub fn from_level(level: u8) -> Self {
        match level {
            1 => Self::Critical,
            2 => Self::High,
            3 => Self::Normal,
            4 => Self::Low,
            5 => Self::Background,
            _ => Self::Normal,
        }
    }

    /// Look up by name, case-insensitive; unknown names resolve to `Normal`.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "CRITICAL" => Self::Critical,
            "HIGH" => Self::High,
            "NORMAL" => Self::Normal,
            "LOW" => Self::Low,
            "BACKGROUND" => Self::Background,
            _ => Self::Normal,
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
            Self::Background => write!(f, "background"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for job execution failures.
///
/// The `kind` string feeds retry classification: kinds listed as
/// non-retryable in the retry configuration are never retried, listed
/// retryable kinds are, and unknown kinds default to retryable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// Classification kind ("runtime", "validation", "security", ...)
    pub kind: String,
    /// Error message
    pub message: String,
}

impl JobError {
    /// Create an error with an explicit kind.
    pub fn with_kind(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create a generic runtime error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::with_kind("runtime", message)
    }

    /// Create a transient error (always worth retrying).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::with_kind("transient", message)
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_kind("timeout", message)
    }

    /// Create an I/O error.
    pub fn io(message: impl Into<String>) -> Self {
        Self::with_kind("io", message)
    }

    /// Create a validation error (never retried under stock config).
    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_kind("validation", message)
    }

    /// Create a security error (never retried under stock config).
    pub fn security(message: impl Into<String>) -> Self {
        Self::with_kind("security", message)
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for JobError {}

impl From<ForemanError> for JobError {
    fn from(error: ForemanError) -> Self {
        let kind = match error.code().category() {
            "validation" => "validation",
            _ => "runtime",
        };
        Self::with_kind(kind, error.user_message().to_string())
    }
}

/// Result type for job execution.
pub type JobResult = std::result::Result<(), JobError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identity
// ═══════════════════════════════════════════════════════════════════════════════

/// Caller-assigned identity injected into instantiated jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobIdentity {
    /// External id, unique per submission
    pub external_id: String,
    /// Human-readable name
    pub name: String,
}

impl JobIdentity {
    pub fn new(external_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            name: name.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Traits
// ═══════════════════════════════════════════════════════════════════════════════

/// Identity and execution, shared by both job kinds.
#[async_trait]
pub trait Job: Send + Sync {
    /// Caller-assigned external id.
    fn external_id(&self) -> &str;

    /// Human-readable job name.
    fn name(&self) -> &str;

    /// Execute one run of the job.
    ///
    /// # Errors
    ///
    /// Return a `JobError` whose kind drives retry classification.
    async fn run(&self) -> JobResult;

    /// Priority recorded with the job.
    fn priority(&self) -> JobPriority {
        JobPriority::Normal
    }
}

/// A job that runs exactly once.
pub trait OneTimeJob: Job {}

impl fmt::Debug for dyn OneTimeJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneTimeJob")
            .field("external_id", &self.external_id())
            .field("name", &self.name())
            .finish()
    }
}

/// A job that runs on a schedule until cancelled.
pub trait RepetitiveJob: Job {
    /// Spacing between ticks for the interval modes.
    fn interval(&self) -> Duration;

    /// Delay before the first tick.
    fn initial_delay(&self) -> Duration {
        Duration::ZERO
    }

    /// Tick spacing policy.
    fn mode(&self) -> RepetitionMode {
        RepetitionMode::FixedDelay
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_display() {
        assert_eq!(JobKind::OneTime.to_string(), "one_time");
        assert_eq!(JobKind::Repetitive.to_string(), "repetitive");
    }

    #[test]
    fn test_repetition_mode_names() {
        assert_eq!(RepetitionMode::from_name("FIXED_DELAY"), Some(RepetitionMode::FixedDelay));
        assert_eq!(RepetitionMode::from_name("FIXED_RATE"), Some(RepetitionMode::FixedRate));
        assert_eq!(RepetitionMode::from_name("CRON"), Some(RepetitionMode::Cron));
        assert_eq!(RepetitionMode::from_name("EVERY_FULL_MOON"), None);
        assert_eq!(RepetitionMode::FixedRate.name(), "FIXED_RATE");
    }

    #[test]
    fn test_priority_levels() {
        assert_eq!(JobPriority::Critical.level(), 1);
        assert_eq!(JobPriority::Background.level(), 5);
        assert_eq!(JobPriority::from_level(2), JobPriority::High);
        assert_eq!(JobPriority::from_level(42), JobPriority::Normal);
        assert_eq!(JobPriority::from_name("critical"), JobPriority::Critical);
        assert_eq!(JobPriority::from_name("whatever"), JobPriority::Normal);
    }

    #[test]
    fn test_job_error_kinds() {
        assert_eq!(JobError::runtime("boom").kind, "runtime");
        assert_eq!(JobError::validation("bad input").kind, "validation");
        assert_eq!(JobError::security("denied").kind, "security");
        assert_eq!(JobError::with_kind("custom", "x").kind, "custom");
    }

    #[test]
    fn test_job_error_display() {
        let error = JobError::timeout("tick exceeded 30s");
        assert_eq!(error.to_string(), "timeout: tick exceeded 30s");
    }

    #[test]
    fn test_job_error_from_foreman_error() {
        let error: JobError = ForemanError::validation("missing field").into();
        assert_eq!(error.kind, "validation");

        let error: JobError = ForemanError::internal("oops").into();
        assert_eq!(error.kind, "runtime");
    }
}
