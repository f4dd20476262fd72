//! Error handling for Foreman Core.
//!
//! This module provides:
//! - Error types with context and chaining for the dispatch pipeline
//! - HTTP status code mapping for API responses
//! - Stable machine-readable error codes
//! - User-friendly messages vs detailed internal messages
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use foreman_core::error::{ForemanError, Result, ErrorContext};
//!
//! fn my_function() -> Result<()> {
//!     some_operation()
//!         .context("Failed to perform operation")
//!         .with_error_code(ErrorCode::InternalError)?;
//!     Ok(())
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Foreman operations.
pub type Result<T> = std::result::Result<T, ForemanError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Job Errors (1000-1099)
    JobNotFound,
    JobTypeUnknown,
    JobInstantiationFailed,
    InvalidStateTransition,
    ScheduleConflict,

    // Dispatch Errors (1100-1199)
    QueueFull,
    PoolShutdown,
    ExecutionFailed,

    // Admission Errors (1200-1299)
    AdmissionDenied,

    // Store Errors (2000-2099)
    StoreError,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,
    InvalidJson,

    // Validation Errors (4100-4199)
    ValidationError,
    InvalidInput,
    MissingRequiredField,
    InvalidCronExpression,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            // Job Errors
            Self::JobNotFound => 1000,
            Self::JobTypeUnknown => 1001,
            Self::JobInstantiationFailed => 1002,
            Self::InvalidStateTransition => 1003,
            Self::ScheduleConflict => 1004,

            // Dispatch Errors
            Self::QueueFull => 1100,
            Self::PoolShutdown => 1101,
            Self::ExecutionFailed => 1102,

            // Admission Errors
            Self::AdmissionDenied => 1200,

            // Store Errors
            Self::StoreError => 2000,

            // Serialization Errors
            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,
            Self::InvalidJson => 2202,

            // Validation Errors
            Self::ValidationError => 4100,
            Self::InvalidInput => 4101,
            Self::MissingRequiredField => 4102,
            Self::InvalidCronExpression => 4103,

            // Configuration Errors
            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            // Internal Errors
            Self::InternalError => 9000,
            Self::UnknownError => 9099,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            // Not Found (404)
            Self::JobNotFound => StatusCode::NOT_FOUND,

            // Conflict (409)
            Self::ScheduleConflict | Self::InvalidStateTransition => StatusCode::CONFLICT,

            // Unprocessable Entity (422)
            Self::JobTypeUnknown
            | Self::ValidationError
            | Self::InvalidInput
            | Self::MissingRequiredField
            | Self::InvalidCronExpression => StatusCode::UNPROCESSABLE_ENTITY,

            // Too Many Requests (429)
            Self::AdmissionDenied | Self::QueueFull => StatusCode::TOO_MANY_REQUESTS,

            // Service Unavailable (503)
            Self::PoolShutdown => StatusCode::SERVICE_UNAVAILABLE,

            // Internal Server Error (500)
            Self::JobInstantiationFailed
            | Self::ExecutionFailed
            | Self::StoreError
            | Self::SerializationError
            | Self::DeserializationError
            | Self::InvalidJson
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration
            | Self::InternalError
            | Self::UnknownError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable from the client's point of view.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueFull
                | Self::PoolShutdown
                | Self::AdmissionDenied
                | Self::ExecutionFailed
                | Self::StoreError
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "job",
            1100..=1199 => "dispatch",
            1200..=1299 => "admission",
            2000..=2099 => "store",
            2200..=2299 => "serialization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging and alerting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// User errors (bad input, validation failures)
    Low,
    /// Operational issues (admission rejections, full queues)
    Medium,
    /// System errors (store failures, job instantiation bugs)
    High,
    /// Critical errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            // Low severity - user errors
            ErrorCode::JobNotFound
            | ErrorCode::JobTypeUnknown
            | ErrorCode::ScheduleConflict
            | ErrorCode::InvalidStateTransition
            | ErrorCode::ValidationError
            | ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::InvalidCronExpression => Self::Low,

            // Medium severity - operational
            ErrorCode::AdmissionDenied
            | ErrorCode::QueueFull
            | ErrorCode::PoolShutdown
            | ErrorCode::ExecutionFailed => Self::Medium,

            // High severity - system errors
            ErrorCode::JobInstantiationFailed
            | ErrorCode::StoreError
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::InvalidJson
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            // Critical severity
            ErrorCode::InternalError | ErrorCode::UnknownError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (job, group, pool, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Retry information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,

    /// Tokens left in the rejecting admission bucket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_tokens: Option<u64>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    pub fn with_remaining_tokens(mut self, remaining: u64) -> Self {
        self.remaining_tokens = Some(remaining);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Foreman Core.
///
/// This error type supports:
/// - Structured error codes for API responses
/// - Error chaining with context
/// - User-friendly vs internal messages
/// - HTTP status code mapping
/// - Metrics integration
#[derive(Error, Debug)]
#[allow(dead_code)]
pub struct ForemanError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,

    /// Backtrace for debugging (captured in debug builds)
    #[cfg(debug_assertions)]
    backtrace: Option<std::backtrace::Backtrace>,
}

impl fmt::Display for ForemanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl ForemanError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
            #[cfg(debug_assertions)]
            backtrace: Some(std::backtrace::Backtrace::capture()),
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a missing required field error.
    pub fn missing_field(field: &'static str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("Missing required field: {}", field),
        )
        .with_context("field", field)
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::StoreError, "Job store operation failed", message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Get the compact code string used in API response envelopes.
    pub fn error_code(&self) -> &'static str {
        match self.code {
            ErrorCode::JobNotFound => "JOB_NOT_FOUND",
            ErrorCode::JobTypeUnknown => "UNKNOWN_JOB_TYPE",
            ErrorCode::JobInstantiationFailed => "INSTANTIATION_FAILED",
            ErrorCode::InvalidStateTransition => "INVALID_STATE",
            ErrorCode::ScheduleConflict => "SCHEDULE_CONFLICT",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::PoolShutdown => "POOL_SHUTDOWN",
            ErrorCode::ExecutionFailed => "EXECUTION_FAILED",
            ErrorCode::AdmissionDenied => "RATE_LIMIT_EXCEEDED",
            ErrorCode::StoreError => "STORE_ERROR",
            ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::InvalidJson => "SERIALIZATION_ERROR",
            ErrorCode::ValidationError
            | ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::InvalidCronExpression => "VALIDATION_ERROR",
            ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => "CONFIG_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    /// Record error metrics.
    fn record_metrics(&self) {
        counter!(
            "foreman_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code
    pub numeric_code: u32,

    /// User-friendly error message
    pub message: String,

    /// Whether the caller may retry the request
    pub retryable: bool,

    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&ForemanError> for ErrorResponse {
    fn from(error: &ForemanError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                retryable: error.is_retryable(),
                details: if error.details.context.is_empty()
                    && error.details.entity_id.is_none()
                    && error.details.retry_after_secs.is_none()
                    && error.details.remaining_tokens.is_none()
                {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for ForemanError {
    fn into_response(self) -> Response {
        // Log the error
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            ForemanError::internal(message.into()).with_source(e)
        })
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| {
            ForemanError::new(code, e.to_string()).with_source(e)
        })
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| ForemanError::new(ErrorCode::JobNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| ForemanError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for ForemanError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() {
            ErrorCode::DeserializationError
        } else if error.is_eof() {
            ErrorCode::InvalidJson
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(
            code,
            "Failed to process JSON data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::sync::AcquireError> for ForemanError {
    fn from(error: tokio::sync::AcquireError) -> Self {
        Self::with_internal(
            ErrorCode::PoolShutdown,
            "Worker pool is shut down",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for ForemanError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(
            ErrorCode::ExecutionFailed,
            "Operation timed out",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<std::io::Error> for ForemanError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::NotFound => (ErrorCode::JobNotFound, "File or resource not found"),
            ErrorKind::TimedOut => (ErrorCode::ExecutionFailed, "Operation timed out"),
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for ForemanError {
    fn from(error: anyhow::Error) -> Self {
        // Try to downcast to ForemanError first
        match error.downcast::<ForemanError>() {
            Ok(foreman_error) => foreman_error,
            Err(error) => {
                Self::with_internal(
                    ErrorCode::InternalError,
                    "An internal error occurred",
                    error.to_string(),
                )
            }
        }
    }
}

impl From<config::ConfigError> for ForemanError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (
                ErrorCode::ConfigurationError,
                "Configuration error occurred",
            ),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl ForemanError {
    // ─────────────────────────────────────────────────────────────────────────
    // Job Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a job not found error.
    pub fn job_not_found(external_id: impl Into<String>) -> Self {
        let id = external_id.into();
        Self::new(ErrorCode::JobNotFound, format!("Job not found: {}", id))
            .with_details(ErrorDetails::new().with_entity("job", &id))
    }

    /// Create an unknown job type error.
    pub fn job_type_unknown(job_type: impl Into<String>) -> Self {
        let name = job_type.into();
        Self::new(
            ErrorCode::JobTypeUnknown,
            format!("Unknown job type: {}", name),
        )
        .with_details(ErrorDetails::new().with_entity("job_type", &name))
    }

    /// Create a job instantiation error.
    pub fn instantiation_failed(job_type: impl Into<String>, reason: impl Into<String>) -> Self {
        let name = job_type.into();
        Self::with_internal(
            ErrorCode::JobInstantiationFailed,
            format!("Failed to instantiate job type: {}", name),
            reason,
        )
        .with_details(ErrorDetails::new().with_entity("job_type", &name))
    }

    /// Create a schedule conflict error.
    pub fn schedule_conflict(external_id: impl Into<String>) -> Self {
        let id = external_id.into();
        Self::new(
            ErrorCode::ScheduleConflict,
            format!("Job is already scheduled: {}", id),
        )
        .with_details(ErrorDetails::new().with_entity("job", &id))
    }

    /// Create an invalid state transition error.
    pub fn invalid_state_transition(
        from: &crate::jobs::record::JobStatus,
        to: &crate::jobs::record::JobStatus,
    ) -> Self {
        Self::new(
            ErrorCode::InvalidStateTransition,
            format!("Invalid job state transition: {:?} -> {:?}", from, to),
        )
        .with_context("from_state", format!("{:?}", from))
        .with_context("to_state", format!("{:?}", to))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a queue full error.
    pub fn queue_full(pool: impl Into<String>, capacity: usize) -> Self {
        let pool_name = pool.into();
        Self::new(
            ErrorCode::QueueFull,
            format!(
                "Worker pool '{}' rejected the job: queue at capacity {}",
                pool_name, capacity
            ),
        )
        .with_context("capacity", capacity)
        .with_details(
            ErrorDetails::new()
                .with_entity("pool", &pool_name)
                .with_retry_after(1),
        )
    }

    /// Create a pool shutdown error.
    pub fn pool_shutdown(pool: impl Into<String>) -> Self {
        let pool_name = pool.into();
        Self::new(
            ErrorCode::PoolShutdown,
            format!("Worker pool '{}' is shutting down", pool_name),
        )
        .with_details(ErrorDetails::new().with_entity("pool", &pool_name))
    }

    /// Create an execution failed error.
    pub fn execution_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ExecutionFailed,
            format!("Job execution failed: {}", reason.into()),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Admission Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an admission denied error.
    pub fn admission_denied(dimension: impl Into<String>, remaining_tokens: u64) -> Self {
        let dim = dimension.into();
        Self::new(
            ErrorCode::AdmissionDenied,
            format!("Rate limit exceeded for {}", dim),
        )
        .with_context("dimension", &dim)
        .with_details(
            ErrorDetails::new()
                .with_remaining_tokens(remaining_tokens)
                .with_retry_after(60),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Validation Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an invalid cron expression error.
    pub fn invalid_cron(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        let expr = expression.into();
        Self::with_internal(
            ErrorCode::InvalidCronExpression,
            format!("Invalid cron expression: {}", expr),
            reason,
        )
        .with_context("expression", &expr)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(
            ErrorCode::JobNotFound.http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ErrorCode::ValidationError.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ErrorCode::ScheduleConflict.http_status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ErrorCode::AdmissionDenied.http_status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorCode::QueueFull.http_status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorCode::InternalError.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::QueueFull.is_retryable());
        assert!(ErrorCode::AdmissionDenied.is_retryable());
        assert!(!ErrorCode::ValidationError.is_retryable());
        assert!(!ErrorCode::JobNotFound.is_retryable());
        assert!(!ErrorCode::ScheduleConflict.is_retryable());
    }

    #[test]
    fn test_error_creation() {
        let error = ForemanError::job_not_found("job-123");
        assert_eq!(error.code(), ErrorCode::JobNotFound);
        assert_eq!(error.http_status(), StatusCode::NOT_FOUND);
        assert!(!error.is_retryable());
        assert_eq!(error.details().entity_id.as_deref(), Some("job-123"));
    }

    #[test]
    fn test_error_context() {
        let error = ForemanError::new(ErrorCode::ValidationError, "Invalid input")
            .with_context("field", "job_type")
            .with_context("reason", "unknown type");

        assert!(error.details().context.contains_key("field"));
        assert!(error.details().context.contains_key("reason"));
    }

    #[test]
    fn test_error_details_builder() {
        let details = ErrorDetails::new()
            .with_entity("job", "abc-123")
            .with_retry_after(30)
            .with_remaining_tokens(0)
            .with_context("extra", "info");

        assert_eq!(details.entity_type, Some("job".to_string()));
        assert_eq!(details.entity_id, Some("abc-123".to_string()));
        assert_eq!(details.retry_after_secs, Some(30));
        assert_eq!(details.remaining_tokens, Some(0));
        assert!(details.context.contains_key("extra"));
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ForemanError::validation("Missing job name");
        let response = ErrorResponse::from(&error);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("VALIDATION_ERROR"));
        assert!(json.contains("Missing job name"));
    }

    #[test]
    fn test_admission_denied_details() {
        let error = ForemanError::admission_denied("ip:10.0.0.1", 0);
        assert_eq!(error.code(), ErrorCode::AdmissionDenied);
        assert_eq!(error.details().remaining_tokens, Some(0));
        assert_eq!(error.details().retry_after_secs, Some(60));
        assert_eq!(error.error_code(), "RATE_LIMIT_EXCEEDED");
    }

    #[test]
    fn test_envelope_error_code() {
        let error = ForemanError::job_not_found("missing");
        assert_eq!(error.error_code(), "JOB_NOT_FOUND");

        let error = ForemanError::job_type_unknown("NoSuchJob");
        assert_eq!(error.error_code(), "UNKNOWN_JOB_TYPE");
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::ValidationError),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::AdmissionDenied),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::StoreError),
            ErrorSeverity::High
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::InternalError),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_error_display() {
        let error = ForemanError::with_internal(
            ErrorCode::StoreError,
            "Job store operation failed",
            "save rejected for job-42",
        );

        let display = format!("{}", error);
        assert!(display.contains("StoreError"));
        assert!(display.contains("Job store operation failed"));
        assert!(display.contains("save rejected"));
    }
}
