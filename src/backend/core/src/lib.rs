#![allow(clippy::result_large_err)]
//! # Foreman Core
//!
//! Job dispatch and admission engine.
//!
//! ## Architecture
//!
//! - **Jobs**: `Job` trait family, repetition modes, registry-based
//!   construction with identity injection
//! - **Pools**: bounded one-time executor with synchronous overflow
//!   rejection, fixed-size scheduler pool, live utilization monitor
//! - **Admission**: token buckets per IP, user+tier, job kind and app
//!   identity, with bounded caches and idle eviction
//! - **Grouping**: per-key debounce buffers with representative execution
//! - **Dispatch**: submission entry points, schedule tickers
//!   (fixed-delay/fixed-rate/cron), handle map with non-interrupting cancel
//! - **Retry**: exponential backoff with jitter, periodic redispatch sweep
//! - **Store**: record persistence seam with the in-memory backend
//! - **API**: axum REST surface, job-status WebSocket, Prometheus metrics

pub mod admission;
pub mod api;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod grouping;
pub mod jobs;
pub mod pools;
pub mod retry;
pub mod store;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, ForemanError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::admission::{AdmissionController, AdmissionDecision, SubmissionContext};
    pub use crate::config::Config;
    pub use crate::context::AppContext;
    pub use crate::dispatch::{
        DispatchStats, Dispatcher, OneTimeSubmission, RepetitiveSubmission,
    };
    pub use crate::error::{
        ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, ForemanError, Result,
    };
    pub use crate::events::{BroadcastSink, EventSink, JobEvent, NoopSink};
    pub use crate::grouping::GroupingEngine;
    pub use crate::jobs::{
        Job, JobError, JobIdentity, JobKind, JobPriority, JobRecord, JobRegistry, JobResult,
        JobStatus, OneTimeJob, RepetitionMode, RepetitiveJob,
    };
    pub use crate::pools::{OneTimePool, PoolMonitor, SchedulerPool};
    pub use crate::retry::{RetryDisposition, RetryEngine, RetryPolicy};
    pub use crate::store::{JobStore, MemoryStore, PoolDescriptor, StoreStats};
}
