//! Job abstractions for Foreman Core.
//!
//! This module provides everything needed to define and track jobs:
//!
//! - **Job traits**: `OneTimeJob` and `RepetitiveJob`, sharing the `Job` base
//! - **Registry**: explicit type-name to factory mapping used at submission
//! - **Records**: persistent bookkeeping rows with the status state machine
//! - **Built-ins**: sample job types registered with the default registry
//!
//! # Usage
//!
//! ```rust,ignore
//! use foreman_core::jobs::{Job, JobIdentity, JobRegistry, JobResult, OneTimeJob};
//!
//! struct IndexRebuildJob {
//!     identity: JobIdentity,
//! }
//!
//! #[async_trait]
//! impl Job for IndexRebuildJob {
//!     fn external_id(&self) -> &str { &self.identity.external_id }
//!     fn name(&self) -> &str { &self.identity.name }
//!
//!     async fn run(&self) -> JobResult {
//!         // Do work...
//!         Ok(())
//!     }
//! }
//!
//! impl OneTimeJob for IndexRebuildJob {}
//!
//! let registry = JobRegistry::with_builtins();
//! registry.register_one_time("IndexRebuildJob", |identity| IndexRebuildJob { identity });
//! ```

pub mod builtin;
pub mod job;
pub mod record;
pub mod registry;

pub use job::{
    Job, JobError, JobIdentity, JobKind, JobPriority, JobResult, OneTimeJob, RepetitionMode,
    RepetitiveJob,
};
pub use record::{JobRecord, JobStatus};
pub use registry::JobRegistry;

pub use builtin::{
    register_builtins, DataProcessingJob, HeartbeatJob, QueueDepthProbeJob, ReportGenerationJob,
};
