//! Job record persistence.
//!
//! The dispatch core owns record lifecycle but persists through the
//! [`JobStore`] seam, so the engine never assumes where records live. The
//! bundled backend is [`MemoryStore`]; the `mark_*` operations load,
//! transition and save under one entry lock so concurrent status updates
//! for the same record cannot interleave.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::jobs::{JobRecord, JobStatus};

/// Store statistics snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total_jobs: u64,
    pub pending_jobs: u64,
    pub running_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub cancelled_jobs: u64,
}

/// Persisted shape of one worker pool, written at startup so operators
/// can read the effective sizing back out of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDescriptor {
    pub pool_name: String,
    /// ONE_TIME or SCHEDULER
    pub kind: String,
    pub core_pool_size: usize,
    pub maximum_pool_size: usize,
    pub queue_capacity: Option<usize>,
    pub keep_alive_secs: u64,
    pub active: bool,
    pub registered_at: DateTime<Utc>,
}

impl PoolDescriptor {
    pub fn new(
        pool_name: impl Into<String>,
        kind: impl Into<String>,
        core_pool_size: usize,
        maximum_pool_size: usize,
        queue_capacity: Option<usize>,
        keep_alive_secs: u64,
    ) -> Self {
        Self {
            pool_name: pool_name.into(),
            kind: kind.into(),
            core_pool_size,
            maximum_pool_size,
            queue_capacity,
            keep_alive_secs,
            active: true,
            registered_at: Utc::now(),
        }
    }
}

/// Persistence seam for job records, keyed by external id.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a record.
    async fn save(&self, record: &JobRecord) -> Result<()>;

    /// Look up one record.
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<JobRecord>>;

    /// All records in a status, newest submission first.
    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>>;

    /// All records of a registered type, newest submission first.
    async fn find_by_job_type(&self, job_type: &str) -> Result<Vec<JobRecord>>;

    /// Records with retries enabled and a retry scheduled.
    ///
    /// Due-ness is the caller's concern; this returns everything holding a
    /// `next_retry_at`, whatever its clock reads.
    async fn find_retry_eligible(&self) -> Result<Vec<JobRecord>>;

    /// Count records in a status.
    async fn count_by_status(&self, status: JobStatus) -> Result<u64>;

    /// Count every record.
    async fn count_all(&self) -> Result<u64>;

    /// Transition a record to RUNNING and persist it.
    async fn mark_started(&self, external_id: &str) -> Result<JobRecord>;

    /// Transition a record to COMPLETED and persist it.
    ///
    /// When `execution_time_ms` is absent the duration is derived from the
    /// recorded start time.
    async fn mark_completed(
        &self,
        external_id: &str,
        execution_time_ms: Option<u64>,
    ) -> Result<JobRecord>;

    /// Transition a record to FAILED with the failure reason and persist it.
    async fn mark_failed(&self, external_id: &str, reason: &str) -> Result<JobRecord>;

    /// Transition a record to CANCELLED and persist it.
    async fn mark_cancelled(&self, external_id: &str) -> Result<JobRecord>;

    /// Insert or replace a pool descriptor, keyed by pool name.
    async fn save_pool_descriptor(&self, descriptor: &PoolDescriptor) -> Result<()>;

    /// Look up one pool descriptor.
    async fn find_pool_descriptor(&self, pool_name: &str) -> Result<Option<PoolDescriptor>>;

    /// Every registered pool descriptor, sorted by pool name.
    async fn list_pool_descriptors(&self) -> Result<Vec<PoolDescriptor>>;

    /// Aggregate counts by status.
    async fn stats(&self) -> Result<StoreStats>;

    /// Backend name for logs and health output.
    fn name(&self) -> &'static str;
}
