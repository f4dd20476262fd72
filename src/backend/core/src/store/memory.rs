//! In-memory record store.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{ForemanError, Result};
use crate::jobs::{JobRecord, JobStatus};
use crate::store::{JobStore, PoolDescriptor, StoreStats};

/// DashMap-backed [`JobStore`], the default single-process backend.
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<String, JobRecord>,
    pools: DashMap<String, PoolDescriptor>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a status transition under the record's entry lock.
    fn update<F>(&self, external_id: &str, apply: F) -> Result<JobRecord>
    where
        F: FnOnce(&mut JobRecord) -> Result<()>,
    {
        let mut entry = self
            .records
            .get_mut(external_id)
            .ok_or_else(|| ForemanError::job_not_found(external_id))?;

        apply(entry.value_mut())?;
        entry.touch();
        Ok(entry.clone())
    }

    fn collect_sorted<F>(&self, predicate: F) -> Vec<JobRecord>
    where
        F: Fn(&JobRecord) -> bool,
    {
        let mut matches: Vec<JobRecord> = self
            .records
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matches.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        matches
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn save(&self, record: &JobRecord) -> Result<()> {
        self.records
            .insert(record.external_id.clone(), record.clone());
        Ok(())
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.records.get(external_id).map(|entry| entry.clone()))
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>> {
        Ok(self.collect_sorted(|record| record.status == status))
    }

    async fn find_by_job_type(&self, job_type: &str) -> Result<Vec<JobRecord>> {
        Ok(self.collect_sorted(|record| record.job_type == job_type))
    }

    async fn find_retry_eligible(&self) -> Result<Vec<JobRecord>> {
        Ok(self.collect_sorted(|record| record.retry_enabled && record.next_retry_at.is_some()))
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.value().status == status)
            .count() as u64)
    }

    async fn count_all(&self) -> Result<u64> {
        Ok(self.records.len() as u64)
    }

    async fn mark_started(&self, external_id: &str) -> Result<JobRecord> {
        self.update(external_id, |record| record.mark_started())
    }

    async fn mark_completed(
        &self,
        external_id: &str,
        execution_time_ms: Option<u64>,
    ) -> Result<JobRecord> {
        self.update(external_id, |record| {
            record.mark_completed(execution_time_ms)
        })
    }

    async fn mark_failed(&self, external_id: &str, reason: &str) -> Result<JobRecord> {
        self.update(external_id, |record| record.mark_failed(reason))
    }

    async fn mark_cancelled(&self, external_id: &str) -> Result<JobRecord> {
        self.update(external_id, |record| record.mark_cancelled())
    }

    async fn save_pool_descriptor(&self, descriptor: &PoolDescriptor) -> Result<()> {
        self.pools
            .insert(descriptor.pool_name.clone(), descriptor.clone());
        Ok(())
    }

    async fn find_pool_descriptor(&self, pool_name: &str) -> Result<Option<PoolDescriptor>> {
        Ok(self.pools.get(pool_name).map(|entry| entry.clone()))
    }

    async fn list_pool_descriptors(&self) -> Result<Vec<PoolDescriptor>> {
        let mut descriptors: Vec<PoolDescriptor> =
            self.pools.iter().map(|entry| entry.clone()).collect();
        descriptors.sort_by(|a, b| a.pool_name.cmp(&b.pool_name));
        Ok(descriptors)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for entry in self.records.iter() {
            stats.total_jobs += 1;
            match entry.value().status {
                JobStatus::Pending => stats.pending_jobs += 1,
                JobStatus::Running => stats.running_jobs += 1,
                JobStatus::Completed => stats.completed_jobs += 1,
                JobStatus::Failed => stats.failed_jobs += 1,
                JobStatus::Cancelled => stats.cancelled_jobs += 1,
            }
        }
        Ok(stats)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
