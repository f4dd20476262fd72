//! Built-in job types registered with the default registry.

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use super::job::{
    Job, JobIdentity, JobResult, OneTimeJob, RepetitionMode, RepetitiveJob,
};
use super::registry::JobRegistry;

/// Register all built-in job types.
pub fn register_builtins(registry: &JobRegistry) {
    registry.register_one_time("ReportGenerationJob", ReportGenerationJob::new);
    registry.register_one_time("DataProcessingJob", DataProcessingJob::new);
    registry.register_repetitive("HeartbeatJob", HeartbeatJob::new);
    registry.register_repetitive("QueueDepthProbeJob", QueueDepthProbeJob::new);
}

/// One-time job: generate a report.
pub struct ReportGenerationJob {
    identity: JobIdentity,
}

impl ReportGenerationJob {
    pub fn new(identity: JobIdentity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl Job for ReportGenerationJob {
    fn external_id(&self) -> &str {
        &self.identity.external_id
    }

    fn name(&self) -> &str {
        &self.identity.name
    }

    async fn run(&self) -> JobResult {
        info!(job_id = %self.identity.external_id, "Generating report");
        tokio::time::sleep(Duration::from_millis(500)).await;
        info!(job_id = %self.identity.external_id, "Report generated");
        Ok(())
    }
}

impl OneTimeJob for ReportGenerationJob {}

/// One-time job: process a data batch.
pub struct DataProcessingJob {
    identity: JobIdentity,
}

impl DataProcessingJob {
    pub fn new(identity: JobIdentity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl Job for DataProcessingJob {
    fn external_id(&self) -> &str {
        &self.identity.external_id
    }

    fn name(&self) -> &str {
        &self.identity.name
    }

    async fn run(&self) -> JobResult {
        info!(job_id = %self.identity.external_id, "Processing data batch");
        tokio::time::sleep(Duration::from_millis(250)).await;
        info!(job_id = %self.identity.external_id, "Data batch processed");
        Ok(())
    }
}

impl OneTimeJob for DataProcessingJob {}

/// Repetitive job: emit a liveness heartbeat every five seconds.
pub struct HeartbeatJob {
    identity: JobIdentity,
}

impl HeartbeatJob {
    pub fn new(identity: JobIdentity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl Job for HeartbeatJob {
    fn external_id(&self) -> &str {
        &self.identity.external_id
    }

    fn name(&self) -> &str {
        &self.identity.name
    }

    async fn run(&self) -> JobResult {
        info!(job_id = %self.identity.external_id, "Heartbeat");
        Ok(())
    }
}

impl RepetitiveJob for HeartbeatJob {
    fn interval(&self) -> Duration {
        Duration::from_millis(5_000)
    }

    fn initial_delay(&self) -> Duration {
        Duration::from_millis(1_000)
    }
}

/// Repetitive job: sample queue depths on a fixed rate.
pub struct QueueDepthProbeJob {
    identity: JobIdentity,
}

impl QueueDepthProbeJob {
    pub fn new(identity: JobIdentity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl Job for QueueDepthProbeJob {
    fn external_id(&self) -> &str {
        &self.identity.external_id
    }

    fn name(&self) -> &str {
        &self.identity.name
    }

    async fn run(&self) -> JobResult {
        info!(job_id = %self.identity.external_id, "Sampling queue depth");
        Ok(())
    }
}

impl RepetitiveJob for QueueDepthProbeJob {
    fn interval(&self) -> Duration {
        Duration::from_millis(10_000)
    }

    fn initial_delay(&self) -> Duration {
        Duration::from_millis(2_000)
    }

    fn mode(&self) -> RepetitionMode {
        RepetitionMode::FixedRate
    }
}
