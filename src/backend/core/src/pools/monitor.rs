//! Pool monitoring.
//!
//! Read-only snapshots over both pools for the stats endpoints. Utilization
//! is queue occupancy, `size / (size + remaining)`, bucketed into
//! LOW (< 50%), MEDIUM (50-80%) and HIGH (> 80%).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pools::scheduler::SchedulerPool;
use crate::pools::worker_pool::{OneTimePool, PoolSnapshot};

/// Queue pressure bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UtilizationLevel {
    Low,
    Medium,
    High,
}

impl UtilizationLevel {
    /// Bucket a utilization percentage.
    pub fn from_percent(percent: f64) -> Self {
        if percent > 80.0 {
            Self::High
        } else if percent >= 50.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Queue occupancy for one pool.
#[derive(Debug, Clone, Serialize)]
pub struct QueueUtilization {
    pub pool_name: String,
    pub queue_size: usize,
    pub utilization_percent: f64,
    pub level: UtilizationLevel,
}

impl QueueUtilization {
    fn from_snapshot(snap: &PoolSnapshot) -> Self {
        let percent = utilization_percent(snap.queue_size, snap.queue_remaining_capacity);
        Self {
            pool_name: snap.pool_name.clone(),
            queue_size: snap.queue_size,
            utilization_percent: percent,
            level: UtilizationLevel::from_percent(percent),
        }
    }
}

/// Snapshot pair returned by the thread-pool stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadPoolStats {
    pub one_time: PoolSnapshot,
    pub scheduler: PoolSnapshot,
    pub timestamp: DateTime<Utc>,
}

/// Utilization pair returned by the queue-utilization endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct QueueUtilizationReport {
    pub one_time: QueueUtilization,
    pub scheduler: QueueUtilization,
    pub timestamp: DateTime<Utc>,
}

/// Read-only view over the two pools.
pub struct PoolMonitor {
    one_time: Arc<OneTimePool>,
    scheduler: Arc<SchedulerPool>,
}

impl PoolMonitor {
    pub fn new(one_time: Arc<OneTimePool>, scheduler: Arc<SchedulerPool>) -> Self {
        Self {
            one_time,
            scheduler,
        }
    }

    /// Executor-shaped stats for both pools.
    pub fn thread_pool_stats(&self) -> ThreadPoolStats {
        ThreadPoolStats {
            one_time: self.one_time.snapshot(),
            scheduler: self.scheduler.snapshot(),
            timestamp: Utc::now(),
        }
    }

    /// Queue occupancy with pressure buckets for both pools.
    pub fn queue_utilization(&self) -> QueueUtilizationReport {
        QueueUtilizationReport {
            one_time: QueueUtilization::from_snapshot(&self.one_time.snapshot()),
            scheduler: QueueUtilization::from_snapshot(&self.scheduler.snapshot()),
            timestamp: Utc::now(),
        }
    }

    /// Both pools accepting work.
    pub fn is_healthy(&self) -> bool {
        !self.one_time.is_shutdown() && !self.scheduler.is_shutdown()
    }
}

fn utilization_percent(queue_size: usize, remaining: usize) -> f64 {
    let total = queue_size as f64 + remaining as f64;
    if total == 0.0 {
        return 0.0;
    }
    let percent = (queue_size as f64 / total) * 100.0;
    (percent * 100.0).round() / 100.0
}
