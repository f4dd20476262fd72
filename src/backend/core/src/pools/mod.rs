//! Worker pools.
//!
//! Two independent bounded execution resources: the one-time pool runs
//! fire-and-forget jobs behind a bounded queue, the scheduler pool runs
//! everything timer-driven. Both expose executor-shaped snapshots through
//! [`PoolMonitor`].

pub mod monitor;
pub mod scheduler;
pub mod worker_pool;

pub use monitor::{
    PoolMonitor, QueueUtilization, QueueUtilizationReport, ThreadPoolStats, UtilizationLevel,
};
pub use scheduler::SchedulerPool;
pub use worker_pool::{OneTimePool, PoolSnapshot, TaskSlot};
