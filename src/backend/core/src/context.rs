//! Application wiring.
//!
//! [`AppContext`] is built once at startup and handed to the API layer and
//! the background tasks; there is no global mutable state. Construction is
//! cheap and synchronous, [`start`](AppContext::start) registers pool
//! descriptors and spawns the periodic tasks, [`shutdown`](AppContext::shutdown)
//! drains in reverse order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::admission::{start_cleanup_task, AdmissionController};
use crate::config::{Config, QueueKind};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::events::BroadcastSink;
use crate::grouping::GroupingEngine;
use crate::jobs::JobRegistry;
use crate::pools::{OneTimePool, PoolMonitor, SchedulerPool};
use crate::retry::RetryEngine;
use crate::store::{JobStore, MemoryStore, PoolDescriptor};

pub struct AppContext {
    pub config: Config,
    pub registry: Arc<JobRegistry>,
    pub store: Arc<dyn JobStore>,
    pub admission: Arc<AdmissionController>,
    pub grouping: Arc<GroupingEngine>,
    pub retry: Arc<RetryEngine>,
    pub one_time_pool: Arc<OneTimePool>,
    pub scheduler_pool: Arc<SchedulerPool>,
    pub monitor: PoolMonitor,
    pub events: Arc<BroadcastSink>,
    pub dispatcher: Arc<Dispatcher>,
    started_at: Instant,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl AppContext {
    /// Wire every component from configuration, backed by the in-memory
    /// store and the built-in job registry.
    pub fn new(config: Config) -> Self {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        Self::with_store(config, store)
    }

    /// Wire with a caller-provided store backend.
    pub fn with_store(config: Config, store: Arc<dyn JobStore + 'static>) -> Self {
        let registry = Arc::new(JobRegistry::with_builtins());
        let admission = Arc::new(AdmissionController::new(config.admission.clone()));
        let grouping = Arc::new(GroupingEngine::new(config.grouping.clone()));
        let retry = Arc::new(RetryEngine::new(config.retry.clone(), store.clone()));
        let one_time_pool = Arc::new(OneTimePool::new(config.pools.one_time.clone()));
        let scheduler_pool = Arc::new(SchedulerPool::new(config.pools.scheduler.clone()));
        let monitor = PoolMonitor::new(one_time_pool.clone(), scheduler_pool.clone());
        let events = Arc::new(BroadcastSink::default());

        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            store.clone(),
            admission.clone(),
            grouping.clone(),
            retry.clone(),
            one_time_pool.clone(),
            scheduler_pool.clone(),
            events.clone(),
        ));

        Self {
            config,
            registry,
            store,
            admission,
            grouping,
            retry,
            one_time_pool,
            scheduler_pool,
            monitor,
            events,
            dispatcher,
            started_at: Instant::now(),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Register pool descriptors and spawn the periodic tasks.
    pub async fn start(&self) -> Result<()> {
        let one_time_cfg = &self.config.pools.one_time;
        let queue_capacity = match one_time_cfg.queue_kind {
            QueueKind::Bounded => Some(one_time_cfg.queue_capacity),
            QueueKind::Synchronous => Some(0),
            QueueKind::Unbounded => None,
        };
        self.store
            .save_pool_descriptor(&PoolDescriptor::new(
                self.one_time_pool.name(),
                "ONE_TIME",
                one_time_cfg.core_size,
                one_time_cfg.max_size,
                queue_capacity,
                one_time_cfg.keep_alive.as_secs(),
            ))
            .await?;
        self.store
            .save_pool_descriptor(&PoolDescriptor::new(
                self.scheduler_pool.name(),
                "SCHEDULER",
                self.config.pools.scheduler.workers,
                self.config.pools.scheduler.workers,
                None,
                0,
            ))
            .await?;

        let mut background = self.background.lock();
        if self.admission.is_enabled() {
            background.push(start_cleanup_task(self.admission.clone()));
        }
        if self.retry.is_enabled() {
            background.push(self.dispatcher.spawn_retry_sweep());
        }

        tracing::info!(
            job_types = self.registry.len(),
            admission_enabled = self.admission.is_enabled(),
            retry_enabled = self.retry.is_enabled(),
            store = self.store.name(),
            "Application context started"
        );
        Ok(())
    }

    /// Drain: stop schedules, close the pools, abort the periodic tasks.
    pub async fn shutdown(&self) {
        let cancelled = self.dispatcher.cancel_all_schedules();
        tracing::info!(cancelled_schedules = cancelled, "Shutting down");

        self.scheduler_pool.shutdown();
        self.one_time_pool.shutdown().await;

        let mut background = self.background.lock();
        for task in background.drain(..) {
            task.abort();
        }
        tracing::info!("Shutdown complete");
    }

    /// Time since the context was built.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_registers_pool_descriptors() {
        let context = AppContext::new(Config::default());
        context.start().await.unwrap();

        let one_time = context
            .store
            .find_pool_descriptor("one-time")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(one_time.kind, "ONE_TIME");
        assert_eq!(one_time.maximum_pool_size, 20);
        assert_eq!(one_time.queue_capacity, Some(100));

        let scheduler = context
            .store
            .find_pool_descriptor("scheduler")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scheduler.kind, "SCHEDULER");
        assert_eq!(scheduler.core_pool_size, 5);

        context.shutdown().await;
        assert!(context.one_time_pool.is_shutdown());
    }

    #[tokio::test]
    async fn test_uptime_advances() {
        let context = AppContext::new(Config::default());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(context.uptime() >= Duration::from_millis(10));
    }
}
