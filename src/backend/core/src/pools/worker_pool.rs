//! One-time executor pool.
//!
//! Bounded execution resource for fire-and-forget jobs. Admission into the
//! pool is a synchronous permit reservation: a submission either gets a slot
//! (worker or queue) immediately or is rejected with `QueueFull`, so callers
//! can fail fast without spawning anything. Execution itself is asynchronous;
//! a reserved slot waits for one of `max_size` worker permits, runs, and
//! releases both permits when done.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use parking_lot::RwLock;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;

use crate::config::{OneTimePoolConfig, QueueKind};
use crate::error::{ForemanError, Result};

const POOL_NAME: &str = "one-time";

/// Internal counters, updated lock-free from executing tasks.
struct PoolCounters {
    /// Tasks accepted for execution
    submitted: AtomicU64,
    /// Tasks whose future resolved Ok
    completed: AtomicU64,
    /// Tasks whose future resolved Err
    failed: AtomicU64,
    /// Reservations refused at the door
    rejected: AtomicU64,
    /// Tasks holding a capacity permit but not yet a worker permit
    queued: AtomicUsize,
    /// Tasks holding a worker permit
    active: AtomicUsize,
    /// Largest observed active count
    peak_active: AtomicUsize,
}

impl PoolCounters {
    fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            queued: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        }
    }

    fn record_enqueue(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    fn record_start(&self) {
        self.queued.fetch_sub(1, Ordering::Relaxed);
        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_active.fetch_max(active, Ordering::Relaxed);
    }

    fn record_finish(&self, success: bool) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        if success {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A reserved slot in the pool.
///
/// Holds one capacity permit. Dropping the slot without executing releases
/// the permit and the task is never counted as submitted.
#[derive(Debug)]
pub struct TaskSlot {
    capacity_permit: OwnedSemaphorePermit,
}

/// Point-in-time view of one pool, shaped like the fields a thread-pool
/// executor would report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolSnapshot {
    pub pool_name: String,
    pub core_pool_size: usize,
    pub maximum_pool_size: usize,
    /// Workers currently running a task
    pub active_workers: usize,
    /// Workers currently alive (permit-based pools do not idle threads)
    pub pool_size: usize,
    pub peak_pool_size: usize,
    pub completed_task_count: u64,
    pub failed_task_count: u64,
    pub rejected_task_count: u64,
    pub total_task_count: u64,
    pub queue_size: usize,
    /// `usize::MAX` when the queue is unbounded
    pub queue_remaining_capacity: usize,
    pub keep_alive_secs: u64,
    pub is_shutdown: bool,
    pub is_terminated: bool,
}

/// Bounded executor for one-time jobs.
///
/// Concurrency is capped by a worker semaphore (`max_size` permits) and
/// admission by a capacity semaphore sized to `max_size` plus the queue
/// allowance for the configured [`QueueKind`].
pub struct OneTimePool {
    config: OneTimePoolConfig,
    /// Workers + queue slots; reserving this is the admission decision
    capacity: Arc<Semaphore>,
    /// Running tasks
    workers: Arc<Semaphore>,
    counters: Arc<PoolCounters>,
    tasks: RwLock<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
    terminated: Arc<AtomicBool>,
}

impl OneTimePool {
    /// Create a pool from configuration.
    pub fn new(config: OneTimePoolConfig) -> Self {
        let queue_permits = match config.queue_kind {
            QueueKind::Bounded => config.queue_capacity,
            QueueKind::Synchronous => 0,
            QueueKind::Unbounded => Semaphore::MAX_PERMITS - config.max_size,
        };

        tracing::info!(
            pool_name = POOL_NAME,
            core_size = config.core_size,
            max_size = config.max_size,
            queue_kind = ?config.queue_kind,
            queue_capacity = config.queue_capacity,
            "Worker pool created"
        );

        Self {
            capacity: Arc::new(Semaphore::new(config.max_size + queue_permits)),
            workers: Arc::new(Semaphore::new(config.max_size)),
            counters: Arc::new(PoolCounters::new()),
            tasks: RwLock::new(Vec::new()),
            shutdown: AtomicBool::new(false),
            terminated: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Create a pool with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(OneTimePoolConfig::default())
    }

    /// Get the pool name.
    pub fn name(&self) -> &'static str {
        POOL_NAME
    }

    /// Get the configured worker ceiling.
    pub fn max_workers(&self) -> usize {
        self.config.max_size
    }

    /// Get the number of tasks currently running.
    pub fn active_workers(&self) -> usize {
        self.counters.active.load(Ordering::Relaxed)
    }

    /// Get the number of tasks waiting for a worker.
    pub fn queue_size(&self) -> usize {
        self.counters.queued.load(Ordering::Relaxed)
    }

    /// Reserve a slot, or reject synchronously.
    ///
    /// Errors with `QueueFull` when workers and queue are saturated and
    /// `PoolShutdown` after [`shutdown`](Self::shutdown) has begun.
    pub fn try_reserve(&self) -> Result<TaskSlot> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(ForemanError::pool_shutdown(POOL_NAME));
        }

        match self.capacity.clone().try_acquire_owned() {
            Ok(permit) => Ok(TaskSlot {
                capacity_permit: permit,
            }),
            Err(TryAcquireError::Closed) => Err(ForemanError::pool_shutdown(POOL_NAME)),
            Err(TryAcquireError::NoPermits) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                counter!("foreman_pool_rejections_total", "pool" => POOL_NAME).increment(1);
                tracing::warn!(
                    pool_name = POOL_NAME,
                    active = self.active_workers(),
                    queued = self.queue_size(),
                    "Pool saturated, submission rejected"
                );
                Err(ForemanError::queue_full(
                    POOL_NAME,
                    self.config.queue_capacity,
                ))
            }
        }
    }

    /// Run a task in the reserved slot.
    ///
    /// The future waits for a worker permit (queued), runs, and is counted
    /// completed or failed from its `Result`. Record bookkeeping belongs to
    /// the caller's future; the pool only tracks occupancy.
    pub fn execute<F>(&self, slot: TaskSlot, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let workers = self.workers.clone();
        let counters = self.counters.clone();
        counters.record_enqueue();

        let handle = tokio::spawn(async move {
            // The capacity permit rides along until the task finishes.
            let _capacity = slot.capacity_permit;

            let worker_permit = match workers.acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    tracing::error!(pool_name = POOL_NAME, "Worker semaphore closed");
                    counters.queued.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
            };
            counters.record_start();

            let start = Instant::now();
            let result = fut.await;
            let success = result.is_ok();

            drop(worker_permit);
            counters.record_finish(success);

            tracing::debug!(
                pool_name = POOL_NAME,
                success,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Task finished"
            );
        });

        let mut tasks = self.tasks.write();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Wait for all tracked tasks to finish.
    pub async fn join_all(&self) {
        loop {
            let handles: Vec<_> = self.tasks.write().drain(..).collect();
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    /// Stop admitting work and drain in-flight tasks.
    ///
    /// Waits up to the configured grace period, then aborts stragglers.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.capacity.close();

        tracing::info!(
            pool_name = POOL_NAME,
            active = self.active_workers(),
            queued = self.queue_size(),
            grace_secs = self.config.shutdown_grace.as_secs(),
            "Pool shutting down"
        );

        if tokio::time::timeout(self.config.shutdown_grace, self.join_all())
            .await
            .is_err()
        {
            let handles: Vec<_> = self.tasks.write().drain(..).collect();
            tracing::warn!(
                pool_name = POOL_NAME,
                aborted = handles.len(),
                "Shutdown grace elapsed, aborting remaining tasks"
            );
            for handle in handles {
                handle.abort();
            }
        }

        self.terminated.store(true, Ordering::Release);
        tracing::info!(pool_name = POOL_NAME, "Pool terminated");
    }

    /// Whether shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Take a monitoring snapshot.
    pub fn snapshot(&self) -> PoolSnapshot {
        let counters = &self.counters;
        let queued = counters.queued.load(Ordering::Relaxed);
        let active = counters.active.load(Ordering::Relaxed);

        let queue_remaining = match self.config.queue_kind {
            QueueKind::Bounded => self.config.queue_capacity.saturating_sub(queued),
            QueueKind::Synchronous => 0,
            QueueKind::Unbounded => usize::MAX,
        };

        PoolSnapshot {
            pool_name: POOL_NAME.to_string(),
            core_pool_size: self.config.core_size,
            maximum_pool_size: self.config.max_size,
            active_workers: active,
            pool_size: active,
            peak_pool_size: counters.peak_active.load(Ordering::Relaxed),
            completed_task_count: counters.completed.load(Ordering::Relaxed),
            failed_task_count: counters.failed.load(Ordering::Relaxed),
            rejected_task_count: counters.rejected.load(Ordering::Relaxed),
            total_task_count: counters.submitted.load(Ordering::Relaxed),
            queue_size: queued,
            queue_remaining_capacity: queue_remaining,
            keep_alive_secs: self.config.keep_alive.as_secs(),
            is_shutdown: self.shutdown.load(Ordering::Acquire),
            is_terminated: self.terminated.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::time::Duration;

    fn pool_config(max: usize, kind: QueueKind, queue: usize) -> OneTimePoolConfig {
        OneTimePoolConfig {
            core_size: max.min(2),
            max_size: max,
            keep_alive: Duration::from_secs(60),
            queue_kind: kind,
            queue_capacity: queue,
            shutdown_grace: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_snapshot_defaults() {
        let pool = OneTimePool::with_defaults();
        let snap = pool.snapshot();

        assert_eq!(snap.pool_name, "one-time");
        assert_eq!(snap.core_pool_size, 5);
        assert_eq!(snap.maximum_pool_size, 20);
        assert_eq!(snap.queue_remaining_capacity, 100);
        assert_eq!(snap.active_workers, 0);
        assert_eq!(snap.total_task_count, 0);
        assert!(!snap.is_shutdown);
        assert!(!snap.is_terminated);
    }

    #[tokio::test]
    async fn test_reserve_rejects_when_saturated() {
        let pool = OneTimePool::new(pool_config(1, QueueKind::Bounded, 1));

        let _slot1 = pool.try_reserve().unwrap();
        let _slot2 = pool.try_reserve().unwrap();

        let err = pool.try_reserve().unwrap_err();
        assert_eq!(err.code(), ErrorCode::QueueFull);
        assert_eq!(pool.snapshot().rejected_task_count, 1);
    }

    #[tokio::test]
    async fn test_synchronous_queue_has_no_slack() {
        let pool = OneTimePool::new(pool_config(2, QueueKind::Synchronous, 100));

        let _slot1 = pool.try_reserve().unwrap();
        let _slot2 = pool.try_reserve().unwrap();
        assert!(pool.try_reserve().is_err());
    }

    #[tokio::test]
    async fn test_dropped_slot_releases_capacity() {
        let pool = OneTimePool::new(pool_config(1, QueueKind::Synchronous, 0));

        let slot = pool.try_reserve().unwrap();
        drop(slot);

        assert!(pool.try_reserve().is_ok());
        assert_eq!(pool.snapshot().total_task_count, 0);
    }

    #[tokio::test]
    async fn test_execute_counts_outcomes() {
        let pool = OneTimePool::new(pool_config(4, QueueKind::Bounded, 4));

        let slot = pool.try_reserve().unwrap();
        pool.execute(slot, async { Ok(()) });

        let slot = pool.try_reserve().unwrap();
        pool.execute(slot, async { Err(ForemanError::execution_failed("boom")) });

        pool.join_all().await;

        let snap = pool.snapshot();
        assert_eq!(snap.total_task_count, 2);
        assert_eq!(snap.completed_task_count, 1);
        assert_eq!(snap.failed_task_count, 1);
        assert_eq!(snap.active_workers, 0);
        assert_eq!(snap.queue_size, 0);
    }

    #[tokio::test]
    async fn test_queue_depth_tracking() {
        let pool = OneTimePool::new(pool_config(1, QueueKind::Bounded, 2));
        let gate = Arc::new(Semaphore::new(0));

        for _ in 0..3 {
            let slot = pool.try_reserve().unwrap();
            let gate = gate.clone();
            pool.execute(slot, async move {
                let _ = gate.acquire().await;
                Ok(())
            });
        }

        // Let the first task claim the single worker.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snap = pool.snapshot();
        assert_eq!(snap.active_workers, 1);
        assert_eq!(snap.queue_size, 2);
        assert_eq!(snap.queue_remaining_capacity, 0);

        gate.add_permits(3);
        pool.join_all().await;

        let snap = pool.snapshot();
        assert_eq!(snap.completed_task_count, 3);
        assert!(snap.peak_pool_size <= 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let pool = OneTimePool::new(pool_config(2, QueueKind::Bounded, 2));
        pool.shutdown().await;

        let err = pool.try_reserve().unwrap_err();
        assert_eq!(err.code(), ErrorCode::PoolShutdown);

        let snap = pool.snapshot();
        assert!(snap.is_shutdown);
        assert!(snap.is_terminated);
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight() {
        let pool = OneTimePool::new(pool_config(2, QueueKind::Bounded, 2));

        let slot = pool.try_reserve().unwrap();
        pool.execute(slot, async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        });

        pool.shutdown().await;

        let snap = pool.snapshot();
        assert_eq!(snap.completed_task_count, 1);
        assert!(snap.is_terminated);
    }
}
