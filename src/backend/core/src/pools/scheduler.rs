//! Scheduler pool.
//!
//! Shared execution resource for everything timer-driven: repetitive job
//! ticks, debounce flush timers, and retry redispatch. Timers themselves are
//! plain tokio sleeps (the timer queue is logically unbounded); only the work
//! a timer releases competes for one of the pool's worker permits, so a slow
//! tick delays other due work instead of stacking unbounded concurrency.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};

use crate::config::SchedulerPoolConfig;
use crate::error::Result;
use crate::pools::worker_pool::PoolSnapshot;

const POOL_NAME: &str = "scheduler";

struct SchedulerCounters {
    /// Ticks and timer bodies handed to the pool
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    /// One-shot timers currently pending
    timers_pending: AtomicUsize,
    /// Work waiting for a worker permit
    queued: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl SchedulerCounters {
    fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timers_pending: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        }
    }
}

/// Fixed-width worker pool for scheduled work.
pub struct SchedulerPool {
    config: SchedulerPoolConfig,
    workers: Arc<Semaphore>,
    counters: Arc<SchedulerCounters>,
    /// Pending one-shot timers, abortable on shutdown
    timers: RwLock<Vec<AbortHandle>>,
    shutdown: AtomicBool,
}

impl SchedulerPool {
    /// Create a pool from configuration.
    pub fn new(config: SchedulerPoolConfig) -> Self {
        tracing::info!(
            pool_name = POOL_NAME,
            workers = config.workers,
            "Scheduler pool created"
        );

        Self {
            workers: Arc::new(Semaphore::new(config.workers)),
            counters: Arc::new(SchedulerCounters::new()),
            timers: RwLock::new(Vec::new()),
            shutdown: AtomicBool::new(false),
            config,
        }
    }

    /// Create a pool with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(SchedulerPoolConfig::default())
    }

    /// Get the pool name.
    pub fn name(&self) -> &'static str {
        POOL_NAME
    }

    /// Get the configured worker count.
    pub fn workers(&self) -> usize {
        self.config.workers
    }

    /// Get the number of ticks currently executing.
    pub fn active_workers(&self) -> usize {
        self.counters.active.load(Ordering::Relaxed)
    }

    /// Run one unit of scheduled work on the pool, waiting for a worker.
    ///
    /// Callers that must not overlap (fixed-delay loops) await this inline;
    /// callers that may overlap (fixed-rate loops) spawn it.
    pub async fn run<F>(&self, fut: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let counters = &self.counters;
        counters.submitted.fetch_add(1, Ordering::Relaxed);
        counters.queued.fetch_add(1, Ordering::Relaxed);

        let permit = match self.workers.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                counters.queued.fetch_sub(1, Ordering::Relaxed);
                tracing::debug!(pool_name = POOL_NAME, "Pool closed, dropping work");
                return Ok(());
            }
        };

        counters.queued.fetch_sub(1, Ordering::Relaxed);
        let active = counters.active.fetch_add(1, Ordering::Relaxed) + 1;
        counters.peak_active.fetch_max(active, Ordering::Relaxed);

        let start = Instant::now();
        let result = fut.await;

        drop(permit);
        counters.active.fetch_sub(1, Ordering::Relaxed);
        match &result {
            Ok(()) => counters.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => counters.failed.fetch_add(1, Ordering::Relaxed),
        };

        tracing::trace!(
            pool_name = POOL_NAME,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Scheduled work finished"
        );

        result
    }

    /// Arm a one-shot timer that runs `fut` on the pool after `delay`.
    ///
    /// Used for debounce flushes and retry redispatch. The returned handle
    /// aborts the timer if it has not fired yet.
    pub fn schedule_once<F>(&self, delay: Duration, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let workers = self.workers.clone();
        let counters = self.counters.clone();
        counters.timers_pending.fetch_add(1, Ordering::Relaxed);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            counters.timers_pending.fetch_sub(1, Ordering::Relaxed);

            counters.submitted.fetch_add(1, Ordering::Relaxed);
            counters.queued.fetch_add(1, Ordering::Relaxed);
            let permit = match workers.acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    counters.queued.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
            };
            counters.queued.fetch_sub(1, Ordering::Relaxed);
            let active = counters.active.fetch_add(1, Ordering::Relaxed) + 1;
            counters.peak_active.fetch_max(active, Ordering::Relaxed);

            fut.await;

            drop(permit);
            counters.active.fetch_sub(1, Ordering::Relaxed);
            counters.completed.fetch_add(1, Ordering::Relaxed);
        });

        let mut timers = self.timers.write();
        timers.retain(|t| !t.is_finished());
        timers.push(handle.abort_handle());

        handle
    }

    /// Stop the pool: close the worker gate and abort pending timers.
    ///
    /// Repetitive loops are cancelled by their owner; this only prevents new
    /// scheduled work from starting.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.workers.close();

        let timers: Vec<_> = self.timers.write().drain(..).collect();
        let aborted = timers.len();
        for timer in timers {
            timer.abort();
        }

        tracing::info!(
            pool_name = POOL_NAME,
            aborted_timers = aborted,
            "Scheduler pool shut down"
        );
    }

    /// Whether shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Take a monitoring snapshot.
    pub fn snapshot(&self) -> PoolSnapshot {
        let counters = &self.counters;
        let active = counters.active.load(Ordering::Relaxed);
        let queued = counters.queued.load(Ordering::Relaxed)
            + counters.timers_pending.load(Ordering::Relaxed);
        let shutdown = self.shutdown.load(Ordering::Acquire);

        PoolSnapshot {
            pool_name: POOL_NAME.to_string(),
            core_pool_size: self.config.workers,
            maximum_pool_size: self.config.workers,
            active_workers: active,
            pool_size: active,
            peak_pool_size: counters.peak_active.load(Ordering::Relaxed),
            completed_task_count: counters.completed.load(Ordering::Relaxed),
            failed_task_count: counters.failed.load(Ordering::Relaxed),
            rejected_task_count: 0,
            total_task_count: counters.submitted.load(Ordering::Relaxed),
            queue_size: queued,
            queue_remaining_capacity: usize::MAX,
            keep_alive_secs: 0,
            is_shutdown: shutdown,
            is_terminated: shutdown && active == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_snapshot_defaults() {
        let pool = SchedulerPool::with_defaults();
        let snap = pool.snapshot();

        assert_eq!(snap.pool_name, "scheduler");
        assert_eq!(snap.maximum_pool_size, 5);
        assert_eq!(snap.queue_remaining_capacity, usize::MAX);
        assert_eq!(snap.total_task_count, 0);
    }

    #[tokio::test]
    async fn test_run_limits_concurrency() {
        let pool = Arc::new(SchedulerPool::new(SchedulerPoolConfig { workers: 2 }));
        let peak = Arc::new(AtomicU32::new(0));
        let current = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let peak = peak.clone();
            let current = current.clone();
            handles.push(tokio::spawn(async move {
                let _ = pool
                    .run(async {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        let snap = pool.snapshot();
        assert_eq!(snap.completed_task_count, 8);
        assert!(snap.peak_pool_size <= 2);
    }

    #[tokio::test]
    async fn test_schedule_once_fires_after_delay() {
        let pool = SchedulerPool::with_defaults();
        let fired = Arc::new(AtomicU32::new(0));

        let fired_clone = fired.clone();
        let handle = pool.schedule_once(Duration::from_millis(20), async move {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        handle.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_schedule_once_abort_cancels() {
        let pool = SchedulerPool::with_defaults();
        let fired = Arc::new(AtomicU32::new(0));

        let fired_clone = fired.clone();
        let handle = pool.schedule_once(Duration::from_millis(50), async move {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        handle.abort();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_pending_timers() {
        let pool = SchedulerPool::with_defaults();
        let fired = Arc::new(AtomicU32::new(0));

        let fired_clone = fired.clone();
        pool.schedule_once(Duration::from_millis(50), async move {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        pool.shutdown();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(pool.is_shutdown());
    }
}
