//! Grouping / debounce engine.
//!
//! Coalesces bursts of same-key submissions into one representative
//! execution. The first append to a group's one-time or repetitive list
//! tells the caller to arm a one-shot flush timer; when a timer fires the
//! whole group is removed in one step and only the first record of each
//! non-empty list is dispatched, annotated with how many submissions it
//! represents. Everything after the first is absorbed, counted but never
//! executed.
//!
//! The engine owns no timers and never dispatches; it is a concurrent
//! buffer with atomic teardown. Late appends that race a flush observe the
//! closed flag under the group lock and retry against a fresh group, so no
//! record is silently lost.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::GroupingConfig;
use crate::jobs::{JobKind, JobRecord};

// ═══════════════════════════════════════════════════════════════════════════════
// Group State
// ═══════════════════════════════════════════════════════════════════════════════

/// One debounce window's worth of buffered submissions for a key.
struct JobGroup {
    one_time: Vec<JobRecord>,
    repetitive: Vec<JobRecord>,
    /// Set during teardown; appends that see it retry on a fresh group
    closed: bool,
    created_at: Instant,
}

impl JobGroup {
    fn new() -> Self {
        Self {
            one_time: Vec::new(),
            repetitive: Vec::new(),
            closed: false,
            created_at: Instant::now(),
        }
    }

    fn list_mut(&mut self, kind: JobKind) -> &mut Vec<JobRecord> {
        match kind {
            JobKind::OneTime => &mut self.one_time,
            JobKind::Repetitive => &mut self.repetitive,
        }
    }

    fn len(&self) -> usize {
        self.one_time.len() + self.repetitive.len()
    }
}

/// What the caller should do after an append.
#[derive(Debug, Clone)]
pub struct AppendDisposition {
    /// This record opened its list; arm a flush timer for the window
    pub first_in_list: bool,
    /// Buffer window for the timer
    pub window: Duration,
    /// Records buffered in the group after this append
    pub group_size: usize,
}

/// A torn-down group, ready for representative dispatch.
#[derive(Debug)]
pub struct FlushedGroup {
    pub key: String,
    pub one_time: Vec<JobRecord>,
    pub repetitive: Vec<JobRecord>,
}

impl FlushedGroup {
    /// First record of each non-empty list with the count it represents.
    pub fn representatives(self) -> Vec<(JobRecord, usize)> {
        let mut reps = Vec::with_capacity(2);
        for list in [self.one_time, self.repetitive] {
            let represented = list.len();
            if let Some(first) = list.into_iter().next() {
                reps.push((first, represented));
            }
        }
        reps
    }

    pub fn total(&self) -> usize {
        self.one_time.len() + self.repetitive.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════════

/// Grouping statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GroupingStats {
    pub active_groups: usize,
    pub buffered_one_time: usize,
    pub buffered_repetitive: usize,
    pub groups_created_total: u64,
    pub appended_total: u64,
    pub flushed_groups_total: u64,
    pub representatives_total: u64,
    pub absorbed_total: u64,
}

/// Concurrent debounce buffer keyed by group key.
pub struct GroupingEngine {
    config: GroupingConfig,
    groups: DashMap<String, Arc<Mutex<JobGroup>>>,
    groups_created: AtomicU64,
    appended: AtomicU64,
    flushed_groups: AtomicU64,
    representatives: AtomicU64,
    absorbed: AtomicU64,
}

impl GroupingEngine {
    /// Create an engine from configuration.
    pub fn new(config: GroupingConfig) -> Self {
        Self {
            config,
            groups: DashMap::new(),
            groups_created: AtomicU64::new(0),
            appended: AtomicU64::new(0),
            flushed_groups: AtomicU64::new(0),
            representatives: AtomicU64::new(0),
            absorbed: AtomicU64::new(0),
        }
    }

    /// Buffer window for a record, falling back to the configured default.
    pub fn window_for(&self, record: &JobRecord) -> Duration {
        Duration::from_millis(
            record
                .group_buffer_ms
                .unwrap_or(self.config.default_buffer_ms),
        )
    }

    /// Append a record to the group for `key`.
    ///
    /// The first-in-list check and the append itself happen under the group
    /// lock, so exactly one caller per list per window is told to arm the
    /// timer. If a flush tears the group down between lookup and lock, the
    /// append retries against a fresh group.
    pub fn append(&self, key: &str, record: JobRecord) -> AppendDisposition {
        let window = self.window_for(&record);
        let kind = record.kind;

        loop {
            let group = self
                .groups
                .entry(key.to_string())
                .or_insert_with(|| {
                    self.groups_created.fetch_add(1, Ordering::Relaxed);
                    Arc::new(Mutex::new(JobGroup::new()))
                })
                .clone();

            let mut guard = group.lock();
            if guard.closed {
                // Lost the race with a flush; the map entry is gone too.
                continue;
            }

            let list = guard.list_mut(kind);
            let first_in_list = list.is_empty();
            list.push(record);

            self.appended.fetch_add(1, Ordering::Relaxed);
            let group_size = guard.len();

            tracing::debug!(
                group_key = key,
                kind = %kind,
                first_in_list,
                group_size,
                "Buffered grouped submission"
            );

            return AppendDisposition {
                first_in_list,
                window,
                group_size,
            };
        }
    }

    /// Tear down the group for `key` and hand back its buffered records.
    ///
    /// Returns `None` when another timer already flushed it. The closed
    /// flag is set under the lock after the map removal, which is what
    /// makes racing appends start a fresh group instead of feeding a dead
    /// one.
    pub fn take(&self, key: &str) -> Option<FlushedGroup> {
        let (_, group) = self.groups.remove(key)?;
        let mut guard = group.lock();
        guard.closed = true;

        let one_time = std::mem::take(&mut guard.one_time);
        let repetitive = std::mem::take(&mut guard.repetitive);

        let representatives =
            usize::from(!one_time.is_empty()) + usize::from(!repetitive.is_empty());
        let absorbed = (one_time.len() + repetitive.len()) - representatives;

        self.flushed_groups.fetch_add(1, Ordering::Relaxed);
        self.representatives
            .fetch_add(representatives as u64, Ordering::Relaxed);
        self.absorbed.fetch_add(absorbed as u64, Ordering::Relaxed);
        if absorbed > 0 {
            counter!("foreman_grouped_absorbed_total", "group_key" => key.to_string())
                .increment(absorbed as u64);
        }

        tracing::info!(
            group_key = key,
            one_time = one_time.len(),
            repetitive = repetitive.len(),
            absorbed,
            age_ms = guard.created_at.elapsed().as_millis() as u64,
            "Flushed group"
        );

        Some(FlushedGroup {
            key: key.to_string(),
            one_time,
            repetitive,
        })
    }

    /// Number of groups currently buffering.
    pub fn active_groups(&self) -> usize {
        self.groups.len()
    }

    /// Snapshot counters and current buffer occupancy.
    pub fn stats(&self) -> GroupingStats {
        let mut buffered_one_time = 0;
        let mut buffered_repetitive = 0;
        for group in self.groups.iter() {
            let guard = group.value().lock();
            buffered_one_time += guard.one_time.len();
            buffered_repetitive += guard.repetitive.len();
        }

        GroupingStats {
            active_groups: self.groups.len(),
            buffered_one_time,
            buffered_repetitive,
            groups_created_total: self.groups_created.load(Ordering::Relaxed),
            appended_total: self.appended.load(Ordering::Relaxed),
            flushed_groups_total: self.flushed_groups.load(Ordering::Relaxed),
            representatives_total: self.representatives.load(Ordering::Relaxed),
            absorbed_total: self.absorbed.load(Ordering::Relaxed),
        }
    }
}
