//! Live schedule handles.
//!
//! Every repetitive job that is currently scheduled owns exactly one
//! [`ScheduledHandle`], keyed by external id in a [`HandleMap`]. Cancel is
//! cooperative: it flips a watch flag the ticker observes between ticks,
//! so an in-flight run always finishes.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{ForemanError, Result};

/// Cancellable reference to one scheduled repetitive job.
pub struct ScheduledHandle {
    cancel: watch::Sender<bool>,
    ticker: JoinHandle<()>,
    generation: u64,
}

impl ScheduledHandle {
    /// Signal the ticker to stop after the current tick.
    ///
    /// The ticker task is never aborted; it drains on its own once it
    /// observes the flag.
    fn cancel(self) {
        let _ = self.cancel.send(true);
    }

    /// Whether the ticker task has already finished.
    pub fn is_finished(&self) -> bool {
        self.ticker.is_finished()
    }
}

/// External id → live handle, with atomic insert-if-absent.
///
/// Each insert stamps its handle with a fresh generation, so a ticker that
/// outlived a cancel-and-resubmit cannot remove the successor's entry.
#[derive(Default)]
pub struct HandleMap {
    handles: DashMap<String, ScheduledHandle>,
    generations: AtomicU64,
}

impl HandleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new schedule under `external_id`.
    ///
    /// The ticker is spawned by `spawn` while the entry slot is held, so a
    /// concurrent submission for the same id cannot slip in between the
    /// conflict check and the insert. An id that already holds a live
    /// handle is rejected; callers must cancel first. Returns the
    /// generation stamped on the new handle, which `spawn` also receives.
    pub fn insert_with<F>(&self, external_id: &str, spawn: F) -> Result<u64>
    where
        F: FnOnce(watch::Receiver<bool>, u64) -> JoinHandle<()>,
    {
        match self.handles.entry(external_id.to_string()) {
            Entry::Occupied(_) => Err(ForemanError::schedule_conflict(external_id)),
            Entry::Vacant(slot) => {
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                let (cancel, observer) = watch::channel(false);
                let ticker = spawn(observer, generation);
                slot.insert(ScheduledHandle {
                    cancel,
                    ticker,
                    generation,
                });
                Ok(generation)
            }
        }
    }

    /// Cancel and remove a schedule. Returns false when no handle exists.
    pub fn cancel(&self, external_id: &str) -> bool {
        match self.handles.remove(external_id) {
            Some((_, handle)) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the handle stamped with `generation`, if it is still the one
    /// registered under `external_id`.
    ///
    /// Used when a ticker ends on its own (cron exhausted) or dispatch
    /// fails before release. A cancel racing the natural end may already
    /// have removed the entry and a resubmission inserted a new one; the
    /// generation check leaves that successor untouched. Returns whether
    /// an entry was removed.
    pub(crate) fn remove_generation(&self, external_id: &str, generation: u64) -> bool {
        self.handles
            .remove_if(external_id, |_, handle| handle.generation == generation)
            .is_some()
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.handles.contains_key(external_id)
    }

    /// Number of live schedules.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// External ids of every live schedule, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Cancel every schedule. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let ids = self.ids();
        let mut signalled = 0;
        for id in ids {
            if self.cancel(&id) {
                signalled += 1;
            }
        }
        signalled
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
