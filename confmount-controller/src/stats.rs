//! Counters owned by one controller instance.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct ControllerStats {
    acknowledged: AtomicU64,
    performed: AtomicU64,
    unchanged: AtomicU64,
    hook_runs: AtomicU64,
    failures: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`ControllerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Changes that passed the detector and were enqueued.
    pub acknowledged: u64,
    /// Publishes that swapped new content in.
    pub performed: u64,
    /// Publishes skipped because the mount already held the payload.
    pub unchanged: u64,
    pub hook_runs: u64,
    /// Failed processing attempts.
    pub failures: u64,
    /// Keys given up after exhausting retries.
    pub dropped: u64,
}

impl ControllerStats {
    pub(crate) fn acknowledge(&self) -> u64 {
        self.acknowledged.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn perform(&self) -> u64 {
        self.performed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn skip(&self) -> u64 {
        self.unchanged.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn hook_ran(&self) {
        self.hook_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fail(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn drop_key(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            performed: self.performed.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            hook_runs: self.hook_runs.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
