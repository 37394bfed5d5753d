use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one tier.
#[derive(Debug, Default)]
pub(crate) struct TierCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    cancelled: AtomicU64,
    panicked: AtomicU64,
}

impl TierCounters {
    pub fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cancelled(&self, n: u64) {
        self.cancelled.fetch_add(n, Ordering::Relaxed);
    }

    pub fn panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TierStats {
        TierStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a tier's counters.
///
/// `submitted` counts every admission attempt, so
/// `submitted == completed + panicked + rejected + dropped + cancelled + queued`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub submitted: u64,
    pub completed: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub cancelled: u64,
    pub panicked: u64,
}
