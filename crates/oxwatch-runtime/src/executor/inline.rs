//! Caller-runs dispatcher for simulation and tests.

use super::stats::TierCounters;
use super::{run_guarded, Job, OrderingKey, TaskDispatcher, Tier, TierStats};
use crate::error::Result;
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Runs every submitted task on the submitting thread, in FIFO order.
///
/// A task submitted while another is running is queued and runs after it,
/// so nested submissions keep submission order instead of recursing. Pair it
/// with [`SimulatedClock`](crate::clock::SimulatedClock) for fully
/// deterministic runs. Not meant to be shared between threads that submit
/// concurrently.
#[derive(Default)]
pub struct InlineExecutor {
    queue: Mutex<VecDeque<(Tier, OrderingKey, Job)>>,
    draining: AtomicBool,
    counters: TierCounters,
}

impl InlineExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<(Tier, OrderingKey, Job)>> {
        self.queue.lock()
    }

    /// Counters across all tiers.
    pub fn stats(&self) -> TierStats {
        self.counters.snapshot()
    }

    fn drain(&self) {
        loop {
            loop {
                let next = self.lock().pop_front();
                let Some((tier, key, job)) = next else { break };
                run_guarded(tier, Some(&key), job, &self.counters);
            }
            self.draining.store(false, Ordering::SeqCst);
            if self.lock().is_empty() || self.draining.swap(true, Ordering::SeqCst) {
                return;
            }
        }
    }
}

impl TaskDispatcher for InlineExecutor {
    fn submit(&self, tier: Tier, key: OrderingKey, job: Job) -> Result<()> {
        self.counters.submitted();
        self.lock().push_back((tier, key, job));
        if !self.draining.swap(true, Ordering::SeqCst) {
            self.drain();
        }
        Ok(())
    }
}
