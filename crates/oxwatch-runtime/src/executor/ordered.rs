//! High and medium tiers.
//!
//! Both tiers share one key table so a key never runs on two workers at
//! once, even when it has work queued on both tiers. Within a tier, tasks
//! for a key run in submission order. Different keys run in parallel.

use super::config::{RejectionPolicy, TierConfig};
use super::stats::TierCounters;
use super::{Job, OrderingKey, Rejection, RejectionHandler, Tier};
use crate::error::{ExecutorError, Result};
use std::collections::{BTreeMap, HashMap, VecDeque};
use parking_lot::{Condvar, Mutex, MutexGuard};

pub(crate) const LANES: usize = 2;

pub(crate) fn lane_of(tier: Tier) -> Option<usize> {
    match tier {
        Tier::High => Some(0),
        Tier::Medium => Some(1),
        Tier::Low => None,
    }
}

fn tier_of(lane: usize) -> Tier {
    if lane == 0 {
        Tier::High
    } else {
        Tier::Medium
    }
}

struct QueuedJob {
    seq: u64,
    job: Job,
}

#[derive(Default)]
struct KeyQueue {
    pending: [VecDeque<QueuedJob>; LANES],
    in_ready: [bool; LANES],
    running: bool,
}

impl KeyQueue {
    fn is_idle(&self) -> bool {
        !self.running && self.pending.iter().all(VecDeque::is_empty)
    }
}

#[derive(Default)]
struct OrderedState {
    keys: HashMap<OrderingKey, KeyQueue>,
    // May hold stale or duplicate keys; `next_job` skips them.
    ready: [VecDeque<OrderingKey>; LANES],
    queued: [usize; LANES],
    // seq -> key of every queued job, used to find the oldest one to evict.
    by_age: [BTreeMap<u64, OrderingKey>; LANES],
    accepting: bool,
    stopping: bool,
    next_seq: u64,
}

impl OrderedState {
    fn next_job(&mut self, lane: usize) -> Option<(OrderingKey, Job)> {
        while let Some(key) = self.ready[lane].pop_front() {
            let Some(entry) = self.keys.get_mut(&key) else {
                continue;
            };
            entry.in_ready[lane] = false;
            if entry.running {
                continue;
            }
            let Some(queued) = entry.pending[lane].pop_front() else {
                continue;
            };
            entry.running = true;
            self.by_age[lane].remove(&queued.seq);
            self.queued[lane] -= 1;
            return Some((key, queued.job));
        }
        None
    }

    /// Marks `key` idle again and returns the lanes that got it back as ready.
    fn finish(&mut self, key: &OrderingKey) -> [bool; LANES] {
        let mut woken = [false; LANES];
        let Some(entry) = self.keys.get_mut(key) else {
            return woken;
        };
        entry.running = false;
        for (lane, wake) in woken.iter_mut().enumerate() {
            if !entry.pending[lane].is_empty() && !entry.in_ready[lane] {
                entry.in_ready[lane] = true;
                self.ready[lane].push_back(key.clone());
                *wake = true;
            }
        }
        if entry.is_idle() {
            self.keys.remove(key);
        }
        woken
    }

    fn evict_oldest(&mut self, lane: usize) -> Option<Job> {
        let (seq, key) = self.by_age[lane].pop_first()?;
        let entry = self.keys.get_mut(&key)?;
        // Per-key FIFO plus increasing seq means the globally oldest job is
        // at the front of its key's queue.
        let front = entry.pending[lane].pop_front()?;
        debug_assert_eq!(front.seq, seq);
        self.queued[lane] -= 1;
        if entry.is_idle() {
            self.keys.remove(&key);
        }
        Some(front.job)
    }

    fn clear_lane(&mut self, lane: usize) -> Vec<Job> {
        let mut discarded = Vec::with_capacity(self.queued[lane]);
        for entry in self.keys.values_mut() {
            discarded.extend(entry.pending[lane].drain(..).map(|q| q.job));
        }
        self.keys.retain(|_, entry| !entry.is_idle());
        self.ready[lane].clear();
        for entry in self.keys.values_mut() {
            entry.in_ready[lane] = false;
        }
        self.by_age[lane].clear();
        self.queued[lane] = 0;
        discarded
    }
}

pub(crate) struct OrderedLanes {
    state: Mutex<OrderedState>,
    work: [Condvar; LANES],
    configs: [TierConfig; LANES],
    counters: [TierCounters; LANES],
}

impl OrderedLanes {
    pub fn new(high: TierConfig, medium: TierConfig) -> Self {
        Self {
            state: Mutex::new(OrderedState::default()),
            work: [Condvar::new(), Condvar::new()],
            configs: [high, medium],
            counters: [TierCounters::default(), TierCounters::default()],
        }
    }

    fn lock(&self) -> MutexGuard<'_, OrderedState> {
        self.state.lock()
    }

    pub fn config(&self, lane: usize) -> &TierConfig {
        &self.configs[lane]
    }

    pub fn counters(&self, lane: usize) -> &TierCounters {
        &self.counters[lane]
    }

    pub fn open(&self) {
        self.lock().accepting = true;
    }

    pub fn queued(&self, lane: usize) -> usize {
        self.lock().queued[lane]
    }

    pub fn submit(
        &self,
        lane: usize,
        key: OrderingKey,
        job: Job,
        on_reject: &RejectionHandler,
    ) -> Result<()> {
        let tier = tier_of(lane);
        let config = &self.configs[lane];
        let counters = &self.counters[lane];
        let mut evicted = None;

        let mut state = self.lock();
        if !state.accepting {
            return Err(ExecutorError::ShuttingDown { tier });
        }
        counters.submitted();

        if let Some(capacity) = config.queue_capacity {
            if state.queued[lane] >= capacity {
                let policy = config.rejection_policy;
                if policy == RejectionPolicy::DropOldest && capacity > 0 {
                    evicted = state.evict_oldest(lane);
                    counters.dropped();
                } else {
                    drop(state);
                    counters.rejected();
                    on_reject(&Rejection {
                        tier,
                        key,
                        capacity,
                        policy,
                    });
                    return Err(ExecutorError::Saturated { tier, capacity });
                }
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let entry = state.keys.entry(key.clone()).or_default();
        entry.pending[lane].push_back(QueuedJob { seq, job });
        let schedule = !entry.running && !entry.in_ready[lane];
        if schedule {
            entry.in_ready[lane] = true;
        }
        state.by_age[lane].insert(seq, key.clone());
        state.queued[lane] += 1;
        if schedule {
            state.ready[lane].push_back(key.clone());
        }
        drop(state);

        if schedule {
            self.work[lane].notify_one();
        }
        if evicted.is_some() {
            tracing::warn!(
                tier = %tier,
                key = %key,
                "Tier queue full, dropped oldest queued task"
            );
        }
        Ok(())
    }

    /// Blocks until a job for `lane` is available. `None` means the worker
    /// should exit.
    pub fn take(&self, lane: usize) -> Option<(OrderingKey, Job)> {
        let mut state = self.lock();
        loop {
            if let Some(next) = state.next_job(lane) {
                return Some(next);
            }
            if state.stopping && state.queued[lane] == 0 {
                return None;
            }
            self.work[lane].wait(&mut state);
        }
    }

    pub fn finish(&self, key: &OrderingKey) {
        let woken = self.lock().finish(key);
        for (lane, wake) in woken.into_iter().enumerate() {
            if wake {
                self.work[lane].notify_one();
            }
        }
    }

    /// Stops admission. Lanes configured not to drain lose their queued jobs.
    pub fn shutdown(&self) -> usize {
        let mut discarded = Vec::new();
        {
            let mut state = self.lock();
            state.accepting = false;
            state.stopping = true;
            for lane in 0..LANES {
                if !self.configs[lane].drain_on_shutdown {
                    let jobs = state.clear_lane(lane);
                    self.counters[lane].cancelled(jobs.len() as u64);
                    discarded.extend(jobs);
                }
            }
        }
        self.wake_all();
        discarded.len()
    }

    /// Discards everything still queued on both lanes.
    pub fn cancel_all(&self) -> usize {
        let mut discarded = Vec::new();
        {
            let mut state = self.lock();
            state.accepting = false;
            state.stopping = true;
            for lane in 0..LANES {
                let jobs = state.clear_lane(lane);
                self.counters[lane].cancelled(jobs.len() as u64);
                discarded.extend(jobs);
            }
        }
        self.wake_all();
        discarded.len()
    }

    fn wake_all(&self) {
        for cv in &self.work {
            cv.notify_all();
        }
    }
}
