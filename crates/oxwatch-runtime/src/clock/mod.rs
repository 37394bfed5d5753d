//! Time source and cancellable delayed execution.

mod real;
mod simulated;

pub use real::RealTimeClock;
pub use simulated::SimulatedClock;

use crate::executor::{Job, OrderingKey, Tier};
use oxwatch_common::time::Timestamp;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Monotonic time plus timers.
///
/// Detector instances never read the wall clock directly. They get a
/// `Clock` at construction so tests can drive time with [`SimulatedClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    /// Runs `body` at `execute_at` on `tier`, serialized under `key`.
    /// Deadlines in the past fire as soon as the clock next checks.
    fn schedule_at(
        &self,
        execute_at: Timestamp,
        tier: Tier,
        key: OrderingKey,
        body: Job,
    ) -> TimerHandle;

    fn schedule(&self, delay_ms: i64, tier: Tier, key: OrderingKey, body: Job) -> TimerHandle {
        let at = self.now().saturating_add(delay_ms.max(0));
        self.schedule_at(at, tier, key, body)
    }

    /// Returns `true` if the timer had not fired yet and now never will.
    fn cancel(&self, handle: &TimerHandle) -> bool {
        handle.cancel()
    }
}

const PENDING: u8 = 0;
const CANCELLED: u8 = 1;
const FIRED: u8 = 2;

#[derive(Debug)]
struct TimerState {
    id: u64,
    execute_at: Timestamp,
    status: AtomicU8,
}

/// Handle to a scheduled timer. Cancelling and firing are mutually
/// exclusive: exactly one of them wins.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    state: Arc<TimerState>,
}

impl TimerHandle {
    fn new(id: u64, execute_at: Timestamp) -> Self {
        Self {
            state: Arc::new(TimerState {
                id,
                execute_at,
                status: AtomicU8::new(PENDING),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn execute_at(&self) -> Timestamp {
        self.state.execute_at
    }

    pub fn cancel(&self) -> bool {
        self.transition(CANCELLED)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.status.load(Ordering::Acquire) == CANCELLED
    }

    pub fn is_pending(&self) -> bool {
        self.state.status.load(Ordering::Acquire) == PENDING
    }

    pub(crate) fn try_fire(&self) -> bool {
        self.transition(FIRED)
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .status
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub(crate) struct TimerEntry {
    pub handle: TimerHandle,
    pub tier: Tier,
    pub key: OrderingKey,
    pub body: Job,
}

impl TimerEntry {
    fn sort_key(&self) -> (Timestamp, u64) {
        (self.handle.execute_at(), self.handle.id())
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Deadline-ordered timer heap. Ties fire in scheduling order because ids
/// increase monotonically.
#[derive(Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    next_id: u64,
}

// Cancelled entries stay in the heap until due; purge once they pile up.
const PURGE_THRESHOLD: usize = 4096;

impl TimerQueue {
    pub fn push(&mut self, execute_at: Timestamp, tier: Tier, key: OrderingKey, body: Job) -> TimerHandle {
        let handle = TimerHandle::new(self.next_id, execute_at);
        self.next_id += 1;
        self.heap.push(Reverse(TimerEntry {
            handle: handle.clone(),
            tier,
            key,
            body,
        }));
        if self.heap.len() > PURGE_THRESHOLD && self.heap.len() % PURGE_THRESHOLD == 0 {
            self.heap.retain(|Reverse(entry)| entry.handle.is_pending());
        }
        handle
    }

    /// Pops the earliest live entry due at or before `now`.
    pub fn pop_due(&mut self, now: Timestamp) -> Option<TimerEntry> {
        loop {
            let Reverse(head) = self.heap.peek()?;
            if !head.handle.is_pending() {
                self.heap.pop();
                continue;
            }
            if head.handle.execute_at() > now {
                return None;
            }
            return self.heap.pop().map(|Reverse(entry)| entry);
        }
    }

    /// Deadline of the earliest live entry.
    pub fn next_deadline(&mut self) -> Option<Timestamp> {
        loop {
            let Reverse(head) = self.heap.peek()?;
            if head.handle.is_pending() {
                return Some(head.handle.execute_at());
            }
            self.heap.pop();
        }
    }

    pub fn live(&self) -> usize {
        self.heap
            .iter()
            .filter(|Reverse(entry)| entry.handle.is_pending())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_and_fire_are_exclusive() {
        let handle = TimerHandle::new(1, 10);
        assert!(handle.cancel());
        assert!(!handle.try_fire());
        assert!(!handle.cancel());

        let handle = TimerHandle::new(2, 10);
        assert!(handle.try_fire());
        assert!(!handle.cancel());
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn queue_orders_by_deadline_then_submission() {
        let mut queue = TimerQueue::default();
        let late = queue.push(20, Tier::Medium, "a".into(), Box::new(|| {}));
        let first = queue.push(10, Tier::Medium, "a".into(), Box::new(|| {}));
        let second = queue.push(10, Tier::Medium, "b".into(), Box::new(|| {}));

        assert_eq!(queue.next_deadline(), Some(10));
        assert_eq!(queue.pop_due(15).map(|e| e.handle.id()), Some(first.id()));
        assert_eq!(queue.pop_due(15).map(|e| e.handle.id()), Some(second.id()));
        assert!(queue.pop_due(15).is_none());
        assert!(late.cancel());
        assert_eq!(queue.next_deadline(), None);
        assert_eq!(queue.live(), 0);
    }
}
