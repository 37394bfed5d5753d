use super::{Clock, TimerHandle, TimerQueue};
use crate::executor::{Job, OrderingKey, Tier};
use oxwatch_common::time::Timestamp;
use parking_lot::{Mutex, MutexGuard};

struct SimState {
    now: Timestamp,
    timers: TimerQueue,
}

/// Manually advanced clock for deterministic runs.
///
/// Timers fire synchronously inside [`advance_to`](Self::advance_to) on the
/// calling thread, ignoring tier and key. A body that schedules another
/// timer due before the target time sees it fire within the same call.
pub struct SimulatedClock {
    state: Mutex<SimState>,
}

impl SimulatedClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            state: Mutex::new(SimState {
                now: start,
                timers: TimerQueue::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock()
    }

    /// Fires every due timer in deadline order, then leaves `now` at `target`.
    /// Moving backwards is ignored. Returns the number of timers fired.
    pub fn advance_to(&self, target: Timestamp) -> usize {
        let mut fired = 0;
        loop {
            let entry = {
                let mut state = self.lock();
                match state.timers.pop_due(target) {
                    Some(entry) => {
                        state.now = state.now.max(entry.handle.execute_at());
                        entry
                    }
                    None => {
                        state.now = state.now.max(target);
                        return fired;
                    }
                }
            };
            if entry.handle.try_fire() {
                fired += 1;
                (entry.body)();
            }
        }
    }

    pub fn advance_by(&self, delta_ms: i64) -> usize {
        let target = self.now().saturating_add(delta_ms.max(0));
        self.advance_to(target)
    }

    /// Timers scheduled and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.lock().timers.live()
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.lock().timers.next_deadline()
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Timestamp {
        self.lock().now
    }

    fn schedule_at(
        &self,
        execute_at: Timestamp,
        tier: Tier,
        key: OrderingKey,
        body: Job,
    ) -> TimerHandle {
        self.lock().timers.push(execute_at, tier, key, body)
    }
}
