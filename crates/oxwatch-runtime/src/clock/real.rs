use super::{Clock, TimerHandle, TimerQueue};
use crate::error::Result;
use crate::executor::{Job, OrderingKey, TaskDispatcher, Tier};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use oxwatch_common::time::{wall_clock_now, Timestamp};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

struct Shared {
    timers: Mutex<TimerQueue>,
    dispatcher: Arc<dyn TaskDispatcher>,
}

/// Wall-clock [`Clock`]. A dedicated thread sleeps until the next deadline
/// and hands due bodies to the dispatcher on their tier and key. The body
/// itself never runs on the timer thread.
pub struct RealTimeClock {
    shared: Arc<Shared>,
    /// Rung on every schedule so the thread re-reads the earliest deadline.
    /// Dropping it stops the thread.
    doorbell: Mutex<Option<Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RealTimeClock {
    pub fn start(dispatcher: Arc<dyn TaskDispatcher>) -> Result<Self> {
        let shared = Arc::new(Shared {
            timers: Mutex::new(TimerQueue::default()),
            dispatcher,
        });
        let (doorbell, rings) = bounded(1);
        let worker = shared.clone();
        let thread = std::thread::Builder::new()
            .name("oxwatch-timer".to_string())
            .spawn(move || timer_loop(&worker, &rings))?;
        tracing::debug!("Real-time clock started");
        Ok(Self {
            shared,
            doorbell: Mutex::new(Some(doorbell)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Stops the timer thread. Timers still pending are abandoned.
    pub fn stop(&self) {
        self.doorbell.lock().take();
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Timer thread panicked");
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.shared.timers.lock().live()
    }
}

impl Clock for RealTimeClock {
    fn now(&self) -> Timestamp {
        wall_clock_now()
    }

    fn schedule_at(
        &self,
        execute_at: Timestamp,
        tier: Tier,
        key: OrderingKey,
        body: Job,
    ) -> TimerHandle {
        let handle = self.shared.timers.lock().push(execute_at, tier, key, body);
        if let Some(doorbell) = self.doorbell.lock().as_ref() {
            // A full doorbell already guarantees a re-read.
            let _ = doorbell.try_send(());
        }
        handle
    }
}

impl Drop for RealTimeClock {
    fn drop(&mut self) {
        self.stop();
    }
}

fn timer_loop(shared: &Shared, rings: &Receiver<()>) {
    loop {
        if let Err(TryRecvError::Disconnected) = rings.try_recv() {
            return;
        }

        let now = wall_clock_now();
        let (due, next) = {
            let mut timers = shared.timers.lock();
            let mut due = Vec::new();
            while let Some(entry) = timers.pop_due(now) {
                due.push(entry);
            }
            (due, timers.next_deadline())
        };

        if due.is_empty() {
            let woken = match next {
                Some(at) => {
                    rings.recv_timeout(Duration::from_millis(at.saturating_sub(now).max(1) as u64))
                }
                None => rings.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            if let Err(RecvTimeoutError::Disconnected) = woken {
                return;
            }
            continue;
        }

        for entry in due {
            if !entry.handle.try_fire() {
                continue;
            }
            let tier = entry.tier;
            let key = entry.key.clone();
            if let Err(e) = shared.dispatcher.submit(entry.tier, entry.key, entry.body) {
                tracing::warn!(tier = %tier, key = %key, error = %e, "Timer task not dispatched");
            }
        }
    }
}
