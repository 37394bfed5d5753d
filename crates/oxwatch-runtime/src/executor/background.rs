//! Low tier: unordered best-effort work on a crossbeam channel.

use super::config::{RejectionPolicy, TierConfig};
use super::stats::TierCounters;
use super::{Job, OrderingKey, Rejection, RejectionHandler, Tier};
use crate::error::{ExecutorError, Result};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

pub(crate) struct BackgroundLane {
    /// `None` before `open` and after shutdown. Dropping it lets workers
    /// drain the channel and exit.
    sender: Mutex<Option<Sender<Job>>>,
    unopened: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    config: TierConfig,
    counters: TierCounters,
}

impl BackgroundLane {
    pub fn new(config: TierConfig) -> Self {
        let (sender, receiver) = match config.queue_capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        Self {
            sender: Mutex::new(None),
            unopened: Mutex::new(Some(sender)),
            receiver,
            config,
            counters: TierCounters::default(),
        }
    }

    pub fn counters(&self) -> &TierCounters {
        &self.counters
    }

    pub fn open(&self) {
        if let Some(sender) = self.unopened.lock().take() {
            *self.sender.lock() = Some(sender);
        }
    }

    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// A receiver for one worker. It yields until the lane is shut down and
    /// the channel is empty.
    pub fn subscribe(&self) -> Receiver<Job> {
        self.receiver.clone()
    }

    pub fn submit(&self, key: OrderingKey, job: Job, on_reject: &RejectionHandler) -> Result<()> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(ExecutorError::ShuttingDown { tier: Tier::Low });
        };
        self.counters.submitted();

        let job = match sender.try_send(job) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Disconnected(_)) => {
                return Err(ExecutorError::ShuttingDown { tier: Tier::Low })
            }
            Err(TrySendError::Full(job)) => job,
        };

        let capacity = self.config.queue_capacity.unwrap_or_default();
        let policy = self.config.rejection_policy;
        if policy == RejectionPolicy::DropOldest && capacity > 0 {
            // The sender lock is held, so no other submitter can refill the
            // slot freed here.
            if self.receiver.try_recv().is_ok() {
                self.counters.dropped();
            }
            if let Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) = sender.try_send(job) {
                self.counters.rejected();
                return Err(ExecutorError::Saturated {
                    tier: Tier::Low,
                    capacity,
                });
            }
            return Ok(());
        }

        self.counters.rejected();
        on_reject(&Rejection {
            tier: Tier::Low,
            key,
            capacity,
            policy,
        });
        Err(ExecutorError::Saturated {
            tier: Tier::Low,
            capacity,
        })
    }

    pub fn shutdown(&self) -> usize {
        if self.config.drain_on_shutdown {
            self.close();
            0
        } else {
            self.cancel_all()
        }
    }

    pub fn cancel_all(&self) -> usize {
        self.close();
        let discarded = self.receiver.try_iter().count();
        self.counters.cancelled(discarded as u64);
        discarded
    }

    fn close(&self) {
        self.sender.lock().take();
        self.unopened.lock().take();
    }
}
