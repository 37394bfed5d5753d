use crate::config::EngineConfig;
use crate::error::Result;
use crate::instance::{ActiveAlarm, DetectorInstance, InstanceHost, InstanceId};
use crate::sink::AlarmSink;
use crate::store::DefinitionStore;
use crossbeam::utils::Backoff;
use oxwatch_common::time::Timestamp;
use oxwatch_common::types::{Sample, SignalId, SignalValue};
use oxwatch_runtime::{Clock, OrderingKey, TaskDispatcher, Tier, TimerHandle};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

/// Owns every live detector instance, grouped by signal.
///
/// All work for a signal is submitted to the executor under the signal id as
/// ordering key: samples and lifecycle changes on the high tier, timer
/// callbacks on the medium tier. Work for one signal is therefore sequential
/// while different signals run in parallel.
pub struct DetectorRegistry {
    inner: Arc<RegistryInner>,
}

struct SignalSlot {
    last: Option<Sample>,
    instances: Vec<DetectorInstance>,
}

struct RegistryInner {
    clock: Arc<dyn Clock>,
    dispatcher: Arc<dyn TaskDispatcher>,
    store: Arc<dyn DefinitionStore>,
    sink: Arc<dyn AlarmSink>,
    config: EngineConfig,
    // Slot mutexes are uncontended: the ordering key already serializes
    // access. They exist for the diagnostic queries and shutdown.
    signals: Mutex<HashMap<SignalId, Arc<Mutex<SignalSlot>>>>,
    next_instance: AtomicU64,
    closed: AtomicBool,
    this: Weak<RegistryInner>,
}

impl DetectorRegistry {
    pub fn new(
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn TaskDispatcher>,
        store: Arc<dyn DefinitionStore>,
        sink: Arc<dyn AlarmSink>,
        config: EngineConfig,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| RegistryInner {
            clock,
            dispatcher,
            store,
            sink,
            config,
            signals: Mutex::new(HashMap::new()),
            next_instance: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Creates one instance per definition of `signal` and evaluates each
    /// against the signal's last known value.
    pub fn signal_activated(&self, signal: &str, last: Option<Sample>) -> Result<()> {
        self.submit(signal, move |inner, signal| inner.activate(signal, last))
    }

    pub fn push_value(
        &self,
        signal: &str,
        value: impl Into<SignalValue>,
        timestamp: Timestamp,
    ) -> Result<()> {
        let sample = Sample::new(value, timestamp);
        self.submit(signal, move |inner, signal| inner.deliver(signal, sample))
    }

    /// Whether the sample tier can take another submission. Always true when
    /// the dispatcher does not bound it.
    pub fn has_capacity(&self) -> bool {
        self.inner
            .dispatcher
            .headroom(Tier::High)
            .map_or(true, |free| free > 0)
    }

    /// Blocks up to `timeout` until [`has_capacity`](Self::has_capacity).
    /// Producers that may outrun the executor call this before
    /// [`push_value`](Self::push_value) so a burst waits instead of hitting
    /// the sample tier's saturation policy.
    pub fn wait_for_capacity(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        while !self.has_capacity() {
            if Instant::now() >= deadline {
                return false;
            }
            if backoff.is_completed() {
                std::thread::sleep(Duration::from_millis(1));
            } else {
                backoff.snooze();
            }
        }
        true
    }

    /// Destroys every instance of `signal`, closing open alarms as
    /// deactivated.
    pub fn signal_deactivated(&self, signal: &str) -> Result<()> {
        self.submit(signal, |inner, signal| inner.deactivate(signal))
    }

    /// Destroys and recreates the instances of an active signal from the
    /// current definitions, carrying over the last value.
    pub fn reload_definitions(&self, signal: &str) -> Result<()> {
        self.submit(signal, |inner, signal| inner.reload(signal))
    }

    pub fn active_alarms(&self) -> Vec<ActiveAlarm> {
        let mut alarms: Vec<ActiveAlarm> = self
            .inner
            .slots()
            .iter()
            .flat_map(|slot| {
                lock_slot(slot)
                    .instances
                    .iter()
                    .filter_map(DetectorInstance::active_alarm)
                    .collect::<Vec<_>>()
            })
            .collect();
        alarms.sort_by(|a, b| {
            (&a.signal_id, &a.definition_id).cmp(&(&b.signal_id, &b.definition_id))
        });
        alarms
    }

    pub fn active_signals(&self) -> Vec<SignalId> {
        let mut signals: Vec<SignalId> = self.inner.lock_signals().keys().cloned().collect();
        signals.sort();
        signals
    }

    pub fn instance_count(&self) -> usize {
        self.inner
            .slots()
            .iter()
            .map(|slot| lock_slot(slot).instances.len())
            .sum()
    }

    /// Destroys every instance synchronously. Later submissions are ignored.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let slots: Vec<(SignalId, Arc<Mutex<SignalSlot>>)> =
            self.inner.lock_signals().drain().collect();
        let count = slots.len();
        for (signal, slot) in slots {
            self.inner.destroy_all(&signal, &slot);
        }
        tracing::info!(signals = count, "Detector registry shut down");
    }

    fn submit<F>(&self, signal: &str, work: F) -> Result<()>
    where
        F: FnOnce(&RegistryInner, &str) + Send + 'static,
    {
        let inner = self.inner.clone();
        let key = signal.to_string();
        self.inner.dispatcher.submit(
            Tier::High,
            OrderingKey::from(signal),
            Box::new(move || {
                if inner.closed.load(Ordering::SeqCst) {
                    tracing::debug!(signal_id = %key, "Registry closed, task ignored");
                    return;
                }
                work(&inner, &key);
            }),
        )?;
        Ok(())
    }
}

impl RegistryInner {
    fn lock_signals(&self) -> MutexGuard<'_, HashMap<SignalId, Arc<Mutex<SignalSlot>>>> {
        self.signals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot(&self, signal: &str) -> Option<Arc<Mutex<SignalSlot>>> {
        self.lock_signals().get(signal).cloned()
    }

    fn slots(&self) -> Vec<Arc<Mutex<SignalSlot>>> {
        self.lock_signals().values().cloned().collect()
    }

    fn host<'a>(&'a self, signal: &'a str) -> SignalHost<'a> {
        SignalHost {
            inner: self,
            signal,
        }
    }

    fn activate(&self, signal: &str, last: Option<Sample>) {
        if self.slot(signal).is_some() {
            tracing::debug!(signal_id = %signal, "Signal already active");
            return;
        }
        let definitions = match self.store.definitions_for(signal) {
            Ok(definitions) => definitions,
            Err(e) => {
                tracing::error!(signal_id = %signal, error = %e, "Failed to load detector definitions");
                return;
            }
        };

        let mut instances = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if definition.signal_id != signal {
                tracing::warn!(
                    signal_id = %signal,
                    definition_id = %definition.id,
                    bound_to = %definition.signal_id,
                    "Definition bound to another signal skipped"
                );
                continue;
            }
            let id = self.next_instance.fetch_add(1, Ordering::Relaxed);
            match DetectorInstance::new(id, Arc::new(definition), &self.config) {
                Ok(instance) => instances.push(instance),
                Err(e) => tracing::error!(signal_id = %signal, error = %e, "Detector not created"),
            }
        }

        let slot = Arc::new(Mutex::new(SignalSlot {
            last: last.clone(),
            instances,
        }));
        self.lock_signals().insert(signal.to_string(), slot.clone());

        let host = self.host(signal);
        let mut slot = lock_slot(&slot);
        for instance in slot.instances.iter_mut() {
            guarded(instance, "initialize", |i| i.initialize(last.as_ref(), &host));
        }
        tracing::info!(
            signal_id = %signal,
            detectors = slot.instances.len(),
            has_last_value = last.is_some(),
            "Signal activated"
        );
    }

    fn deliver(&self, signal: &str, sample: Sample) {
        let Some(slot) = self.slot(signal) else {
            tracing::debug!(signal_id = %signal, "Sample for inactive signal ignored");
            return;
        };
        let mut slot = lock_slot(&slot);
        if let Some(last) = &slot.last {
            if sample.timestamp <= last.timestamp {
                tracing::warn!(
                    signal_id = %signal,
                    timestamp = sample.timestamp,
                    last_timestamp = last.timestamp,
                    "Out-of-order sample discarded"
                );
                return;
            }
        }
        slot.last = Some(sample.clone());

        let host = self.host(signal);
        for instance in slot.instances.iter_mut() {
            guarded(instance, "sample", |i| i.on_sample(&sample, &host));
        }
    }

    fn fire_timer(&self, signal: &str, instance_id: InstanceId, at: Timestamp, epoch: u64) {
        let Some(slot) = self.slot(signal) else {
            tracing::debug!(signal_id = %signal, instance_id, "Timer for inactive signal ignored");
            return;
        };
        let mut slot = lock_slot(&slot);
        let Some(instance) = slot.instances.iter_mut().find(|i| i.id() == instance_id) else {
            tracing::debug!(signal_id = %signal, instance_id, "Timer for destroyed instance ignored");
            return;
        };
        let host = self.host(signal);
        guarded(instance, "timer", |i| i.on_timer(at, epoch, &host));
    }

    fn deactivate(&self, signal: &str) {
        let Some(slot) = self.lock_signals().remove(signal) else {
            tracing::debug!(signal_id = %signal, "Signal not active");
            return;
        };
        self.destroy_all(signal, &slot);
        tracing::info!(signal_id = %signal, "Signal deactivated");
    }

    fn destroy_all(&self, signal: &str, slot: &Mutex<SignalSlot>) {
        let host = self.host(signal);
        let mut slot = lock_slot(slot);
        for instance in slot.instances.iter_mut() {
            guarded(instance, "destroy", |i| i.destroy(&host));
        }
    }

    fn reload(&self, signal: &str) {
        let Some(slot) = self.slot(signal) else {
            tracing::debug!(signal_id = %signal, "Reload for inactive signal ignored");
            return;
        };
        let last = lock_slot(&slot).last.clone();
        self.deactivate(signal);
        self.activate(signal, last);
    }
}

/// Instance host bound to one signal.
struct SignalHost<'a> {
    inner: &'a RegistryInner,
    signal: &'a str,
}

impl InstanceHost for SignalHost<'_> {
    fn now(&self) -> Timestamp {
        self.inner.clock.now()
    }

    fn schedule(&self, instance: InstanceId, at: Timestamp, epoch: u64) -> TimerHandle {
        let registry = self.inner.this.clone();
        let signal = self.signal.to_string();
        self.inner.clock.schedule_at(
            at,
            Tier::Medium,
            OrderingKey::from(self.signal),
            Box::new(move || {
                if let Some(inner) = registry.upgrade() {
                    inner.fire_timer(&signal, instance, at, epoch);
                }
            }),
        )
    }

    fn sink(&self) -> &dyn AlarmSink {
        self.inner.sink.as_ref()
    }
}

fn lock_slot(slot: &Mutex<SignalSlot>) -> MutexGuard<'_, SignalSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs one instance operation, containing any panic to that instance.
fn guarded(instance: &mut DetectorInstance, operation: &str, f: impl FnOnce(&mut DetectorInstance)) {
    let outcome = catch_unwind(AssertUnwindSafe(|| f(&mut *instance)));
    if outcome.is_err() {
        tracing::error!(
            definition_id = %instance.definition().id,
            signal_id = %instance.definition().signal_id,
            operation,
            "Detector panicked; instance kept, siblings unaffected"
        );
    }
}
