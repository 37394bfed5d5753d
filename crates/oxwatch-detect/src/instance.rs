//! Runtime state of one detector definition bound to one signal.
//!
//! Every condition detector shares the same lifecycle:
//!
//! ```text
//! INACTIVE --true--> PENDING --confirmed--> ACTIVE --false--> INACTIVE
//!              \                                   \
//!               `--true, no duration--> ACTIVE      `--destroy--> INACTIVE (DEACTIVATED)
//! ```
//!
//! An instance holds at most one timer. It fires at the earlier of the
//! confirmation deadline and the detector's own re-check time. Each re-arm
//! bumps the instance epoch, and a firing whose epoch no longer matches is
//! ignored.

use crate::config::EngineConfig;
use crate::definition::DetectorDefinition;
use crate::detectors::{Algorithm, Evaluation};
use crate::error::Result;
use crate::sink::AlarmSink;
use oxwatch_common::time::Timestamp;
use oxwatch_common::types::{AlarmEvent, AlarmLevel, DefinitionId, EventId, RtnCause, Sample, SignalId};
use oxwatch_runtime::TimerHandle;
use serde::Serialize;
use std::sync::Arc;

pub type InstanceId = u64;

/// Services an instance needs from whoever owns it.
pub trait InstanceHost {
    fn now(&self) -> Timestamp;

    /// Arranges for [`DetectorInstance::on_timer`] to run with `(at, epoch)`
    /// on instance `instance`, serialized with its samples.
    fn schedule(&self, instance: InstanceId, at: Timestamp, epoch: u64) -> TimerHandle;

    fn sink(&self) -> &dyn AlarmSink;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Inactive,
    Pending,
    Active,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "INACTIVE"),
            Self::Pending => write!(f, "PENDING"),
            Self::Active => write!(f, "ACTIVE"),
        }
    }
}

/// Diagnostic view of an active instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveAlarm {
    pub instance_id: InstanceId,
    pub definition_id: DefinitionId,
    pub signal_id: SignalId,
    pub level: AlarmLevel,
    pub active_since: Timestamp,
    pub event_id: EventId,
}

pub struct DetectorInstance {
    id: InstanceId,
    definition: Arc<DetectorDefinition>,
    algorithm: Algorithm,
    state: LifecycleState,
    pending_since: Option<Timestamp>,
    confirm_at: Option<Timestamp>,
    recheck_at: Option<Timestamp>,
    active_since: Option<Timestamp>,
    event_id: Option<EventId>,
    timer: Option<TimerHandle>,
    epoch: u64,
    last: Option<Sample>,
    destroyed: bool,
}

impl DetectorInstance {
    /// Validates the definition; an invalid one never yields an instance.
    pub fn new(
        id: InstanceId,
        definition: Arc<DetectorDefinition>,
        config: &EngineConfig,
    ) -> Result<Self> {
        definition.validate()?;
        let algorithm = Algorithm::for_definition(&definition, config);
        Ok(Self {
            id,
            definition,
            algorithm,
            state: LifecycleState::Inactive,
            pending_since: None,
            confirm_at: None,
            recheck_at: None,
            active_since: None,
            event_id: None,
            timer: None,
            epoch: 0,
            last: None,
            destroyed: false,
        })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn definition(&self) -> &DetectorDefinition {
        &self.definition
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn pending_since(&self) -> Option<Timestamp> {
        self.pending_since
    }

    pub fn event_id(&self) -> Option<EventId> {
        self.event_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn last_sample(&self) -> Option<&Sample> {
        self.last.as_ref()
    }

    /// Deadline of the outstanding timer, if any.
    pub fn timer_deadline(&self) -> Option<Timestamp> {
        self.timer
            .as_ref()
            .filter(|timer| timer.is_pending())
            .map(TimerHandle::execute_at)
    }

    pub fn active_alarm(&self) -> Option<ActiveAlarm> {
        if self.state != LifecycleState::Active {
            return None;
        }
        Some(ActiveAlarm {
            instance_id: self.id,
            definition_id: self.definition.id.clone(),
            signal_id: self.definition.signal_id.clone(),
            level: self.definition.level,
            active_since: self.active_since?,
            event_id: self.event_id?,
        })
    }

    /// Evaluates the signal's existing value once, before any live update.
    /// Notification kinds only remember it.
    pub fn initialize(&mut self, last: Option<&Sample>, host: &dyn InstanceHost) {
        let Some(sample) = last else {
            tracing::debug!(
                definition_id = %self.definition.id,
                "Detector started without a last value"
            );
            return;
        };
        self.last = Some(sample.clone());
        match &mut self.algorithm {
            Algorithm::Notify(detector) => detector.prime(sample),
            Algorithm::Condition(detector) => {
                let eval = detector.evaluate(sample);
                self.apply(eval, sample.timestamp, host);
                self.rearm(host);
            }
        }
    }

    pub fn on_sample(&mut self, sample: &Sample, host: &dyn InstanceHost) {
        if self.destroyed {
            return;
        }
        self.last = Some(sample.clone());
        if matches!(self.algorithm, Algorithm::Condition(_)) {
            self.catch_up(sample.timestamp, host);
        }
        match &mut self.algorithm {
            Algorithm::Notify(detector) => {
                if detector.observe(sample) {
                    self.notify(sample, host);
                }
            }
            Algorithm::Condition(detector) => {
                let eval = detector.evaluate(sample);
                tracing::debug!(
                    definition_id = %self.definition.id,
                    value = %sample.value,
                    timestamp = sample.timestamp,
                    condition = eval.condition,
                    state = %self.state,
                    "Sample evaluated"
                );
                self.apply(eval, sample.timestamp, host);
                self.rearm(host);
            }
        }
    }

    /// Timer callback. `at` is the scheduled deadline and is used as the
    /// evaluation time.
    pub fn on_timer(&mut self, at: Timestamp, epoch: u64, host: &dyn InstanceHost) {
        if self.destroyed || epoch != self.epoch {
            tracing::debug!(
                definition_id = %self.definition.id,
                epoch,
                current = self.epoch,
                "Stale timer ignored"
            );
            return;
        }
        self.timer = None;
        self.run_due(at, host);
        self.rearm(host);
    }

    /// Confirmation or re-check still owed at or before `until`. A sample can
    /// reach the instance before the timer covering an earlier deadline
    /// does, so that work runs first, each step at its own deadline.
    fn catch_up(&mut self, until: Timestamp, host: &dyn InstanceHost) {
        let mut last = None;
        while let Some(due) = self.next_due() {
            if due > until || last.is_some_and(|l| due <= l) {
                break;
            }
            tracing::debug!(
                definition_id = %self.definition.id,
                due,
                sample_timestamp = until,
                "Running overdue timer work before sample"
            );
            self.run_due(due, host);
            last = Some(due);
        }
    }

    fn next_due(&self) -> Option<Timestamp> {
        let confirm_at = self.confirm_at.filter(|_| self.state == LifecycleState::Pending);
        match (confirm_at, self.recheck_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn run_due(&mut self, at: Timestamp, host: &dyn InstanceHost) {
        if self.state == LifecycleState::Pending && self.confirm_at.is_some_and(|c| c <= at) {
            if let Some(since) = self.pending_since {
                self.activate(since, host);
            }
        }

        if self.recheck_at.is_some_and(|r| r <= at) {
            self.recheck_at = None;
            if let Algorithm::Condition(detector) = &mut self.algorithm {
                if let Some(eval) = detector.recheck(at) {
                    self.apply(eval, at, host);
                }
            }
        }
    }

    /// Cancels the timer and closes an open alarm as deactivated.
    pub fn destroy(&mut self, host: &dyn InstanceHost) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.cancel_timer();
        self.epoch = self.epoch.wrapping_add(1);
        self.recheck_at = None;
        match self.state {
            LifecycleState::Active => {
                let at = host.now().max(self.active_since.unwrap_or(Timestamp::MIN));
                self.close(at, RtnCause::Deactivated, host);
            }
            LifecycleState::Pending => self.clear_pending(),
            LifecycleState::Inactive => {}
        }
    }

    fn apply(&mut self, eval: Evaluation, at: Timestamp, host: &dyn InstanceHost) {
        self.recheck_at = eval.recheck_at;
        if eval.condition {
            if self.state != LifecycleState::Inactive {
                return;
            }
            let since = eval.since.unwrap_or(at);
            let confirm_ms = self.definition.confirmation_ms();
            if confirm_ms == 0 {
                self.activate(since, host);
                return;
            }
            let confirm_at = since.saturating_add(confirm_ms);
            if confirm_at <= at {
                self.activate(since, host);
                return;
            }
            self.state = LifecycleState::Pending;
            self.pending_since = Some(since);
            self.confirm_at = Some(confirm_at);
            tracing::debug!(
                definition_id = %self.definition.id,
                pending_since = since,
                confirm_at,
                "Condition true, awaiting confirmation"
            );
        } else {
            match self.state {
                LifecycleState::Pending => {
                    tracing::debug!(
                        definition_id = %self.definition.id,
                        at,
                        "Condition cleared before confirmation"
                    );
                    self.clear_pending();
                }
                LifecycleState::Active => self.close(at, RtnCause::ReturnToNormal, host),
                LifecycleState::Inactive => {}
            }
        }
    }

    fn activate(&mut self, since: Timestamp, host: &dyn InstanceHost) {
        self.clear_pending();
        let event = self.event(since, true);
        match host.sink().raise(&event) {
            Ok(event_id) => {
                self.state = LifecycleState::Active;
                self.event_id = Some(event_id);
                self.active_since = Some(since);
                tracing::info!(
                    definition_id = %self.definition.id,
                    signal_id = %self.definition.signal_id,
                    level = %self.definition.level,
                    active_timestamp = since,
                    event_id,
                    "Alarm raised"
                );
            }
            Err(e) => {
                tracing::error!(
                    definition_id = %self.definition.id,
                    signal_id = %self.definition.signal_id,
                    error = %e,
                    "Alarm sink failed to raise; alarm lost"
                );
            }
        }
    }

    fn close(&mut self, at: Timestamp, cause: RtnCause, host: &dyn InstanceHost) {
        self.state = LifecycleState::Inactive;
        self.active_since = None;
        let Some(event_id) = self.event_id.take() else {
            return;
        };
        match host.sink().return_to_normal(event_id, at, cause) {
            Ok(()) => tracing::info!(
                definition_id = %self.definition.id,
                signal_id = %self.definition.signal_id,
                event_id,
                rtn_timestamp = at,
                cause = %cause,
                "Alarm cleared"
            ),
            Err(e) => tracing::error!(
                definition_id = %self.definition.id,
                event_id,
                error = %e,
                "Alarm sink failed to clear"
            ),
        }
    }

    fn notify(&mut self, sample: &Sample, host: &dyn InstanceHost) {
        let event = self.event(sample.timestamp, false);
        match host.sink().raise(&event) {
            Ok(event_id) => tracing::info!(
                definition_id = %self.definition.id,
                signal_id = %self.definition.signal_id,
                value = %sample.value,
                event_id,
                "Notification raised"
            ),
            Err(e) => tracing::error!(
                definition_id = %self.definition.id,
                error = %e,
                "Alarm sink failed to raise notification"
            ),
        }
    }

    fn event(&self, active_timestamp: Timestamp, rtn_applicable: bool) -> AlarmEvent {
        AlarmEvent {
            definition_id: self.definition.id.clone(),
            signal_id: self.definition.signal_id.clone(),
            level: self.definition.level,
            active_timestamp,
            rtn_applicable,
            rtn_timestamp: None,
            rtn_cause: None,
        }
    }

    fn clear_pending(&mut self) {
        if self.state == LifecycleState::Pending {
            self.state = LifecycleState::Inactive;
        }
        self.pending_since = None;
        self.confirm_at = None;
    }

    /// Keeps exactly one timer at `min(confirm_at, recheck_at)`.
    fn rearm(&mut self, host: &dyn InstanceHost) {
        let wanted = self.next_due();
        if wanted.is_some() && self.timer_deadline() == wanted {
            return;
        }
        self.cancel_timer();
        if let Some(at) = wanted {
            self.epoch = self.epoch.wrapping_add(1);
            self.timer = Some(host.schedule(self.id, at, self.epoch));
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
            self.epoch = self.epoch.wrapping_add(1);
        }
    }
}
