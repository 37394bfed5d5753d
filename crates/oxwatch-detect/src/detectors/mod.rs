//! Built-in detection algorithms.
//!
//! Each algorithm owns its accumulator and turns samples into an
//! [`Evaluation`]. None of them know about the alarm lifecycle; that lives in
//! [`crate::instance`].

pub mod change_count;
pub mod cusum;
pub mod limit;
pub mod notify;
pub mod rate_of_change;
pub mod smoothness;
pub mod staleness;
pub mod state;

use crate::config::EngineConfig;
use crate::definition::{DetectorDefinition, DetectorKind};
use oxwatch_common::time::Timestamp;
use oxwatch_common::types::Sample;

use change_count::StateChangeCountDetector;
use cusum::{CusumDetector, Drift};
use limit::{LimitDetector, RangeDetector};
use notify::NotifyDetector;
use rate_of_change::RateOfChangeDetector;
use smoothness::SmoothnessDetector;
use staleness::{Staleness, StalenessDetector};
use state::StateDetector;

/// Outcome of feeding a detector one sample or one elapsed-time check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub condition: bool,
    /// When the condition actually became true, if earlier than the
    /// evaluation time.
    pub since: Option<Timestamp>,
    /// The detector must be re-evaluated at this time even without input.
    pub recheck_at: Option<Timestamp>,
}

impl Evaluation {
    pub fn holds(condition: bool) -> Self {
        Self {
            condition,
            since: None,
            recheck_at: None,
        }
    }
}

/// A condition detector driven through the shared alarm lifecycle.
pub enum Detector {
    State(StateDetector),
    Limit(LimitDetector),
    Range(RangeDetector),
    RateOfChange(RateOfChangeDetector),
    Cusum(CusumDetector),
    Smoothness(SmoothnessDetector),
    Staleness(StalenessDetector),
    StateChangeCount(StateChangeCountDetector),
}

impl Detector {
    pub fn evaluate(&mut self, sample: &Sample) -> Evaluation {
        let value = &sample.value;
        match self {
            Self::State(d) => Evaluation::holds(d.matches(value)),
            Self::Limit(d) => Evaluation::holds(d.evaluate(value)),
            Self::Range(d) => Evaluation::holds(d.evaluate(value)),
            Self::RateOfChange(d) => d.evaluate(sample),
            Self::Cusum(d) => Evaluation::holds(d.evaluate(value)),
            Self::Smoothness(d) => Evaluation::holds(d.evaluate(value)),
            Self::Staleness(d) => d.evaluate(sample),
            Self::StateChangeCount(d) => d.evaluate(sample),
        }
    }

    /// Re-evaluates at `now` with no new sample. `None` for detectors whose
    /// condition only moves with input.
    pub fn recheck(&mut self, now: Timestamp) -> Option<Evaluation> {
        match self {
            Self::RateOfChange(d) => d.recheck(now),
            Self::Staleness(d) => Some(d.recheck(now)),
            Self::StateChangeCount(d) => Some(d.recheck(now)),
            _ => None,
        }
    }
}

/// Behaviour selected by a definition's kind.
pub enum Algorithm {
    Condition(Detector),
    Notify(NotifyDetector),
}

impl Algorithm {
    pub fn for_definition(definition: &DetectorDefinition, config: &EngineConfig) -> Self {
        let detector = match &definition.detector {
            DetectorKind::BinaryState { state } => Detector::State(StateDetector::Binary(*state)),
            DetectorKind::Multistate { state, inverted } => {
                Detector::State(StateDetector::Multistate {
                    state: *state,
                    inverted: *inverted,
                })
            }
            DetectorKind::MultistateSet { states, inverted } => {
                Detector::State(StateDetector::Set {
                    states: states.clone(),
                    inverted: *inverted,
                })
            }
            DetectorKind::Bitmask { mask, inverted } => Detector::State(StateDetector::Bitmask {
                mask: *mask,
                inverted: *inverted,
            }),
            DetectorKind::AlphanumericState { state } => {
                Detector::State(StateDetector::Alphanumeric(state.clone()))
            }
            DetectorKind::HighLimit { limit, reset_limit } => {
                Detector::Limit(LimitDetector::high(*limit, *reset_limit))
            }
            DetectorKind::LowLimit { limit, reset_limit } => {
                Detector::Limit(LimitDetector::low(*limit, *reset_limit))
            }
            DetectorKind::Range { low, high, within } => Detector::Range(RangeDetector {
                low: *low,
                high: *high,
                within: *within,
            }),
            DetectorKind::RateOfChange(params) => Detector::RateOfChange(
                RateOfChangeDetector::new(params, config.rate_recheck_interval()),
            ),
            DetectorKind::PositiveCusum { limit, weight } => {
                Detector::Cusum(CusumDetector::new(Drift::Positive, *limit, *weight))
            }
            DetectorKind::NegativeCusum { limit, weight } => {
                Detector::Cusum(CusumDetector::new(Drift::Negative, *limit, *weight))
            }
            DetectorKind::Smoothness { limit, boxcar } => {
                Detector::Smoothness(SmoothnessDetector::new(*limit, *boxcar))
            }
            DetectorKind::NoChange => Detector::Staleness(StalenessDetector::new(
                Staleness::NoChange,
                definition.duration.millis(),
            )),
            DetectorKind::NoUpdate => Detector::Staleness(StalenessDetector::new(
                Staleness::NoUpdate,
                definition.duration.millis(),
            )),
            DetectorKind::StateChangeCount {
                change_count,
                window,
            } => Detector::StateChangeCount(StateChangeCountDetector::new(
                *change_count,
                window.millis(),
            )),
            DetectorKind::Update => return Self::Notify(NotifyDetector::on_update()),
            DetectorKind::Change => return Self::Notify(NotifyDetector::on_change()),
        };
        Self::Condition(detector)
    }
}
