use super::Evaluation;
use oxwatch_common::time::Timestamp;
use oxwatch_common::types::{Sample, SignalValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// No distinct value within the period.
    NoChange,
    /// No sample at all within the period.
    NoUpdate,
}

/// Fires once the period has elapsed since the last change or update.
/// Purely time-driven: it schedules its own re-check at the due time.
#[derive(Debug, Clone)]
pub struct StalenessDetector {
    kind: Staleness,
    period_ms: i64,
    last_value: Option<SignalValue>,
    reference: Option<Timestamp>,
}

impl StalenessDetector {
    pub fn new(kind: Staleness, period_ms: i64) -> Self {
        Self {
            kind,
            period_ms,
            last_value: None,
            reference: None,
        }
    }

    pub fn evaluate(&mut self, sample: &Sample) -> Evaluation {
        let moved = match self.kind {
            Staleness::NoUpdate => true,
            Staleness::NoChange => self.last_value.as_ref() != Some(&sample.value),
        };
        if moved {
            self.reference = Some(sample.timestamp);
        }
        self.last_value = Some(sample.value.clone());
        self.at(sample.timestamp)
    }

    pub fn recheck(&mut self, now: Timestamp) -> Evaluation {
        self.at(now)
    }

    fn at(&self, now: Timestamp) -> Evaluation {
        let Some(reference) = self.reference else {
            return Evaluation::holds(false);
        };
        let due = reference.saturating_add(self.period_ms);
        if now >= due {
            Evaluation {
                condition: true,
                since: Some(due),
                recheck_at: None,
            }
        } else {
            Evaluation {
                condition: false,
                since: None,
                recheck_at: Some(due),
            }
        }
    }
}
