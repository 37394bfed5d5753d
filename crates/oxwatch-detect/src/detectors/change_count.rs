use super::Evaluation;
use crate::window::SlidingWindow;
use oxwatch_common::time::Timestamp;
use oxwatch_common::types::{Sample, SignalValue};

/// Counts value transitions inside a trailing window.
pub struct StateChangeCountDetector {
    change_count: usize,
    previous: Option<SignalValue>,
    changes: SlidingWindow<()>,
}

impl StateChangeCountDetector {
    pub fn new(change_count: u32, window_ms: i64) -> Self {
        Self {
            change_count: change_count as usize,
            previous: None,
            changes: SlidingWindow::new(window_ms),
        }
    }

    pub fn evaluate(&mut self, sample: &Sample) -> Evaluation {
        let changed = self
            .previous
            .as_ref()
            .is_some_and(|previous| previous != &sample.value);
        if changed {
            self.changes.push(sample.timestamp, ());
        }
        self.previous = Some(sample.value.clone());
        self.at(sample.timestamp)
    }

    pub fn recheck(&mut self, now: Timestamp) -> Evaluation {
        self.at(now)
    }

    fn at(&mut self, now: Timestamp) -> Evaluation {
        self.changes.evict(now);
        let condition = self.changes.len() >= self.change_count;
        // While over the count, the oldest transition ageing out can clear it.
        let recheck_at = if condition {
            self.changes
                .front()
                .map(|(at, _)| at + self.changes.window_ms())
        } else {
            None
        };
        Evaluation {
            condition,
            since: None,
            recheck_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_enough_transitions_and_ages_out() {
        let mut detector = StateChangeCountDetector::new(2, 1_000);
        assert!(!detector.evaluate(&Sample::new(0, 0)).condition);
        assert!(!detector.evaluate(&Sample::new(1, 100)).condition);
        assert!(!detector.evaluate(&Sample::new(1, 200)).condition);
        let eval = detector.evaluate(&Sample::new(0, 300));
        assert!(eval.condition);
        assert_eq!(eval.recheck_at, Some(1_100));

        let eval = detector.recheck(1_100);
        assert!(!eval.condition);
        assert_eq!(eval.recheck_at, None);
    }
}
