use oxwatch_common::types::{Sample, SignalValue};

/// Stateless notification on every update, or on every change of value.
#[derive(Debug, Clone)]
pub struct NotifyDetector {
    changes_only: bool,
    previous: Option<SignalValue>,
}

impl NotifyDetector {
    pub fn on_update() -> Self {
        Self {
            changes_only: false,
            previous: None,
        }
    }

    pub fn on_change() -> Self {
        Self {
            changes_only: true,
            previous: None,
        }
    }

    /// Records the starting value without emitting.
    pub fn prime(&mut self, sample: &Sample) {
        self.previous = Some(sample.value.clone());
    }

    /// Whether `sample` must be reported. A change needs a known previous value.
    pub fn observe(&mut self, sample: &Sample) -> bool {
        let previous = self.previous.replace(sample.value.clone());
        if !self.changes_only {
            return true;
        }
        previous.is_some_and(|previous| previous != sample.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_fires_every_sample() {
        let mut detector = NotifyDetector::on_update();
        detector.prime(&Sample::new(1, 0));
        assert!(detector.observe(&Sample::new(1, 10)));
        assert!(detector.observe(&Sample::new(1, 20)));
    }

    #[test]
    fn change_fires_only_on_new_value() {
        let mut detector = NotifyDetector::on_change();
        assert!(!detector.observe(&Sample::new(1, 0)));
        assert!(!detector.observe(&Sample::new(1, 10)));
        assert!(detector.observe(&Sample::new(2, 20)));
    }
}
