use oxwatch_common::types::SignalValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drift {
    Positive,
    Negative,
}

/// Cumulative sum drift detector, clamped at zero on sign reversal.
#[derive(Debug, Clone)]
pub struct CusumDetector {
    drift: Drift,
    limit: f64,
    weight: f64,
    sum: f64,
}

impl CusumDetector {
    pub fn new(drift: Drift, limit: f64, weight: f64) -> Self {
        Self {
            drift,
            limit,
            weight,
            sum: 0.0,
        }
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn evaluate(&mut self, value: &SignalValue) -> bool {
        let Some(v) = value.as_f64() else {
            return false;
        };
        let next = match self.drift {
            Drift::Positive => (self.sum + v - self.weight).max(0.0),
            Drift::Negative => (self.sum + v + self.weight).min(0.0),
        };
        // An overflowed sum could never clamp back; keep the last finite one.
        if next.is_finite() {
            self.sum = next;
        }
        match self.drift {
            Drift::Positive => self.sum > self.limit,
            Drift::Negative => self.sum < self.limit,
        }
    }
}
