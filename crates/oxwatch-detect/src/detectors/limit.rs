use crate::definition::ComparisonMode;
use oxwatch_common::types::SignalValue;

/// Threshold comparison with optional hysteresis.
///
/// Without a reset threshold the latch simply follows the comparison. With
/// one, crossing the trigger engages it and only reaching the reset
/// threshold releases it.
#[derive(Debug, Clone)]
pub struct Latch {
    comparison: ComparisonMode,
    trigger: f64,
    reset: Option<f64>,
    engaged: bool,
}

impl Latch {
    pub fn new(comparison: ComparisonMode, trigger: f64, reset: Option<f64>) -> Self {
        Self {
            comparison,
            trigger,
            reset,
            engaged: false,
        }
    }

    pub fn update(&mut self, value: f64) -> bool {
        self.engaged = match self.reset {
            None => self.comparison.check(value, self.trigger),
            Some(reset) if self.engaged => !self.comparison.reset_reached(value, reset),
            Some(_) => self.comparison.check(value, self.trigger),
        };
        self.engaged
    }

    pub fn release(&mut self) {
        self.engaged = false;
    }

    pub fn engaged(&self) -> bool {
        self.engaged
    }
}

/// High or low analog limit.
#[derive(Debug, Clone)]
pub struct LimitDetector {
    latch: Latch,
}

impl LimitDetector {
    pub fn high(limit: f64, reset: Option<f64>) -> Self {
        Self {
            latch: Latch::new(ComparisonMode::GreaterThan, limit, reset),
        }
    }

    pub fn low(limit: f64, reset: Option<f64>) -> Self {
        Self {
            latch: Latch::new(ComparisonMode::LessThan, limit, reset),
        }
    }

    pub fn evaluate(&mut self, value: &SignalValue) -> bool {
        match value.as_f64() {
            Some(v) => self.latch.update(v),
            None => {
                self.latch.release();
                false
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RangeDetector {
    pub low: f64,
    pub high: f64,
    pub within: bool,
}

impl RangeDetector {
    pub fn evaluate(&self, value: &SignalValue) -> bool {
        value
            .as_f64()
            .is_some_and(|v| (self.low <= v && v <= self.high) == self.within)
    }
}
