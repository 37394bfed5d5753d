use super::limit::Latch;
use super::Evaluation;
use crate::definition::{CalculationMode, RateOfChangeParams};
use crate::window::SlidingWindow;
use oxwatch_common::time::Timestamp;
use oxwatch_common::types::Sample;

/// Rate of change in `rate_unit`, compared through a hysteresis latch.
///
/// Instantaneous mode uses the previous sample only. Average mode treats the
/// signal as sample-and-hold over the trailing window, so the rate keeps
/// moving as samples age out and the detector asks to be re-checked.
pub struct RateOfChangeDetector {
    calculation: CalculationMode,
    unit_ms: f64,
    absolute: bool,
    recheck_interval_ms: i64,
    previous: Option<(Timestamp, f64)>,
    window: SlidingWindow<f64>,
    latch: Latch,
}

impl RateOfChangeDetector {
    pub fn new(params: &RateOfChangeParams, recheck_interval_ms: i64) -> Self {
        let window_ms = params.window.map(|w| w.millis()).unwrap_or_default();
        Self {
            calculation: params.calculation,
            unit_ms: params.rate_unit.millis() as f64,
            absolute: params.absolute,
            recheck_interval_ms: recheck_interval_ms.max(1),
            previous: None,
            window: SlidingWindow::new(window_ms),
            latch: Latch::new(params.comparison, params.threshold, params.reset_threshold),
        }
    }

    pub fn evaluate(&mut self, sample: &Sample) -> Evaluation {
        let Some(value) = sample.value.as_f64() else {
            self.latch.release();
            return Evaluation::holds(false);
        };
        let at = sample.timestamp;
        match self.calculation {
            CalculationMode::Instantaneous => {
                let rate = self
                    .previous
                    .and_then(|(t, v)| self.scaled(v, value, at - t));
                self.previous = Some((at, value));
                Evaluation::holds(self.compare(rate))
            }
            CalculationMode::Average => {
                self.window.push(at, value);
                self.window.evict_keep_anchor(at);
                self.average_at(at)
            }
        }
    }

    /// Time-driven re-evaluation. Only average mode changes without input.
    pub fn recheck(&mut self, now: Timestamp) -> Option<Evaluation> {
        match self.calculation {
            CalculationMode::Instantaneous => None,
            CalculationMode::Average => {
                self.window.evict_keep_anchor(now);
                Some(self.average_at(now))
            }
        }
    }

    fn average_at(&mut self, now: Timestamp) -> Evaluation {
        let rate = self.average_rate(now);
        Evaluation {
            condition: self.compare(rate),
            since: None,
            recheck_at: self.next_recheck(now),
        }
    }

    fn average_rate(&self, now: Timestamp) -> Option<f64> {
        let (_, newest) = *self.window.back()?;
        let (oldest_at, oldest) = *self.window.front()?;
        let start = oldest_at.max(now - self.window.window_ms());
        self.scaled(oldest, newest, now - start)
    }

    fn next_recheck(&self, now: Timestamp) -> Option<Timestamp> {
        if self.window.len() < 2 {
            return None;
        }
        let window_ms = self.window.window_ms();
        let (oldest_at, _) = *self.window.front()?;
        if oldest_at > now - window_ms {
            // Still filling: the span grows with time, so the rate decays.
            return Some((oldest_at + window_ms).min(now + self.recheck_interval_ms));
        }
        self.window.get(1).map(|(at, _)| at + window_ms)
    }

    fn scaled(&self, from: f64, to: f64, span_ms: i64) -> Option<f64> {
        if span_ms <= 0 {
            return None;
        }
        let rate = (to - from) / span_ms as f64 * self.unit_ms;
        Some(if self.absolute { rate.abs() } else { rate })
    }

    fn compare(&mut self, rate: Option<f64>) -> bool {
        match rate {
            Some(rate) => self.latch.update(rate),
            None => self.latch.engaged(),
        }
    }
}
