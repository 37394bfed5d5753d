use oxwatch_common::types::SignalValue;
use std::collections::VecDeque;
use std::f64::consts::PI;

/// Flags a signal whose shape becomes jagged.
///
/// Over the last `boxcar` samples the segment angles `atan(Δv)` are taken
/// and the mean absolute change between consecutive angles, normalised by
/// π, is the irregularity. Smoothness is `1 - irregularity`.
#[derive(Debug, Clone)]
pub struct SmoothnessDetector {
    limit: f64,
    boxcar: usize,
    values: VecDeque<f64>,
}

impl SmoothnessDetector {
    pub fn new(limit: f64, boxcar: usize) -> Self {
        Self {
            limit,
            boxcar,
            values: VecDeque::with_capacity(boxcar + 1),
        }
    }

    pub fn evaluate(&mut self, value: &SignalValue) -> bool {
        let Some(v) = value.as_f64() else {
            return false;
        };
        self.values.push_back(v);
        if self.values.len() > self.boxcar {
            self.values.pop_front();
        }
        self.values.len() == self.boxcar && smoothness(&self.values) < self.limit
    }
}

fn smoothness(values: &VecDeque<f64>) -> f64 {
    let angles: Vec<f64> = values
        .iter()
        .zip(values.iter().skip(1))
        .map(|(a, b)| (b - a).atan())
        .collect();
    if angles.len() < 2 {
        return 1.0;
    }
    let turning: f64 = angles.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    1.0 - turning / (angles.len() - 1) as f64 / PI
}
