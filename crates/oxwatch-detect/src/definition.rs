use crate::error::{DetectError, Result};
use oxwatch_common::time::{TimePeriod, TimeUnit};
use oxwatch_common::types::{AlarmLevel, DefinitionId, SignalId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Immutable configuration of one condition to monitor on one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorDefinition {
    pub id: DefinitionId,
    #[serde(default)]
    pub name: String,
    pub signal_id: SignalId,
    pub level: AlarmLevel,
    /// Sustained-true time required before the alarm is raised. Zero raises
    /// immediately. For staleness kinds this is the staleness period.
    #[serde(default)]
    pub duration: TimePeriod,
    pub detector: DetectorKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectorKind {
    BinaryState {
        state: bool,
    },
    Multistate {
        state: i32,
        #[serde(default)]
        inverted: bool,
    },
    MultistateSet {
        states: Vec<i32>,
        #[serde(default)]
        inverted: bool,
    },
    /// True when any bit of `mask` is set in the value.
    Bitmask {
        mask: i64,
        #[serde(default)]
        inverted: bool,
    },
    AlphanumericState {
        state: String,
    },
    HighLimit {
        limit: f64,
        #[serde(default)]
        reset_limit: Option<f64>,
    },
    LowLimit {
        limit: f64,
        #[serde(default)]
        reset_limit: Option<f64>,
    },
    Range {
        low: f64,
        high: f64,
        #[serde(default = "default_within")]
        within: bool,
    },
    RateOfChange(RateOfChangeParams),
    PositiveCusum {
        limit: f64,
        weight: f64,
    },
    NegativeCusum {
        limit: f64,
        weight: f64,
    },
    Smoothness {
        limit: f64,
        boxcar: usize,
    },
    NoChange,
    NoUpdate,
    StateChangeCount {
        change_count: u32,
        window: TimePeriod,
    },
    Update,
    Change,
}

fn default_within() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateOfChangeParams {
    pub threshold: f64,
    #[serde(default)]
    pub reset_threshold: Option<f64>,
    #[serde(default = "default_comparison")]
    pub comparison: ComparisonMode,
    #[serde(default)]
    pub calculation: CalculationMode,
    /// Trailing window for average mode.
    #[serde(default)]
    pub window: Option<TimePeriod>,
    /// Unit the rate is expressed in, e.g. per second.
    #[serde(default = "default_rate_unit")]
    pub rate_unit: TimeUnit,
    #[serde(default)]
    pub absolute: bool,
}

fn default_comparison() -> ComparisonMode {
    ComparisonMode::GreaterThan
}

fn default_rate_unit() -> TimeUnit {
    TimeUnit::Seconds
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    #[serde(alias = "gt")]
    GreaterThan,
    #[serde(alias = "lt")]
    LessThan,
    #[serde(alias = "gte")]
    GreaterEqual,
    #[serde(alias = "lte")]
    LessEqual,
}

impl FromStr for ComparisonMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "greater_than" | "gt" | ">" => Ok(Self::GreaterThan),
            "less_than" | "lt" | "<" => Ok(Self::LessThan),
            "greater_equal" | "gte" | ">=" => Ok(Self::GreaterEqual),
            "less_equal" | "lte" | "<=" => Ok(Self::LessEqual),
            _ => Err(format!("unknown comparison mode: {s}")),
        }
    }
}

impl std::fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GreaterThan => write!(f, "greater_than"),
            Self::LessThan => write!(f, "less_than"),
            Self::GreaterEqual => write!(f, "greater_equal"),
            Self::LessEqual => write!(f, "less_equal"),
        }
    }
}

impl ComparisonMode {
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessEqual => value <= threshold,
        }
    }

    /// `true` for comparisons that trigger on the high side.
    pub fn is_upward(&self) -> bool {
        matches!(self, Self::GreaterThan | Self::GreaterEqual)
    }

    /// Whether `value` has come back far enough to clear a latched condition.
    pub fn reset_reached(&self, value: f64, reset: f64) -> bool {
        if self.is_upward() {
            value <= reset
        } else {
            value >= reset
        }
    }

    /// Whether `reset` lies on the clearing side of `threshold`.
    fn reset_is_valid(&self, threshold: f64, reset: f64) -> bool {
        if self.is_upward() {
            reset < threshold
        } else {
            reset > threshold
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMode {
    #[default]
    Instantaneous,
    Average,
}

impl DetectorKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BinaryState { .. } => "binary_state",
            Self::Multistate { .. } => "multistate",
            Self::MultistateSet { .. } => "multistate_set",
            Self::Bitmask { .. } => "bitmask",
            Self::AlphanumericState { .. } => "alphanumeric_state",
            Self::HighLimit { .. } => "high_limit",
            Self::LowLimit { .. } => "low_limit",
            Self::Range { .. } => "range",
            Self::RateOfChange(_) => "rate_of_change",
            Self::PositiveCusum { .. } => "positive_cusum",
            Self::NegativeCusum { .. } => "negative_cusum",
            Self::Smoothness { .. } => "smoothness",
            Self::NoChange => "no_change",
            Self::NoUpdate => "no_update",
            Self::StateChangeCount { .. } => "state_change_count",
            Self::Update => "update",
            Self::Change => "change",
        }
    }

    /// Notification kinds emit on every update or change and never return
    /// to normal.
    pub fn is_notification(&self) -> bool {
        matches!(self, Self::Update | Self::Change)
    }

    /// Staleness kinds consume the definition duration as their own period,
    /// so no confirmation delay is added on top.
    pub fn is_staleness(&self) -> bool {
        matches!(self, Self::NoChange | Self::NoUpdate)
    }
}

impl DetectorDefinition {
    /// Confirmation delay applied by the lifecycle before raising.
    pub fn confirmation_ms(&self) -> i64 {
        if self.detector.is_staleness() || self.detector.is_notification() {
            0
        } else {
            self.duration.millis()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(self.invalid("definition id is empty"));
        }
        if self.signal_id.trim().is_empty() {
            return Err(self.invalid("signal id is empty"));
        }

        match &self.detector {
            DetectorKind::MultistateSet { states, .. } if states.is_empty() => {
                Err(self.invalid("state set is empty"))
            }
            DetectorKind::Bitmask { mask: 0, .. } => Err(self.invalid("mask is zero")),
            DetectorKind::HighLimit { limit, reset_limit } => {
                self.check_limit(*limit, *reset_limit, ComparisonMode::GreaterThan)
            }
            DetectorKind::LowLimit { limit, reset_limit } => {
                self.check_limit(*limit, *reset_limit, ComparisonMode::LessThan)
            }
            DetectorKind::Range { low, high, .. } => {
                self.finite("low", *low)?;
                self.finite("high", *high)?;
                if low > high {
                    return Err(self.invalid(format!("low {low} is above high {high}")));
                }
                Ok(())
            }
            DetectorKind::RateOfChange(params) => {
                self.check_limit(params.threshold, params.reset_threshold, params.comparison)?;
                if params.calculation == CalculationMode::Average
                    && params.window.map_or(true, |w| w.millis() <= 0)
                {
                    return Err(self.invalid("average rate of change needs a positive window"));
                }
                Ok(())
            }
            DetectorKind::PositiveCusum { limit, weight }
            | DetectorKind::NegativeCusum { limit, weight } => {
                self.finite("limit", *limit)?;
                self.finite("weight", *weight)
            }
            DetectorKind::Smoothness { limit, boxcar } => {
                self.finite("limit", *limit)?;
                if !(0.0..=1.0).contains(limit) {
                    return Err(self.invalid(format!("smoothness limit {limit} outside [0, 1]")));
                }
                if *boxcar < 3 {
                    return Err(self.invalid(format!("boxcar {boxcar} is below 3")));
                }
                Ok(())
            }
            DetectorKind::NoChange | DetectorKind::NoUpdate if self.duration.millis() <= 0 => {
                Err(self.invalid("staleness detectors need a positive duration"))
            }
            DetectorKind::StateChangeCount {
                change_count,
                window,
            } => {
                if *change_count == 0 {
                    return Err(self.invalid("change count must be at least 1"));
                }
                if window.millis() <= 0 {
                    return Err(self.invalid("change count window must be positive"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn check_limit(&self, limit: f64, reset: Option<f64>, mode: ComparisonMode) -> Result<()> {
        self.finite("threshold", limit)?;
        if let Some(reset) = reset {
            self.finite("reset threshold", reset)?;
            if !mode.reset_is_valid(limit, reset) {
                return Err(self.invalid(format!(
                    "reset threshold {reset} is on the wrong side of {limit} for {mode}"
                )));
            }
        }
        Ok(())
    }

    fn finite(&self, what: &str, value: f64) -> Result<()> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(self.invalid(format!("{what} is not finite")))
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> DetectError {
        DetectError::InvalidDefinition {
            definition_id: self.id.clone(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(detector: DetectorKind) -> DetectorDefinition {
        DetectorDefinition {
            id: "def-1".to_string(),
            name: String::new(),
            signal_id: "sig-1".to_string(),
            level: AlarmLevel::Urgent,
            duration: TimePeriod::zero(),
            detector,
        }
    }

    #[test]
    fn parses_definition_json() {
        let json = r#"{
            "id": "boiler-high",
            "signal_id": "boiler.temp",
            "level": "critical",
            "duration": {"count": 5, "unit": "seconds"},
            "detector": {"type": "high_limit", "limit": 90.0, "reset_limit": 85.0}
        }"#;
        let def: DetectorDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.level, AlarmLevel::Critical);
        assert_eq!(def.confirmation_ms(), 5_000);
        assert_eq!(
            def.detector,
            DetectorKind::HighLimit {
                limit: 90.0,
                reset_limit: Some(85.0)
            }
        );
        def.validate().unwrap();
    }

    #[test]
    fn parses_rate_of_change_defaults() {
        let json = r#"{"type": "rate_of_change", "threshold": 1.0, "comparison": "gte"}"#;
        let kind: DetectorKind = serde_json::from_str(json).unwrap();
        let DetectorKind::RateOfChange(params) = kind else {
            panic!("wrong kind");
        };
        assert_eq!(params.comparison, ComparisonMode::GreaterEqual);
        assert_eq!(params.calculation, CalculationMode::Instantaneous);
        assert_eq!(params.rate_unit, TimeUnit::Seconds);
        assert!(!params.absolute);
    }

    #[test]
    fn parses_unit_kinds() {
        let kind: DetectorKind = serde_json::from_str(r#"{"type": "no_update"}"#).unwrap();
        assert_eq!(kind, DetectorKind::NoUpdate);
        assert!(kind.is_staleness());
    }

    #[test]
    fn comparison_mode_round_trips_through_str() {
        for mode in [
            ComparisonMode::GreaterThan,
            ComparisonMode::LessThan,
            ComparisonMode::GreaterEqual,
            ComparisonMode::LessEqual,
        ] {
            assert_eq!(mode.to_string().parse::<ComparisonMode>().unwrap(), mode);
        }
        assert_eq!(">=".parse::<ComparisonMode>().unwrap(), ComparisonMode::GreaterEqual);
        assert!("between".parse::<ComparisonMode>().is_err());
    }

    #[test]
    fn rejects_reset_on_wrong_side() {
        let high = definition(DetectorKind::HighLimit {
            limit: 1.0,
            reset_limit: Some(1.5),
        });
        assert!(matches!(
            high.validate(),
            Err(DetectError::InvalidDefinition { .. })
        ));

        let low = definition(DetectorKind::LowLimit {
            limit: 1.0,
            reset_limit: Some(0.5),
        });
        assert!(low.validate().is_err());

        let falling = definition(DetectorKind::RateOfChange(RateOfChangeParams {
            threshold: -1.0,
            reset_threshold: Some(-0.5),
            comparison: ComparisonMode::LessThan,
            calculation: CalculationMode::Instantaneous,
            window: None,
            rate_unit: TimeUnit::Seconds,
            absolute: false,
        }));
        falling.validate().unwrap();
    }

    #[test]
    fn average_rate_needs_window() {
        let def = definition(DetectorKind::RateOfChange(RateOfChangeParams {
            threshold: 1.0,
            reset_threshold: None,
            comparison: ComparisonMode::GreaterThan,
            calculation: CalculationMode::Average,
            window: None,
            rate_unit: TimeUnit::Seconds,
            absolute: false,
        }));
        assert!(def.validate().is_err());
    }

    #[test]
    fn rejects_degenerate_parameters() {
        let cases = [
            DetectorKind::MultistateSet {
                states: vec![],
                inverted: false,
            },
            DetectorKind::Bitmask {
                mask: 0,
                inverted: false,
            },
            DetectorKind::Range {
                low: 2.0,
                high: 1.0,
                within: true,
            },
            DetectorKind::Smoothness {
                limit: 0.5,
                boxcar: 2,
            },
            DetectorKind::HighLimit {
                limit: f64::NAN,
                reset_limit: None,
            },
            DetectorKind::NoChange,
            DetectorKind::StateChangeCount {
                change_count: 0,
                window: TimePeriod::new(1, TimeUnit::Minutes),
            },
        ];
        for kind in cases {
            let name = kind.name();
            assert!(definition(kind).validate().is_err(), "{name} accepted");
        }
    }

    #[test]
    fn rejects_empty_ids() {
        let mut def = definition(DetectorKind::Update);
        def.signal_id = " ".to_string();
        assert!(def.validate().is_err());
    }
}
