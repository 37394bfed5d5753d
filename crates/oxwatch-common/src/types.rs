use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// Identifier of a monitored signal (data point).
pub type SignalId = String;

/// Identifier of a detector definition.
pub type DefinitionId = String;

/// Identifier handed back by the alarm sink when an event is raised.
pub type EventId = i64;

/// A value carried by a signal.
///
/// Detectors choose the view they need: numeric detectors use
/// [`SignalValue::as_f64`], state detectors use [`SignalValue::as_i64`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SignalValue {
    Binary(bool),
    Multistate(i32),
    Numeric(f64),
    Alphanumeric(String),
}

impl SignalValue {
    /// Numeric view. `None` for alphanumeric values and for non-finite numbers.
    pub fn as_f64(&self) -> Option<f64> {
        let v = match self {
            Self::Binary(b) => f64::from(u8::from(*b)),
            Self::Multistate(i) => f64::from(*i),
            Self::Numeric(n) => *n,
            Self::Alphanumeric(_) => return None,
        };
        v.is_finite().then_some(v)
    }

    /// Integral view used by state and bitmask detectors. Numeric values only
    /// qualify when they hold a whole number.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Binary(b) => Some(i64::from(*b)),
            Self::Multistate(i) => Some(i64::from(*i)),
            Self::Numeric(n) if n.is_finite() && n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Binary(b) => Some(*b),
            Self::Multistate(i) => Some(*i != 0),
            Self::Numeric(n) if n.is_finite() => Some(*n != 0.0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Alphanumeric(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the value is usable at all. NaN and infinities are not.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Numeric(n) => n.is_finite(),
            _ => true,
        }
    }
}

impl std::fmt::Display for SignalValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary(b) => write!(f, "{b}"),
            Self::Multistate(i) => write!(f, "{i}"),
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Alphanumeric(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<f64> for SignalValue {
    fn from(v: f64) -> Self {
        Self::Numeric(v)
    }
}

impl From<bool> for SignalValue {
    fn from(v: bool) -> Self {
        Self::Binary(v)
    }
}

impl From<i32> for SignalValue {
    fn from(v: i32) -> Self {
        Self::Multistate(v)
    }
}

/// One timestamped observation of a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: SignalValue,
    pub timestamp: Timestamp,
}

impl Sample {
    pub fn new(value: impl Into<SignalValue>, timestamp: Timestamp) -> Self {
        Self {
            value: value.into(),
            timestamp,
        }
    }
}

/// Alarm level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use oxwatch_common::types::AlarmLevel;
///
/// let level: AlarmLevel = "urgent".parse().unwrap();
/// assert_eq!(level, AlarmLevel::Urgent);
/// assert_eq!(level.to_string(), "urgent");
/// assert!(AlarmLevel::LifeSafety > AlarmLevel::Critical);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmLevel {
    None,
    Information,
    Urgent,
    Critical,
    LifeSafety,
}

impl std::fmt::Display for AlarmLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmLevel::None => write!(f, "none"),
            AlarmLevel::Information => write!(f, "information"),
            AlarmLevel::Urgent => write!(f, "urgent"),
            AlarmLevel::Critical => write!(f, "critical"),
            AlarmLevel::LifeSafety => write!(f, "life_safety"),
        }
    }
}

impl std::str::FromStr for AlarmLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(AlarmLevel::None),
            "information" | "info" => Ok(AlarmLevel::Information),
            "urgent" => Ok(AlarmLevel::Urgent),
            "critical" => Ok(AlarmLevel::Critical),
            "life_safety" => Ok(AlarmLevel::LifeSafety),
            _ => Err(format!("unknown alarm level: {s}")),
        }
    }
}

/// Why an active alarm stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RtnCause {
    /// The monitored condition cleared.
    ReturnToNormal,
    /// The detector itself was torn down (signal disabled, definition changed).
    Deactivated,
}

impl std::fmt::Display for RtnCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RtnCause::ReturnToNormal => write!(f, "RETURN_TO_NORMAL"),
            RtnCause::Deactivated => write!(f, "DEACTIVATED"),
        }
    }
}

/// An alarm occurrence as handed to the sink.
///
/// Created when a detector goes active and closed on return to normal. The
/// engine keeps only the event id afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub definition_id: DefinitionId,
    pub signal_id: SignalId,
    pub level: AlarmLevel,
    pub active_timestamp: Timestamp,
    /// `false` for update/change notifications which never return to normal.
    pub rtn_applicable: bool,
    pub rtn_timestamp: Option<Timestamp>,
    pub rtn_cause: Option<RtnCause>,
}

impl AlarmEvent {
    pub fn is_open(&self) -> bool {
        self.rtn_applicable && self.rtn_timestamp.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_view_rejects_non_finite() {
        assert_eq!(SignalValue::Numeric(f64::NAN).as_f64(), None);
        assert_eq!(SignalValue::Numeric(f64::INFINITY).as_f64(), None);
        assert_eq!(SignalValue::Binary(true).as_f64(), Some(1.0));
        assert_eq!(SignalValue::Multistate(4).as_f64(), Some(4.0));
        assert!(!SignalValue::Numeric(f64::NEG_INFINITY).is_valid());
    }

    #[test]
    fn integral_view_only_for_whole_numbers() {
        assert_eq!(SignalValue::Numeric(3.0).as_i64(), Some(3));
        assert_eq!(SignalValue::Numeric(3.5).as_i64(), None);
        assert_eq!(SignalValue::Alphanumeric("x".into()).as_i64(), None);
    }

    #[test]
    fn signal_value_json_shape() {
        let v: SignalValue = serde_json::from_str(r#"{"type":"multistate","value":2}"#).unwrap();
        assert_eq!(v, SignalValue::Multistate(2));
    }

    #[test]
    fn rtn_cause_serializes_screaming() {
        let s = serde_json::to_string(&RtnCause::Deactivated).unwrap();
        assert_eq!(s, "\"DEACTIVATED\"");
    }
}
