use chrono::{Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch. All sample, deadline and alarm
/// timestamps use this representation.
pub type Timestamp = i64;

/// Unit of a [`TimePeriod`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    pub fn as_duration(self) -> Duration {
        match self {
            Self::Milliseconds => Duration::milliseconds(1),
            Self::Seconds => Duration::seconds(1),
            Self::Minutes => Duration::minutes(1),
            Self::Hours => Duration::hours(1),
            Self::Days => Duration::days(1),
        }
    }

    pub fn millis(self) -> i64 {
        self.as_duration().num_milliseconds()
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Milliseconds => write!(f, "milliseconds"),
            Self::Seconds => write!(f, "seconds"),
            Self::Minutes => write!(f, "minutes"),
            Self::Hours => write!(f, "hours"),
            Self::Days => write!(f, "days"),
        }
    }
}

/// A count of [`TimeUnit`]s, e.g. "5 minutes".
///
/// # Examples
///
/// ```
/// use oxwatch_common::time::{TimePeriod, TimeUnit};
///
/// let period = TimePeriod::new(2, TimeUnit::Seconds);
/// assert_eq!(period.millis(), 2_000);
/// assert!(TimePeriod::zero().is_zero());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePeriod {
    pub count: u32,
    pub unit: TimeUnit,
}

impl TimePeriod {
    pub const fn new(count: u32, unit: TimeUnit) -> Self {
        Self { count, unit }
    }

    pub const fn zero() -> Self {
        Self::new(0, TimeUnit::Seconds)
    }

    pub fn millis(&self) -> i64 {
        i64::from(self.count).saturating_mul(self.unit.millis())
    }

    pub fn is_zero(&self) -> bool {
        self.count == 0
    }
}

impl Default for TimePeriod {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.count, self.unit)
    }
}

/// Current wall-clock time as a [`Timestamp`].
pub fn wall_clock_now() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// Renders a timestamp as RFC 3339 for log fields. Out-of-range values fall
/// back to the raw millisecond count.
pub fn format_timestamp(ts: Timestamp) -> String {
    match Utc.timestamp_millis_opt(ts).single() {
        Some(dt) => dt.to_rfc3339(),
        None => ts.to_string(),
    }
}
