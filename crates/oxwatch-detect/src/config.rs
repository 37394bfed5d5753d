use serde::{Deserialize, Serialize};

/// Tunables of the detector engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Re-check interval for average rate-of-change while the window is
    /// still filling and the rate decays with elapsed time.
    #[serde(default = "default_rate_recheck_interval_ms")]
    pub rate_recheck_interval_ms: u64,
}

fn default_rate_recheck_interval_ms() -> u64 {
    250
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rate_recheck_interval_ms: default_rate_recheck_interval_ms(),
        }
    }
}

impl EngineConfig {
    pub(crate) fn rate_recheck_interval(&self) -> i64 {
        i64::try_from(self.rate_recheck_interval_ms)
            .unwrap_or(i64::MAX)
            .max(1)
    }
}
