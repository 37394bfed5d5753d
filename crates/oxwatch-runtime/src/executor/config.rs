use serde::{Deserialize, Serialize};

/// What a tier does when its queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// Reject the new task and escalate through the rejection handler.
    Fatal,
    /// Reject the new task with a warning.
    LogAndDrop,
    /// Admit the new task and discard the oldest queued task of the tier.
    DropOldest,
}

impl std::fmt::Display for RejectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fatal => write!(f, "fatal"),
            Self::LogAndDrop => write!(f, "log_and_drop"),
            Self::DropOldest => write!(f, "drop_oldest"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Worker threads dedicated to this tier.
    pub workers: usize,
    /// Maximum queued (not yet running) tasks. `None` means unbounded.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    pub rejection_policy: RejectionPolicy,
    /// Run already-queued tasks during shutdown instead of discarding them.
    #[serde(default = "default_drain_on_shutdown")]
    pub drain_on_shutdown: bool,
}

impl TierConfig {
    pub fn high_default() -> Self {
        Self {
            workers: 2,
            queue_capacity: Some(4096),
            rejection_policy: RejectionPolicy::Fatal,
            drain_on_shutdown: true,
        }
    }

    pub fn medium_default() -> Self {
        Self {
            workers: 4,
            queue_capacity: Some(65_536),
            rejection_policy: RejectionPolicy::DropOldest,
            drain_on_shutdown: true,
        }
    }

    pub fn low_default() -> Self {
        Self {
            workers: 2,
            queue_capacity: None,
            rejection_policy: RejectionPolicy::LogAndDrop,
            drain_on_shutdown: false,
        }
    }
}

fn default_drain_on_shutdown() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "TierConfig::high_default")]
    pub high: TierConfig,
    #[serde(default = "TierConfig::medium_default")]
    pub medium: TierConfig,
    #[serde(default = "TierConfig::low_default")]
    pub low: TierConfig,
    /// How long `terminate` waits for in-flight work before force-cancelling.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// High and medium tier tasks running longer than this are logged.
    #[serde(default = "default_slow_task_warn_ms")]
    pub slow_task_warn_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            high: TierConfig::high_default(),
            medium: TierConfig::medium_default(),
            low: TierConfig::low_default(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            slow_task_warn_ms: default_slow_task_warn_ms(),
        }
    }
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_slow_task_warn_ms() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: ExecutorConfig = toml::from_str(
            r#"
            shutdown_grace_ms = 250

            [medium]
            workers = 1
            queue_capacity = 8
            rejection_policy = "log_and_drop"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.shutdown_grace_ms, 250);
        assert_eq!(cfg.medium.queue_capacity, Some(8));
        assert_eq!(cfg.medium.rejection_policy, RejectionPolicy::LogAndDrop);
        assert!(cfg.medium.drain_on_shutdown);
        assert_eq!(cfg.high.rejection_policy, RejectionPolicy::Fatal);
        assert_eq!(cfg.low.queue_capacity, None);
    }
}
