use oxwatch_detect::EngineConfig;
use oxwatch_runtime::executor::ExecutorConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Default level for `oxwatch*` targets. `RUST_LOG` still wins.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// JSON seed file holding the detector definitions.
    #[serde(default = "default_definitions_path")]
    pub definitions_path: String,
    /// Snowflake machine id for alarm event ids (0-31).
    #[serde(default = "default_machine_id")]
    pub machine_id: i32,
    /// Snowflake node id for alarm event ids (0-31).
    #[serde(default = "default_node_id")]
    pub node_id: i32,
    /// Interval for the periodic executor statistics log. 0 disables it.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            definitions_path: default_definitions_path(),
            machine_id: default_machine_id(),
            node_id: default_node_id(),
            stats_interval_secs: default_stats_interval_secs(),
            executor: ExecutorConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_definitions_path() -> String {
    "config/definitions.json".to_string()
}

fn default_machine_id() -> i32 {
    1
}

fn default_node_id() -> i32 {
    1
}

fn default_stats_interval_secs() -> u64 {
    60
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}
