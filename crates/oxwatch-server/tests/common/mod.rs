#![allow(dead_code)]

use anyhow::Result;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const SEED: &str = r#"{
  "definitions": [
    {
      "id": "pressure-high",
      "name": "Pump pressure high",
      "signal_id": "pump.pressure",
      "level": "critical",
      "detector": { "type": "high_limit", "limit": 10.0, "reset_limit": 8.0 }
    },
    {
      "id": "pump-fault",
      "signal_id": "pump.state",
      "level": "urgent",
      "duration": { "count": 5, "unit": "seconds" },
      "detector": { "type": "alphanumeric_state", "state": "FAULT" }
    },
    {
      "id": "bad-range",
      "signal_id": "tank.level",
      "level": "information",
      "detector": { "type": "range", "low": 90.0, "high": 10.0 }
    },
    {
      "id": "pressure-high",
      "signal_id": "pump.pressure",
      "level": "urgent",
      "detector": { "type": "high_limit", "limit": 20.0 }
    }
  ]
}"#;

pub fn write_file(dir: &TempDir, name: &str, content: &str) -> Result<PathBuf> {
    let path = dir.path().join(name);
    std::fs::write(&path, content)?;
    Ok(path)
}

pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}
