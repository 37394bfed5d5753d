//! JSON-lines value stream.
//!
//! One sample per line: `{"signal": "boiler.temp", "value": 71.5, "timestamp": 1700000000000}`.
//! `timestamp` is optional and defaults to the engine clock. Plain JSON
//! numbers are numeric values, booleans are binary, strings are
//! alphanumeric. Multistate values use the tagged form
//! `{"type": "multistate", "value": 2}`.

use anyhow::Context;
use oxwatch_common::time::Timestamp;
use oxwatch_common::types::{SignalId, SignalValue};
use oxwatch_detect::DetectorRegistry;
use oxwatch_runtime::Clock;
use serde::Deserialize;
use serde_json::Value;
use std::io::BufRead;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
struct FeedLine {
    signal: SignalId,
    value: Value,
    #[serde(default)]
    timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedSample {
    pub signal: SignalId,
    pub value: SignalValue,
    pub timestamp: Timestamp,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub accepted: u64,
    pub malformed: u64,
}

pub fn parse_value(value: Value) -> anyhow::Result<SignalValue> {
    match value {
        Value::Bool(b) => Ok(SignalValue::Binary(b)),
        Value::Number(n) => n
            .as_f64()
            .map(SignalValue::Numeric)
            .ok_or_else(|| anyhow::anyhow!("number {n} is not representable")),
        Value::String(s) => Ok(SignalValue::Alphanumeric(s)),
        Value::Object(_) => serde_json::from_value(value).context("invalid tagged value"),
        other => anyhow::bail!("unsupported value {other}"),
    }
}

/// Parses one line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str, now: Timestamp) -> anyhow::Result<Option<FeedSample>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let parsed: FeedLine = serde_json::from_str(line).context("invalid feed line")?;
    if parsed.signal.trim().is_empty() {
        anyhow::bail!("empty signal id");
    }
    Ok(Some(FeedSample {
        signal: parsed.signal,
        value: parse_value(parsed.value)?,
        timestamp: parsed.timestamp.unwrap_or(now),
    }))
}

/// Reads stdin on a dedicated thread. A blocking stdin read cannot be
/// cancelled, so it must not hold up runtime shutdown.
pub fn stdin_lines(buffer: usize) -> anyhow::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    std::thread::Builder::new()
        .name("oxwatch-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    tracing::warn!("Failed to read stdin, closing value stream");
                    break;
                };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

/// Feeds every line into the registry until the stream closes.
///
/// Malformed lines are skipped. An executor refusal is returned as an error
/// so the host can shut down.
pub async fn run_feed(
    mut lines: mpsc::Receiver<String>,
    registry: &DetectorRegistry,
    clock: &dyn Clock,
) -> anyhow::Result<FeedStats> {
    let mut stats = FeedStats::default();
    while let Some(line) = lines.recv().await {
        match parse_line(&line, clock.now()) {
            Ok(Some(sample)) => {
                wait_for_capacity(registry).await;
                registry
                    .push_value(&sample.signal, sample.value, sample.timestamp)
                    .with_context(|| format!("Failed to submit sample for {}", sample.signal))?;
                stats.accepted += 1;
            }
            Ok(None) => {}
            Err(e) => {
                stats.malformed += 1;
                tracing::warn!(error = %format_args!("{e:#}"), "Malformed feed line skipped");
            }
        }
    }
    Ok(stats)
}

/// Holds the feed while the sample tier is full, so a fast producer is
/// paced by the executor instead of tripping its saturation policy.
async fn wait_for_capacity(registry: &DetectorRegistry) {
    if registry.has_capacity() {
        return;
    }
    tracing::debug!("Sample tier full, pausing feed");
    while !registry.has_capacity() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_value_shapes() {
        assert_eq!(
            parse_value(serde_json::json!(1.5)).unwrap(),
            SignalValue::Numeric(1.5)
        );
        assert_eq!(
            parse_value(serde_json::json!(true)).unwrap(),
            SignalValue::Binary(true)
        );
        assert_eq!(
            parse_value(serde_json::json!("FAULT")).unwrap(),
            SignalValue::Alphanumeric("FAULT".to_string())
        );
        assert_eq!(
            parse_value(serde_json::json!({"type": "multistate", "value": 3})).unwrap(),
            SignalValue::Multistate(3)
        );
        assert!(parse_value(Value::Null).is_err());
    }

    #[test]
    fn missing_timestamp_uses_clock() {
        let sample = parse_line(r#"{"signal": "s", "value": 2}"#, 42)
            .unwrap()
            .unwrap();
        assert_eq!(sample.timestamp, 42);
        assert_eq!(sample.value, SignalValue::Numeric(2.0));

        let sample = parse_line(r#"{"signal": "s", "value": 2, "timestamp": 7}"#, 42)
            .unwrap()
            .unwrap();
        assert_eq!(sample.timestamp, 7);
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        assert!(parse_line("   ", 0).unwrap().is_none());
        assert!(parse_line("# warmup", 0).unwrap().is_none());
        assert!(parse_line("{not json", 0).is_err());
        assert!(parse_line(r#"{"signal": "", "value": 1}"#, 0).is_err());
    }
}
