mod common;

use oxwatch_common::types::RtnCause;
use oxwatch_detect::{DetectorRegistry, EngineConfig, MemoryAlarmSink, MemoryDefinitionStore};
use oxwatch_runtime::clock::SimulatedClock;
use oxwatch_runtime::executor::InlineExecutor;
use oxwatch_server::definition_seed::{load_seed_file, seed_store};
use oxwatch_server::feed::{run_feed, FeedStats};
use std::sync::Arc;
use tokio::sync::mpsc;

fn registry(clock: Arc<SimulatedClock>, sink: Arc<MemoryAlarmSink>) -> DetectorRegistry {
    let dir = tempfile::tempdir().unwrap();
    let path = common::write_file(&dir, "definitions.json", common::SEED).unwrap();
    let store = Arc::new(MemoryDefinitionStore::new());
    seed_store(&store, load_seed_file(&path).unwrap());

    let registry = DetectorRegistry::new(
        clock,
        Arc::new(InlineExecutor::new()),
        store,
        sink,
        EngineConfig::default(),
    );
    registry.signal_activated("pump.pressure", None).unwrap();
    registry.signal_activated("pump.state", None).unwrap();
    registry
}

async fn feed(lines: &[&str], registry: &DetectorRegistry, clock: &SimulatedClock) -> FeedStats {
    let (tx, rx) = mpsc::channel(16);
    for line in lines {
        tx.send(line.to_string()).await.unwrap();
    }
    drop(tx);
    run_feed(rx, registry, clock).await.unwrap()
}

#[tokio::test]
async fn feed_raises_and_clears_alarms() {
    let clock = Arc::new(SimulatedClock::new(1_000));
    let sink = Arc::new(MemoryAlarmSink::new());
    let registry = registry(clock.clone(), sink.clone());

    let stats = feed(
        &[
            "# pump warmup",
            r#"{"signal": "pump.pressure", "value": 4.0}"#,
            r#"{"signal": "pump.pressure", "value": 12.5, "timestamp": 2000}"#,
            "",
            r#"{"signal": "pump.pressure", "value": 9.0, "timestamp": 3000}"#,
            "not json",
            r#"{"signal": "pump.pressure", "value": 7.5, "timestamp": 4000}"#,
        ],
        &registry,
        &clock,
    )
    .await;

    assert_eq!(
        stats,
        FeedStats {
            accepted: 4,
            malformed: 1
        }
    );
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].definition_id, "pressure-high");
    assert_eq!(events[0].active_timestamp, 2_000);
    // 9.0 is above the reset limit, so the alarm stays open until 7.5.
    assert_eq!(events[0].rtn_timestamp, Some(4_000));
    assert_eq!(events[0].rtn_cause, Some(RtnCause::ReturnToNormal));
}

#[tokio::test]
async fn string_values_confirm_after_duration() {
    let clock = Arc::new(SimulatedClock::new(0));
    let sink = Arc::new(MemoryAlarmSink::new());
    let registry = registry(clock.clone(), sink.clone());

    clock.advance_to(1_000);
    feed(
        &[r#"{"signal": "pump.state", "value": "FAULT", "timestamp": 1000}"#],
        &registry,
        &clock,
    )
    .await;
    assert!(sink.is_empty());

    clock.advance_to(6_000);
    assert_eq!(registry.active_alarms().len(), 1);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].active_timestamp, 1_000);
    assert!(events[0].is_open());
}

#[tokio::test]
async fn samples_for_unknown_signals_are_accepted_and_ignored() {
    let clock = Arc::new(SimulatedClock::new(0));
    let sink = Arc::new(MemoryAlarmSink::new());
    let registry = registry(clock.clone(), sink.clone());

    let stats = feed(
        &[r#"{"signal": "boiler.temp", "value": 500.0, "timestamp": 10}"#],
        &registry,
        &clock,
    )
    .await;
    assert_eq!(stats.accepted, 1);
    assert!(sink.is_empty());
}
