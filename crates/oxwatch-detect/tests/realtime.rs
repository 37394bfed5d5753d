use oxwatch_common::time::{wall_clock_now, TimePeriod, TimeUnit};
use oxwatch_common::types::{AlarmLevel, RtnCause};
use oxwatch_detect::definition::{DetectorDefinition, DetectorKind};
use oxwatch_detect::{DetectorRegistry, EngineConfig, MemoryAlarmSink, MemoryDefinitionStore};
use oxwatch_runtime::clock::RealTimeClock;
use oxwatch_runtime::executor::{ExecutorConfig, PriorityExecutor};
use oxwatch_runtime::Tier;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SIGNALS: usize = 8;

fn definitions() -> Vec<DetectorDefinition> {
    (0..SIGNALS)
        .map(|i| DetectorDefinition {
            id: format!("high-{i}"),
            name: String::new(),
            signal_id: format!("sensor-{i}"),
            level: AlarmLevel::Critical,
            duration: TimePeriod::new(50, TimeUnit::Milliseconds),
            detector: DetectorKind::HighLimit {
                limit: 10.0,
                reset_limit: Some(5.0),
            },
        })
        .collect()
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn confirms_and_clears_across_threads_with_real_clock() {
    let executor = Arc::new(PriorityExecutor::new(ExecutorConfig::default()));
    executor.initialize().unwrap();
    let clock = Arc::new(RealTimeClock::start(executor.clone()).unwrap());
    let sink = Arc::new(MemoryAlarmSink::new());
    let registry = Arc::new(DetectorRegistry::new(
        clock.clone(),
        executor.clone(),
        Arc::new(MemoryDefinitionStore::from_definitions(definitions())),
        sink.clone(),
        EngineConfig::default(),
    ));

    for i in 0..SIGNALS {
        registry
            .signal_activated(&format!("sensor-{i}"), None)
            .unwrap();
    }

    // Each producer owns two signals and pushes a rising ramp.
    let producers: Vec<_> = (0..SIGNALS / 2)
        .map(|p| {
            let registry = registry.clone();
            thread::spawn(move || {
                let base = wall_clock_now();
                for step in 0..20i64 {
                    for signal in [p * 2, p * 2 + 1] {
                        registry
                            .push_value(&format!("sensor-{signal}"), 11.0 + step as f64, base + step)
                            .unwrap();
                    }
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(5), || registry.active_alarms().len() == SIGNALS),
        "not every signal confirmed its alarm"
    );
    assert_eq!(sink.len(), SIGNALS);

    let later = wall_clock_now() + 1_000;
    for i in 0..SIGNALS {
        registry
            .push_value(&format!("sensor-{i}"), 1.0, later)
            .unwrap();
    }
    assert!(
        wait_until(Duration::from_secs(5), || sink.open_events().is_empty()),
        "alarms did not clear"
    );
    assert!(sink
        .events()
        .iter()
        .all(|e| e.rtn_cause == Some(RtnCause::ReturnToNormal)));

    registry.shutdown();
    clock.stop();
    let report = executor.terminate();
    executor.join_termination();
    assert!(report.completed);
    assert_eq!(executor.stats(Tier::High).panicked, 0);
}
