use oxwatch_runtime::executor::{
    ExecutorConfig, PriorityExecutor, Rejection, RejectionPolicy, TierConfig,
};
use oxwatch_runtime::{ExecutorError, OrderingKey, TaskDispatcher, Tier};
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CAPACITY: usize = 100;
const CONFIRMATIONS: usize = 10_000;

fn overload_config(policy: RejectionPolicy) -> ExecutorConfig {
    ExecutorConfig {
        medium: TierConfig {
            workers: 1,
            queue_capacity: Some(CAPACITY),
            rejection_policy: policy,
            drain_on_shutdown: true,
        },
        shutdown_grace_ms: 10_000,
        ..ExecutorConfig::default()
    }
}

/// Occupies the single medium worker until the returned sender is used.
fn block_medium_worker(executor: &PriorityExecutor) -> mpsc::Sender<()> {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    executor
        .submit(
            Tier::Medium,
            OrderingKey::from("blocker"),
            Box::new(move || {
                started_tx.send(()).unwrap();
                release_rx.recv_timeout(Duration::from_secs(30)).unwrap();
            }),
        )
        .unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    release_tx
}

fn submit_confirmations(
    executor: &PriorityExecutor,
    fired: &Arc<Mutex<HashMap<usize, usize>>>,
) -> Vec<ExecutorError> {
    let mut errors = Vec::new();
    for id in 0..CONFIRMATIONS {
        let fired = fired.clone();
        let result = executor.submit(
            Tier::Medium,
            OrderingKey::from(format!("instance-{}", id % 64)),
            Box::new(move || {
                *fired.lock().unwrap().entry(id).or_insert(0) += 1;
            }),
        );
        if let Err(e) = result {
            errors.push(e);
        }
    }
    errors
}

#[test]
fn drop_oldest_discards_exactly_the_overflow() {
    let executor = PriorityExecutor::new(overload_config(RejectionPolicy::DropOldest));
    executor.initialize().unwrap();
    let release = block_medium_worker(&executor);

    let fired = Arc::new(Mutex::new(HashMap::new()));
    let errors = submit_confirmations(&executor, &fired);
    assert!(errors.is_empty());
    assert_eq!(executor.queued(Tier::Medium), CAPACITY);

    release.send(()).unwrap();
    let report = executor.terminate();
    executor.join_termination();
    assert!(report.completed);

    let stats = executor.stats(Tier::Medium);
    assert_eq!(stats.submitted, (CONFIRMATIONS + 1) as u64);
    assert_eq!(stats.dropped, (CONFIRMATIONS - CAPACITY) as u64);
    assert_eq!(stats.rejected, 0);
    assert_eq!(stats.completed, (CAPACITY + 1) as u64);

    let fired = fired.lock().unwrap();
    assert_eq!(fired.len(), CAPACITY);
    assert!(fired.values().all(|&n| n == 1), "a confirmation fired twice");
    // The newest confirmations survive.
    assert!(fired.keys().all(|&id| id >= CONFIRMATIONS - CAPACITY));
}

#[test]
fn log_and_drop_rejects_exactly_the_overflow() {
    let executor = PriorityExecutor::new(overload_config(RejectionPolicy::LogAndDrop));
    executor.initialize().unwrap();
    let release = block_medium_worker(&executor);

    let fired = Arc::new(Mutex::new(HashMap::new()));
    let errors = submit_confirmations(&executor, &fired);
    assert_eq!(errors.len(), CONFIRMATIONS - CAPACITY);
    assert!(errors
        .iter()
        .all(|e| matches!(e, ExecutorError::Saturated { tier: Tier::Medium, .. })));

    release.send(()).unwrap();
    executor.terminate();
    executor.join_termination();

    let stats = executor.stats(Tier::Medium);
    assert_eq!(stats.rejected, (CONFIRMATIONS - CAPACITY) as u64);
    assert_eq!(stats.dropped, 0);

    let fired = fired.lock().unwrap();
    assert_eq!(fired.len(), CAPACITY);
    assert!(fired.values().all(|&n| n == 1), "a confirmation fired twice");
    // The oldest confirmations were admitted.
    assert!(fired.keys().all(|&id| id < CAPACITY));
}

#[test]
fn fatal_high_tier_escalates_through_handler() {
    let escalated = Arc::new(Mutex::new(0usize));
    let counter = escalated.clone();
    let mut config = ExecutorConfig::default();
    config.high = TierConfig {
        workers: 1,
        queue_capacity: Some(4),
        rejection_policy: RejectionPolicy::Fatal,
        drain_on_shutdown: true,
    };
    let executor = PriorityExecutor::new(config).with_rejection_handler(Arc::new(move |r: &Rejection| {
        assert_eq!(r.tier, Tier::High);
        *counter.lock().unwrap() += 1;
    }));
    executor.initialize().unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    executor
        .submit(
            Tier::High,
            "blocker".into(),
            Box::new(move || {
                started_tx.send(()).unwrap();
                release_rx.recv_timeout(Duration::from_secs(30)).unwrap();
            }),
        )
        .unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let failures = (0..10)
        .filter(|_| executor.submit(Tier::High, "sig".into(), Box::new(|| {})).is_err())
        .count();
    assert_eq!(failures, 6);
    assert_eq!(*escalated.lock().unwrap(), 6);

    release_tx.send(()).unwrap();
    executor.terminate();
    executor.join_termination();
    assert_eq!(executor.stats(Tier::High).completed, 5);
}
