//! Three-tier task executor.
//!
//! | tier | ordering | queue | on saturation |
//! |---|---|---|---|
//! | high | per key | small, bounded | configured policy, `fatal` by default |
//! | medium | per key | large, bounded | configured policy, `drop_oldest` by default |
//! | low | none | unbounded by default | configured policy |
//!
//! The high and medium tiers share key exclusion: a key never runs on two
//! workers at the same time, whichever tier its tasks were submitted to.

pub mod config;
mod background;
mod inline;
mod ordered;
mod stats;

pub use config::{ExecutorConfig, RejectionPolicy, TierConfig};
pub use inline::InlineExecutor;
pub use stats::TierStats;

use crate::error::{ExecutorError, Result};
use background::BackgroundLane;
use ordered::{lane_of, OrderedLanes, LANES};
use serde::{Deserialize, Serialize};
use stats::TierCounters;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, MutexGuard};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// A unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::High => write!(f, "high"),
            Tier::Medium => write!(f, "medium"),
            Tier::Low => write!(f, "low"),
        }
    }
}

/// Token serializing every task that shares it. Ignored on the low tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderingKey(Arc<str>);

impl OrderingKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OrderingKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for OrderingKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl std::fmt::Display for OrderingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anything that accepts tasks by tier and ordering key.
///
/// Implemented by [`PriorityExecutor`] for production and by
/// [`InlineExecutor`] for deterministic, single-threaded runs.
pub trait TaskDispatcher: Send + Sync {
    /// Queues `job`. Never blocks on the job itself.
    fn submit(&self, tier: Tier, key: OrderingKey, job: Job) -> Result<()>;

    /// Free queue slots on `tier`. `None` means the tier never fills up, so
    /// producers need not wait before submitting.
    fn headroom(&self, _tier: Tier) -> Option<usize> {
        None
    }
}

/// Details passed to the rejection handler when a tier refuses a task.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub tier: Tier,
    pub key: OrderingKey,
    pub capacity: usize,
    pub policy: RejectionPolicy,
}

/// Callback invoked for every rejected task.
pub type RejectionHandler = Arc<dyn Fn(&Rejection) + Send + Sync>;

fn default_rejection_handler() -> RejectionHandler {
    Arc::new(|rejection: &Rejection| match rejection.policy {
        RejectionPolicy::Fatal => tracing::error!(
            tier = %rejection.tier,
            key = %rejection.key,
            capacity = rejection.capacity,
            "Executor tier saturated, task rejected"
        ),
        _ => tracing::warn!(
            tier = %rejection.tier,
            key = %rejection.key,
            capacity = rejection.capacity,
            "Executor tier full, task dropped"
        ),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Terminating,
    Terminated,
}

/// Outcome of [`PriorityExecutor::terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationReport {
    /// All workers exited within the grace period.
    pub completed: bool,
    /// Queued tasks discarded instead of run.
    pub cancelled: usize,
}

/// Tracks live workers. Each worker holds a sender clone and never sends;
/// the channel disconnects once the last worker has exited.
struct WorkerGauge {
    live: Mutex<Option<Sender<()>>>,
    exited: Receiver<()>,
}

impl WorkerGauge {
    fn new() -> Self {
        let (live, exited) = unbounded();
        Self {
            live: Mutex::new(Some(live)),
            exited,
        }
    }

    /// `None` once the executor is terminating.
    fn register(&self) -> Option<Sender<()>> {
        self.live.lock().clone()
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        self.live.lock().take();
        let deadline = Instant::now() + timeout;
        loop {
            match self.exited.recv_deadline(deadline) {
                Err(RecvTimeoutError::Disconnected) => return true,
                Err(RecvTimeoutError::Timeout) => return false,
                Ok(()) => continue,
            }
        }
    }
}

/// Runs a job, converting a panic into a logged, counted failure.
pub(crate) fn run_guarded(tier: Tier, key: Option<&OrderingKey>, job: Job, counters: &TierCounters) {
    match catch_unwind(AssertUnwindSafe(job)) {
        Ok(()) => counters.completed(),
        Err(_) => {
            counters.panicked();
            tracing::error!(
                tier = %tier,
                key = key.map(OrderingKey::as_str).unwrap_or("-"),
                "Task panicked"
            );
        }
    }
}

pub struct PriorityExecutor {
    config: ExecutorConfig,
    ordered: Arc<OrderedLanes>,
    background: Arc<BackgroundLane>,
    gauge: WorkerGauge,
    workers: Mutex<Vec<JoinHandle<()>>>,
    lifecycle: Mutex<Lifecycle>,
    on_reject: RejectionHandler,
}

impl PriorityExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let ordered = Arc::new(OrderedLanes::new(
            config.high.clone(),
            config.medium.clone(),
        ));
        let background = Arc::new(BackgroundLane::new(config.low.clone()));
        Self {
            config,
            ordered,
            background,
            gauge: WorkerGauge::new(),
            workers: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(Lifecycle::Created),
            on_reject: default_rejection_handler(),
        }
    }

    /// Replaces the handler called for every rejected task. Fatal-tier
    /// rejections are programmer errors and the host decides how to escalate.
    pub fn with_rejection_handler(mut self, handler: RejectionHandler) -> Self {
        self.on_reject = handler;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock()
    }

    pub fn is_running(&self) -> bool {
        *self.lifecycle() == Lifecycle::Running
    }

    /// Starts the worker threads of every tier. Calling it twice is a no-op.
    pub fn initialize(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle();
        match *lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Running => return Ok(()),
            Lifecycle::Terminating | Lifecycle::Terminated => {
                return Err(ExecutorError::ShuttingDown { tier: Tier::High })
            }
        }

        self.ordered.open();
        self.background.open();

        let mut handles = Vec::new();
        let spawned = self.spawn_all(&mut handles);
        self.workers.lock().extend(handles);
        if let Err(e) = spawned {
            drop(lifecycle);
            self.terminate();
            return Err(e);
        }

        *lifecycle = Lifecycle::Running;
        tracing::info!(
            high_workers = self.config.high.workers,
            medium_workers = self.config.medium.workers,
            low_workers = self.config.low.workers,
            "Priority executor started"
        );
        Ok(())
    }

    fn spawn_all(&self, handles: &mut Vec<JoinHandle<()>>) -> Result<()> {
        for tier in [Tier::High, Tier::Medium] {
            let lane = lane_of(tier).unwrap_or_default();
            let workers = worker_count(tier, self.ordered.config(lane).workers);
            for n in 0..workers {
                let ordered = self.ordered.clone();
                let slow = Duration::from_millis(self.config.slow_task_warn_ms);
                let exit = self.register_worker()?;
                let handle = std::thread::Builder::new()
                    .name(format!("oxwatch-{tier}-{n}"))
                    .spawn(move || {
                        let _exit = exit;
                        ordered_worker(&ordered, tier, lane, slow);
                    })?;
                handles.push(handle);
            }
        }

        let workers = worker_count(Tier::Low, self.config.low.workers);
        for n in 0..workers {
            let background = self.background.clone();
            let jobs = self.background.subscribe();
            let exit = self.register_worker()?;
            let handle = std::thread::Builder::new()
                .name(format!("oxwatch-low-{n}"))
                .spawn(move || {
                    let _exit = exit;
                    for job in jobs.iter() {
                        run_guarded(Tier::Low, None, job, background.counters());
                    }
                })?;
            handles.push(handle);
        }
        Ok(())
    }

    fn register_worker(&self) -> Result<Sender<()>> {
        self.gauge
            .register()
            .ok_or(ExecutorError::ShuttingDown { tier: Tier::High })
    }

    /// Stops admission, drains or discards queued work per tier, and waits up
    /// to the configured grace period for workers to finish. Whatever is
    /// still queued after the grace period is discarded.
    pub fn terminate(&self) -> TerminationReport {
        {
            let mut lifecycle = self.lifecycle();
            match *lifecycle {
                Lifecycle::Terminating | Lifecycle::Terminated => {
                    return TerminationReport {
                        completed: true,
                        cancelled: 0,
                    }
                }
                _ => *lifecycle = Lifecycle::Terminating,
            }
        }

        let mut cancelled = self.ordered.shutdown() + self.background.shutdown();
        let grace = Duration::from_millis(self.config.shutdown_grace_ms);
        let completed = self.gauge.wait_idle(grace);
        if !completed {
            cancelled += self.ordered.cancel_all() + self.background.cancel_all();
            tracing::warn!(
                grace_ms = self.config.shutdown_grace_ms,
                cancelled,
                "Executor grace period elapsed, queued tasks cancelled"
            );
        } else {
            tracing::info!(cancelled, "Priority executor terminated");
        }
        TerminationReport {
            completed,
            cancelled,
        }
    }

    /// Blocks until every worker thread has exited. Call after [`terminate`](Self::terminate).
    pub fn join_termination(&self) {
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("Executor worker thread panicked");
            }
        }
        *self.lifecycle() = Lifecycle::Terminated;
    }

    pub fn stats(&self, tier: Tier) -> TierStats {
        match lane_of(tier) {
            Some(lane) => self.ordered.counters(lane).snapshot(),
            None => self.background.counters().snapshot(),
        }
    }

    /// Tasks queued but not yet started on `tier`.
    pub fn queued(&self, tier: Tier) -> usize {
        match lane_of(tier) {
            Some(lane) => self.ordered.queued(lane),
            None => self.background.queued(),
        }
    }
}

impl TaskDispatcher for PriorityExecutor {
    fn submit(&self, tier: Tier, key: OrderingKey, job: Job) -> Result<()> {
        match *self.lifecycle() {
            Lifecycle::Created => return Err(ExecutorError::NotRunning),
            Lifecycle::Terminating | Lifecycle::Terminated => {
                return Err(ExecutorError::ShuttingDown { tier })
            }
            Lifecycle::Running => {}
        }
        match lane_of(tier) {
            Some(lane) => self.ordered.submit(lane, key, job, &self.on_reject),
            None => self.background.submit(key, job, &self.on_reject),
        }
    }

    fn headroom(&self, tier: Tier) -> Option<usize> {
        let capacity = match tier {
            Tier::High => self.config.high.queue_capacity,
            Tier::Medium => self.config.medium.queue_capacity,
            Tier::Low => self.config.low.queue_capacity,
        }?;
        Some(capacity.saturating_sub(self.queued(tier)))
    }
}

impl Drop for PriorityExecutor {
    fn drop(&mut self) {
        if self.is_running() {
            self.terminate();
            self.join_termination();
        }
    }
}

fn worker_count(tier: Tier, configured: usize) -> usize {
    if configured == 0 {
        tracing::warn!(tier = %tier, "Tier configured with zero workers, using one");
        1
    } else {
        configured
    }
}

fn ordered_worker(lanes: &OrderedLanes, tier: Tier, lane: usize, slow: Duration) {
    while let Some((key, job)) = lanes.take(lane) {
        let started = Instant::now();
        run_guarded(tier, Some(&key), job, lanes.counters(lane));
        let elapsed = started.elapsed();
        if elapsed > slow {
            tracing::warn!(
                tier = %tier,
                key = %key,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow task on ordered tier"
            );
        }
        lanes.finish(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn small_config() -> ExecutorConfig {
        ExecutorConfig {
            high: TierConfig {
                workers: 2,
                queue_capacity: Some(1024),
                rejection_policy: RejectionPolicy::Fatal,
                drain_on_shutdown: true,
            },
            medium: TierConfig {
                workers: 4,
                queue_capacity: Some(4096),
                rejection_policy: RejectionPolicy::DropOldest,
                drain_on_shutdown: true,
            },
            low: TierConfig::low_default(),
            shutdown_grace_ms: 2_000,
            slow_task_warn_ms: 1_000,
        }
    }

    #[test]
    fn submit_before_initialize_is_refused() {
        let executor = PriorityExecutor::new(small_config());
        let err = executor
            .submit(Tier::High, "k".into(), Box::new(|| {}))
            .unwrap_err();
        assert!(matches!(err, ExecutorError::NotRunning));
    }

    #[test]
    fn per_key_order_is_preserved_across_workers() {
        let executor = PriorityExecutor::new(small_config());
        executor.initialize().unwrap();

        let seen: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        for i in 0..200 {
            for key in 0..4 {
                let seen = seen.clone();
                executor
                    .submit(
                        Tier::Medium,
                        OrderingKey::from(format!("key-{key}")),
                        Box::new(move || seen.lock().push((key, i))),
                    )
                    .unwrap();
            }
        }

        let report = executor.terminate();
        executor.join_termination();
        assert!(report.completed);

        let seen = seen.lock();
        assert_eq!(seen.len(), 800);
        for key in 0..4 {
            let order: Vec<usize> = seen.iter().filter(|(k, _)| *k == key).map(|(_, i)| *i).collect();
            assert_eq!(order, (0..200).collect::<Vec<_>>());
        }
    }

    #[test]
    fn same_key_never_runs_concurrently() {
        let executor = PriorityExecutor::new(small_config());
        executor.initialize().unwrap();

        let in_flight = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        for i in 0..100 {
            let tier = if i % 2 == 0 { Tier::High } else { Tier::Medium };
            let in_flight = in_flight.clone();
            let overlaps = overlaps.clone();
            executor
                .submit(
                    tier,
                    "shared".into(),
                    Box::new(move || {
                        if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        std::thread::sleep(Duration::from_micros(200));
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    }),
                )
                .unwrap();
        }

        executor.terminate();
        executor.join_termination();
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        let total = executor.stats(Tier::High).completed + executor.stats(Tier::Medium).completed;
        assert_eq!(total, 100);
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let mut config = small_config();
        config.high.workers = 1;
        let executor = PriorityExecutor::new(config);
        executor.initialize().unwrap();

        let (tx, rx) = mpsc::channel();
        executor
            .submit(Tier::High, "k".into(), Box::new(|| panic!("boom")))
            .unwrap();
        executor
            .submit(Tier::High, "k".into(), Box::new(move || tx.send(()).unwrap()))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        executor.terminate();
        executor.join_termination();
        let stats = executor.stats(Tier::High);
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn low_tier_runs_unordered_background_work() {
        let executor = PriorityExecutor::new(small_config());
        executor.initialize().unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            executor
                .submit(Tier::Low, "ignored".into(), Box::new(move || tx.send(i).unwrap()))
                .unwrap();
        }
        let mut got: Vec<i32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        got.sort_unstable();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
        executor.terminate();
        executor.join_termination();
    }

    #[test]
    fn headroom_tracks_queued_tasks_on_bounded_tiers() {
        let mut config = small_config();
        config.high.workers = 1;
        config.high.queue_capacity = Some(8);
        let executor = PriorityExecutor::new(config);
        executor.initialize().unwrap();
        assert_eq!(executor.headroom(Tier::High), Some(8));
        assert_eq!(executor.headroom(Tier::Low), None);

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        executor
            .submit(
                Tier::High,
                "busy".into(),
                Box::new(move || {
                    started_tx.send(()).unwrap();
                    let _ = release_rx.recv_timeout(Duration::from_secs(5));
                }),
            )
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        for _ in 0..3 {
            executor
                .submit(Tier::High, "busy".into(), Box::new(|| {}))
                .unwrap();
        }
        assert_eq!(executor.headroom(Tier::High), Some(5));

        release_tx.send(()).unwrap();
        executor.terminate();
        executor.join_termination();
        assert_eq!(executor.headroom(Tier::High), Some(8));
    }

    #[test]
    fn terminate_rejects_new_work_and_is_idempotent() {
        let executor = PriorityExecutor::new(small_config());
        executor.initialize().unwrap();
        let first = executor.terminate();
        assert!(first.completed);
        let err = executor
            .submit(Tier::Medium, "k".into(), Box::new(|| {}))
            .unwrap_err();
        assert!(matches!(err, ExecutorError::ShuttingDown { tier: Tier::Medium }));
        let second = executor.terminate();
        assert_eq!(second.cancelled, 0);
        executor.join_termination();
        assert!(!executor.is_running());
    }

    #[test]
    fn grace_timeout_cancels_queued_work() {
        let mut config = small_config();
        config.medium.workers = 1;
        config.shutdown_grace_ms = 50;
        let executor = PriorityExecutor::new(config);
        executor.initialize().unwrap();

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        executor
            .submit(
                Tier::Medium,
                "slow".into(),
                Box::new(move || {
                    started_tx.send(()).unwrap();
                    let _ = release_rx.recv_timeout(Duration::from_secs(5));
                }),
            )
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        for _ in 0..5 {
            executor
                .submit(Tier::Medium, "slow".into(), Box::new(|| {}))
                .unwrap();
        }

        let report = executor.terminate();
        assert!(!report.completed);
        assert_eq!(report.cancelled, 5);
        release_tx.send(()).unwrap();
        executor.join_termination();
        assert_eq!(executor.stats(Tier::Medium).cancelled, 5);
    }
}
