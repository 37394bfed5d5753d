use crate::config::ServerConfig;
use anyhow::Context;
use oxwatch_detect::{AlarmSink, DefinitionStore, DetectorRegistry};
use oxwatch_runtime::clock::RealTimeClock;
use oxwatch_runtime::executor::{
    PriorityExecutor, Rejection, RejectionHandler, RejectionPolicy, TerminationReport,
};
use oxwatch_runtime::Tier;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The running detection stack: executor, wall clock and registry.
pub struct Engine {
    executor: Arc<PriorityExecutor>,
    clock: Arc<RealTimeClock>,
    registry: Arc<DetectorRegistry>,
}

impl Engine {
    /// Starts the executor and clock, then activates every signal the store
    /// knows. `on_fatal` runs when a fatal tier rejects work.
    pub fn start(
        config: &ServerConfig,
        store: Arc<dyn DefinitionStore>,
        sink: Arc<dyn AlarmSink>,
        on_fatal: impl Fn() + Send + Sync + 'static,
    ) -> anyhow::Result<Self> {
        let handler: RejectionHandler = Arc::new(move |rejection: &Rejection| {
            if rejection.policy == RejectionPolicy::Fatal {
                tracing::error!(
                    tier = %rejection.tier,
                    key = %rejection.key,
                    capacity = rejection.capacity,
                    "Executor saturated, escalating"
                );
                on_fatal();
            } else {
                tracing::warn!(
                    tier = %rejection.tier,
                    key = %rejection.key,
                    capacity = rejection.capacity,
                    policy = %rejection.policy,
                    "Executor tier full, task dropped"
                );
            }
        });

        let executor = Arc::new(
            PriorityExecutor::new(config.executor.clone()).with_rejection_handler(handler),
        );
        executor.initialize().context("Failed to start executor")?;
        let clock =
            Arc::new(RealTimeClock::start(executor.clone()).context("Failed to start clock")?);
        let registry = Arc::new(DetectorRegistry::new(
            clock.clone(),
            executor.clone(),
            store.clone(),
            sink,
            config.engine.clone(),
        ));

        let signals = store.signals().context("Failed to list signals")?;
        for signal in &signals {
            registry
                .signal_activated(signal, None)
                .with_context(|| format!("Failed to activate {signal}"))?;
        }
        tracing::info!(signals = signals.len(), "Detection engine started");

        Ok(Self {
            executor,
            clock,
            registry,
        })
    }

    pub fn registry(&self) -> Arc<DetectorRegistry> {
        self.registry.clone()
    }

    pub fn clock(&self) -> Arc<RealTimeClock> {
        self.clock.clone()
    }

    pub fn executor(&self) -> Arc<PriorityExecutor> {
        self.executor.clone()
    }

    /// Waits until the high and medium tiers have no queued work. Returns
    /// false if `timeout` elapsed first.
    pub fn settle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let queued =
                self.executor.queued(Tier::High) + self.executor.queued(Tier::Medium);
            if queued == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                tracing::warn!(queued, "Engine did not settle before shutdown");
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Deactivates every detector, then stops the clock and drains the
    /// executor. Blocks up to the configured grace period.
    pub fn shutdown(self) -> TerminationReport {
        self.registry.shutdown();
        self.clock.stop();
        let report = self.executor.terminate();
        self.executor.join_termination();
        log_executor_stats(&self.executor);
        tracing::info!(
            completed = report.completed,
            cancelled = report.cancelled,
            "Detection engine stopped"
        );
        report
    }
}

pub fn log_executor_stats(executor: &PriorityExecutor) {
    for tier in [Tier::High, Tier::Medium, Tier::Low] {
        let stats = executor.stats(tier);
        tracing::info!(
            tier = %tier,
            queued = executor.queued(tier),
            submitted = stats.submitted,
            completed = stats.completed,
            rejected = stats.rejected,
            dropped = stats.dropped,
            cancelled = stats.cancelled,
            panicked = stats.panicked,
            "Executor stats"
        );
    }
}
