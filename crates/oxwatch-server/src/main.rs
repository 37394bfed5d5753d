use anyhow::{Context, Result};
use oxwatch_detect::MemoryDefinitionStore;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing_subscriber::EnvFilter;

use oxwatch_server::config::ServerConfig;
use oxwatch_server::definition_seed;
use oxwatch_server::engine::{self, Engine};
use oxwatch_server::feed;
use oxwatch_server::sink::LoggingAlarmSink;

const FEED_BUFFER: usize = 1024;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  oxwatch-server [config.toml]                     Start the engine, reading samples from stdin");
    eprintln!("  oxwatch-server check-definitions <seed.json>     Validate a definitions seed file");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("-h" | "--help") => {
            print_usage();
            Ok(())
        }
        Some("check-definitions") => {
            let seed_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("check-definitions requires <seed.json> argument")
            })?;
            init_tracing("info")?;
            run_check_definitions(seed_path)
        }
        config_path => {
            let config = match config_path {
                Some(path) => ServerConfig::load(path)
                    .with_context(|| format!("Failed to load config {path}"))?,
                None => ServerConfig::default(),
            };
            init_tracing(&config.log_level)?;
            run_server(config).await
        }
    }
}

fn init_tracing(level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("oxwatch={level}").parse()?),
        )
        .init();
    Ok(())
}

fn run_check_definitions(seed_path: &str) -> Result<()> {
    let seed = definition_seed::load_seed_file(seed_path)?;
    let total = seed.definitions.len();
    let store = MemoryDefinitionStore::new();
    let valid = definition_seed::seed_store(&store, seed);
    if valid != total {
        anyhow::bail!("{} of {total} definitions rejected", total - valid);
    }
    tracing::info!(definitions = valid, "Definitions seed is valid");
    Ok(())
}

async fn run_server(config: ServerConfig) -> Result<()> {
    oxwatch_common::id::init(config.machine_id, config.node_id);

    tracing::info!(
        definitions_path = %config.definitions_path,
        rate_recheck_interval_ms = config.engine.rate_recheck_interval_ms,
        "Starting oxwatch-server"
    );

    let store = Arc::new(MemoryDefinitionStore::new());
    match definition_seed::load_seed_file(&config.definitions_path) {
        Ok(seed) => {
            definition_seed::seed_store(&store, seed);
        }
        Err(e) => {
            tracing::error!(error = %format_args!("{e:#}"), "No detector definitions loaded");
        }
    }

    let sink = Arc::new(LoggingAlarmSink::new());
    let (fatal_tx, mut fatal_rx) = watch::channel(false);
    let engine = Engine::start(&config, store, sink.clone(), move || {
        let _ = fatal_tx.send(true);
    })?;

    let stats_task = (config.stats_interval_secs > 0).then(|| {
        let executor = engine.executor();
        let period = Duration::from_secs(config.stats_interval_secs);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                engine::log_executor_stats(&executor);
            }
        })
    });

    let registry = engine.registry();
    let clock = engine.clock();
    let lines = feed::stdin_lines(FEED_BUFFER)?;

    let mut settle = false;
    tokio::select! {
        result = feed::run_feed(lines, &registry, &*clock) => {
            match result {
                Ok(stats) => {
                    tracing::info!(accepted = stats.accepted, malformed = stats.malformed, "Value stream closed");
                    settle = true;
                }
                Err(e) => tracing::error!(error = %format_args!("{e:#}"), "Value stream failed"),
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down gracefully...");
        }
        _ = fatal_rx.changed() => {
            tracing::error!("Executor saturated, shutting down");
        }
    }

    if let Some(task) = stats_task {
        task.abort();
    }

    let grace = Duration::from_millis(config.executor.shutdown_grace_ms);
    let report = tokio::task::spawn_blocking(move || {
        if settle {
            engine.settle(grace);
        }
        engine.shutdown()
    })
    .await
    .context("Shutdown task failed")?;

    tracing::info!(
        raised = sink.raised(),
        cleared = sink.cleared(),
        still_open = sink.open_count(),
        completed = report.completed,
        "oxwatch-server stopped"
    );
    Ok(())
}
