use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use midplane::application::execution_engine::ExecutionEngine;
use midplane::application::order_book::OrderBook;
use midplane::application::performance_monitor::{MonitorThresholds, PerformanceMonitor};
use midplane::application::risk_sizer::RiskSizer;
use midplane::application::validator::SignalValidator;
use midplane::clock::{SystemClock, UuidGenerator};
use midplane::config::Config;
use midplane::infrastructure::blob_sink::JsonFileBlobSink;
use midplane::infrastructure::core::service_runtime::ServiceRuntime;
use midplane::infrastructure::error_log::ErrorLog;
use midplane::infrastructure::simulated_broker::SimulatedBroker;

const ORDER_SERVICE: &str = "order_management";

#[derive(Parser)]
#[command(name = "midplane", about = "ML signal execution midplane")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the midplane, accepting signals until interrupted.
    Serve,
    /// Print a one-shot status snapshot and exit.
    Status,
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_path(&path).context("loading config file"),
        None => Config::from_env().context("loading config from environment"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(stdout_layer)
        .init();

    let config = load_config(cli.config)?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Status => status(config).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!("starting midplane");

    let clock = Arc::new(SystemClock);
    let ids = Arc::new(UuidGenerator);
    let error_log = Arc::new(ErrorLog::new(clock.clone()));

    let mut runtime = ServiceRuntime::with_defaults(clock.clone());
    runtime.register(ORDER_SERVICE, config.service.clone());
    let runtime = Arc::new(runtime);

    let broker = Arc::new(SimulatedBroker::new(clock.clone(), ids.clone()));
    let order_book = Arc::new(OrderBook::new(clock.clone(), broker.clone()));
    let validator = Arc::new(SignalValidator::new(config.risk_limits.clone(), clock.clone()));
    let sizer = Arc::new(RiskSizer::with_default_correlation(config.risk_limits.clone()));
    let monitor = Arc::new(PerformanceMonitor::new(clock.clone(), MonitorThresholds::default(), config.starting_equity));
    let blob_sink = Arc::new(JsonFileBlobSink::new("midplane-audit.jsonl"));

    let engine = Arc::new(ExecutionEngine::new(
        clock.clone(),
        ids,
        validator,
        sizer,
        order_book,
        broker,
        runtime,
        monitor.clone(),
        blob_sink,
        error_log.clone(),
    ));

    let _dashboard_loop = monitor.spawn_dashboard_loop();

    tracing::info!(
        starting_equity = %config.starting_equity,
        execution_timeout_secs = config.execution_timeout.as_secs(),
        "midplane configured"
    );
    // no inbound signal transport here; `engine` is ready for an embedder
    // to call `submit` directly.
    let _ = &engine;

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;

    monitor.shutdown();

    tracing::info!(
        connection_faults = error_log.count_by_category(midplane::domain::errors::ErrorCategory::Connection).await,
        "shutting down"
    );
    Ok(())
}

async fn status(config: Config) -> Result<()> {
    println!("midplane status");
    println!("  starting_equity: {}", config.starting_equity);
    println!("  max_position_size: {}", config.risk_limits.max_position_size);
    println!("  max_signals_per_hour: {}", config.risk_limits.max_signals_per_hour);
    println!("  execution_timeout_secs: {}", config.execution_timeout.as_secs());
    Ok(())
}
