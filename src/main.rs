//! jobhub — asynchronous background-job service.
//!
//! Main entry point: parses the `-c` flag, loads and validates the
//! configuration, wires the backend, worker pool, controller, API server,
//! and log sweeper together, and owns process-wide shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use jobhub_api::AppState;
use jobhub_core::config::{self, AppConfig, LogLevel};
use jobhub_core::error::AppError;
use jobhub_core::traits::{Pool, QueueBackend};
use jobhub_service::Controller;
use jobhub_worker::jobs::{DemoJob, KNOWN_JOB_DEMO};
use jobhub_worker::{ContextTemplate, JobRegistry, LogSweeper, WorkerPool, WorkerPoolOptions};

/// How long shutdown waits for the pool and server to drain.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "jobhub", about = "Asynchronous background-job service")]
struct Cli {
    /// Path to the yaml config file
    #[arg(short = 'c', value_name = "PATH")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load configurations with error: {err}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(err) = run(config).await {
        tracing::error!("Server exit with error: {err}");
        std::process::exit(1);
    }

    tracing::info!("Server gracefully exit");
}

/// Initialize the service log at the configured level.
fn init_logging(config: &AppConfig) {
    let level = config
        .logger
        .level
        .parse::<LogLevel>()
        .unwrap_or(LogLevel::Info);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.tracing_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Wire all components and block until shutdown.
async fn run(config: AppConfig) -> Result<(), AppError> {
    let config = Arc::new(config);
    let log_base = PathBuf::from(&config.logger.path);

    // Root cancellation signal and the root error channel. A fatal
    // steady-state error triggers the same graceful shutdown as a signal.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<AppError>(1);

    // ── Step 1: queue backend ────────────────────────────────────
    let backend = jobhub_backend::connect(&config.worker_pool).await?;
    if !backend.health_check().await? {
        return Err(AppError::backend("queue backend failed its health check"));
    }

    // ── Step 2: job registry (bootstrap-only writes) ─────────────
    let mut registry = JobRegistry::new();
    registry.register(KNOWN_JOB_DEMO, Arc::new(DemoJob))?;
    let registry = Arc::new(registry);

    // ── Step 3: worker pool ──────────────────────────────────────
    let level = config.logger.level.parse::<LogLevel>()?;
    let template = ContextTemplate::new(shutdown_rx.clone(), log_base.clone(), level);
    let pool = Arc::new(WorkerPool::new(
        backend,
        registry,
        template,
        WorkerPoolOptions::with_workers(config.worker_pool.workers),
        shutdown_rx.clone(),
    ));
    let mut tasks = Arc::clone(&pool).start();

    // ── Step 4: controller + API server ──────────────────────────
    let controller = Arc::new(Controller::new(
        Arc::clone(&pool) as Arc<dyn Pool>,
        log_base.clone(),
    ));
    let state = AppState::new(Arc::clone(&config), controller, config::auth_secret());

    {
        let fatal_tx = fatal_tx.clone();
        let shutdown_rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = jobhub_api::app::serve(state, shutdown_rx).await {
                let _ = fatal_tx.send(err).await;
            }
        }));
    }

    // ── Step 5: log sweeper ──────────────────────────────────────
    tasks.push(
        LogSweeper::new(log_base, config.logger.archive_period).start(shutdown_rx.clone()),
    );

    // Block here until a signal arrives or something fatal happens.
    let mut fatal: Option<AppError> = None;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received");
        }
        _ = terminate_signal() => {
            tracing::info!("Termination signal received");
        }
        err = fatal_rx.recv() => {
            fatal = err;
        }
    }

    // Cancel everything and drain within the shutdown window.
    let _ = shutdown_tx.send(true);
    let drain = async {
        for task in tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_DRAIN, drain).await.is_err() {
        tracing::warn!("Drain window elapsed, forcing exit");
    }

    match fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn terminate_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    }

    #[cfg(not(unix))]
    std::future::pending::<()>().await
}
