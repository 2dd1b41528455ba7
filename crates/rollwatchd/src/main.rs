//! rollwatchd: deployment reconciliation daemon.
//!
//! # Usage
//!
//! ```text
//! rollwatchd run --data-dir /var/lib/rollwatch
//! rollwatchd status --data-dir /var/lib/rollwatch
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rollwatch_cluster::StoreCluster;
use rollwatch_deployment::DeploymentWorker;
use rollwatch_monitor::Monitor;
use rollwatch_state::StateStore;
use rollwatchd::{DaemonConfig, Dispatcher, Overrides};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollwatchd", about = "rollwatch deployment daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor loops and reconcile deployments until Ctrl-C.
    Run {
        /// Path to a rollwatchd.toml file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Pending monitor interval in seconds.
        #[arg(long)]
        pending_interval: Option<u64>,

        /// In-progress monitor interval in seconds.
        #[arg(long)]
        in_progress_interval: Option<u64>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        json_logs: bool,
    },

    /// Print environments and their in-progress deployments as JSON.
    Status {
        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/rollwatch")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            pending_interval,
            in_progress_interval,
            json_logs,
        } => {
            let overrides = Overrides {
                data_dir,
                pending_interval_secs: pending_interval,
                in_progress_interval_secs: in_progress_interval,
                json_logs,
            };
            let config = DaemonConfig::load(config.as_deref(), &overrides)?;
            init_tracing(&config)?;
            run(config).await
        }
        Command::Status { data_dir } => {
            let config = DaemonConfig {
                data_dir,
                ..Default::default()
            };
            init_tracing(&config)?;
            status(&config)
        }
    }
}

fn init_tracing(config: &DaemonConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.log_filter())
            .with_context(|| format!("invalid log filter {:?}", config.log_filter()))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    info!("rollwatch daemon starting");

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let db_path = config.db_path();

    // ── Initialize subsystems ──────────────────────────────────

    let state = StateStore::open(&db_path)
        .with_context(|| format!("opening state store {}", db_path.display()))?;
    info!(path = ?db_path, "state store opened");

    let cluster = Arc::new(StoreCluster::new(state.clone()));
    let worker = DeploymentWorker::new(Arc::new(state.clone()), Arc::new(state.clone()), cluster);

    // ── Shutdown signal and event channel ──────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events_tx, events_rx) = mpsc::channel(config.event_buffer);

    // ── Start background tasks ─────────────────────────────────

    let monitor = Monitor::new(Arc::new(state), events_tx, shutdown_rx.clone());
    let pending_handle = monitor.start_pending_loop(config.pending_interval());
    let in_progress_handle = monitor.start_in_progress_loop(config.in_progress_interval());
    // The loops own the remaining senders.
    drop(monitor);

    let dispatcher = Dispatcher::new(worker, config.max_concurrent_reconciles, shutdown_rx);
    let dispatch_handle = tokio::spawn(dispatcher.run(events_rx));

    info!(
        pending_interval_secs = config.pending_interval_secs,
        in_progress_interval_secs = config.in_progress_interval_secs,
        max_concurrent = config.max_concurrent_reconciles,
        "monitors running"
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal, stopping"),
    }
    let _ = shutdown_tx.send(true);

    let _ = pending_handle.await;
    let _ = in_progress_handle.await;
    let summary = dispatch_handle.await.context("dispatcher task failed")?;

    info!(
        updated = summary.updated,
        completed = summary.completed,
        failed = summary.failed,
        "rollwatch daemon stopped"
    );
    Ok(())
}

fn status(config: &DaemonConfig) -> anyhow::Result<()> {
    let db_path = config.db_path();
    let state = StateStore::open(&db_path)
        .with_context(|| format!("opening state store {}", db_path.display()))?;

    let environments = state
        .list_environments()
        .context("listing environments")?
        .into_iter()
        .map(|env| {
            serde_json::json!({
                "name": env.name,
                "cluster": env.cluster,
                "task_definition": env.task_definition,
                "desired_task_count": env.desired_task_count,
                "in_progress": env.in_progress_deployment(),
                "deployments": env.deployments.len(),
            })
        })
        .collect::<Vec<_>>();

    println!("{}", serde_json::to_string_pretty(&environments)?);
    Ok(())
}
