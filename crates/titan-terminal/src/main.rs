//! # titan-terminal
//!
//! ```text
//! titan-terminal [CONFIG]            run one terminal until signalled
//! titan-terminal status [CONFIG]     print the shared registry as JSON
//! titan-terminal shutdown-all [CONFIG] [GRACE_SECS]
//!                                    drain every terminal on this data root
//! ```
//!
//! CONFIG defaults to the platform config path; `TITAN_*` variables
//! override it. `RUST_LOG` controls logging (default `info,titan=debug`).

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use titan_terminal::{CoordinationError, Coordinator, Terminal, TerminalConfig, TerminalResult};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("status") => status(args.get(1).map(PathBuf::from)),
        Some("shutdown-all") => {
            let grace = args.get(2).and_then(|s| s.parse::<u64>().ok());
            shutdown_all(args.get(1).map(PathBuf::from), grace).await
        }
        Some("run") => run(args.get(1).map(PathBuf::from)).await,
        other => run(other.map(PathBuf::from)).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "titan-terminal failed");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the tracing subscriber for logging.
///
/// ## Log Levels
/// - ERROR: Unrecoverable failures
/// - WARN: Recoverable issues (stale locks, torn WAL tails, retries)
/// - INFO: Lifecycle events (start, drain, stop, commits)
/// - DEBUG: Per-operation detail
///
/// Set RUST_LOG to control: `RUST_LOG=debug titan-terminal`
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,titan=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();
}

/// Runs one terminal until SIGINT/SIGTERM or a shutdown request.
async fn run(config_path: Option<PathBuf>) -> TerminalResult<()> {
    let config = TerminalConfig::load(config_path)?;
    let default_grace = config.coordinator.shutdown_grace();
    let mut terminal = Terminal::start(config).await?;
    let store = terminal.store();

    let mut interval = tokio::time::interval(terminal.config().coordinator.poll_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let signal = shutdown_signal();
    tokio::pin!(signal);

    let grace = loop {
        tokio::select! {
            _ = interval.tick() => {
                for action in terminal.poll_messages().await {
                    info!(?action, "Coordinator action");
                }
                if let Err(e) = store.flush_if_due() {
                    error!(error = %e, "Periodic WAL flush failed");
                }
                if let Some(grace) = terminal.shutdown_requested() {
                    break grace;
                }
            }

            _ = &mut signal => {
                info!("Shutdown signal received");
                break default_grace;
            }
        }
    };

    let report = terminal.shutdown(grace).await?;
    info!(
        aborted = report.aborted.len(),
        incomplete = report.incomplete.len(),
        committed = report.summary.committed_transactions,
        "Terminal exited"
    );
    Ok(())
}

/// Prints the registry.
fn status(config_path: Option<PathBuf>) -> TerminalResult<()> {
    let config = load_admin_config(config_path)?;
    let coordinator = Coordinator::new(config.data_root(), "admin", config.coordinator.clone());
    let entries = coordinator.registry().list()?;
    let json = serde_json::to_string_pretty(&entries).map_err(CoordinationError::from)?;
    println!("{}", json);
    Ok(())
}

/// Requests a system-wide drain, waits, then SIGTERMs stragglers.
async fn shutdown_all(config_path: Option<PathBuf>, grace_secs: Option<u64>) -> TerminalResult<()> {
    let config = load_admin_config(config_path)?;
    let grace = grace_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.coordinator.shutdown_grace());
    let coordinator = Coordinator::new(config.data_root(), "admin", config.coordinator.clone());

    coordinator.request_shutdown(grace).await?;
    // Terminals need a poll interval to notice, then up to `grace` to drain.
    let wait = grace + config.coordinator.poll_interval() * 2;
    let remaining = coordinator
        .await_drain(wait, config.coordinator.poll_interval())
        .await?;

    for entry in &remaining {
        if let Err(e) = coordinator.force_terminate(entry) {
            warn!(terminal_id = %entry.terminal_id, error = %e, "Could not terminate terminal");
        }
    }
    coordinator.clear_shutdown_signal()?;

    info!(forced = remaining.len(), "System-wide shutdown complete");
    Ok(())
}

/// Admin commands only need the data root; a terminal id is not required.
fn load_admin_config(config_path: Option<PathBuf>) -> TerminalResult<TerminalConfig> {
    let mut config = TerminalConfig::load_unvalidated(config_path)?;
    if config.terminal.id.is_empty() {
        config.terminal.id = "admin".to_string();
    }
    config.validate()?;
    Ok(config)
}

/// Completes on SIGINT (Ctrl+C) or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
