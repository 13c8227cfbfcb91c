use focus_scheduler::application::commands::AppState;
use focus_scheduler::application::scheduler::start_scheduler;
use focus_scheduler::infrastructure::config::{process_env, WORKSPACE_ENV};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let workspace_root = match workspace_root() {
        Ok(path) => path,
        Err(message) => {
            error!("{message}");
            return ExitCode::FAILURE;
        }
    };
    let state = match AppState::new(workspace_root.clone()) {
        Ok(state) => state,
        Err(error) => {
            error!(workspace = %workspace_root.display(), %error, "bootstrap failed");
            return ExitCode::FAILURE;
        }
    };

    let config = state.config();
    info!(
        app = %config.app.app_name,
        timezone = %config.app.timezone,
        database = %state.database_path().display(),
        "workspace ready"
    );
    let handle = start_scheduler(state.scheduler().clone(), &config.scheduler);

    shutdown_signal().await;
    if let Some(task) = state.sessions().stop().await {
        info!(task_id = %task.id, "active session stopped for shutdown");
    }
    handle.stop().await;
    ExitCode::SUCCESS
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();
}

fn workspace_root() -> Result<PathBuf, String> {
    match process_env(WORKSPACE_ENV) {
        Some(path) if !path.trim().is_empty() => Ok(PathBuf::from(path.trim())),
        _ => std::env::current_dir()
            .map_err(|error| format!("cannot resolve working directory: {error}")),
    }
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!(%error, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!(%error, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
