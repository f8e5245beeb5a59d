//! mfrm-cal - Calibration Readiness & Versioning service
//!
//! Gates calibration runs on panel readiness, submits expert scores to
//! the external MFRM Estimation Service, and manages the single active
//! calibration version.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mfrm_cal::services::{CalibrationManager, HttpEstimator};
use mfrm_cal::{build_router, config, AppState};
use mfrm_common::config::{ensure_root_folder, load_toml_config, resolve_root_folder};

/// Command-line arguments for mfrm-cal
#[derive(Parser, Debug)]
#[command(name = "mfrm-cal")]
#[command(about = "Calibration readiness and versioning service for MFRM essay scoring")]
#[command(version)]
struct Args {
    /// Root folder holding the database
    #[arg(short, long, env = "MFRM_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML config file (default: ~/.config/mfrm/mfrm-cal.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = load_toml_config(args.config.as_deref()).context("Failed to load config")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.clone().into()),
        )
        .init();

    info!(
        "Starting mfrm-cal v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let db_path = ensure_root_folder(&root_folder)
        .with_context(|| format!("Failed to initialize root folder {}", root_folder.display()))?;
    info!("Database: {}", db_path.display());

    let db = mfrm_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let estimator_url = config::resolve_estimator_url(&db, &toml_config).await?;
    let estimator_timeout = config::resolve_estimator_timeout(&db, &toml_config).await?;
    info!(
        url = %estimator_url,
        timeout_secs = estimator_timeout.as_secs(),
        "Estimation service configured"
    );

    let estimator = HttpEstimator::new(&estimator_url, estimator_timeout)
        .context("Failed to build estimation client")?;
    let manager = Arc::new(CalibrationManager::new(
        db.clone(),
        Arc::new(estimator),
        estimator_timeout,
    ));

    manager
        .recover_interrupted_runs()
        .await
        .context("Failed to recover interrupted runs")?;

    let state = AppState::new(db, manager);
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    let bind_address = config::resolve_bind_address(args.bind.as_deref(), &toml_config);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;
    info!("Listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then cancel in-flight estimator calls
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }

    shutdown.cancel();
}
