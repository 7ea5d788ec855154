use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use url_archiver::archiver::{ArchiveProcessor, ArchiveWorker};
use url_archiver::capture::default_strategies;
use url_archiver::config::Config;
use url_archiver::db::Database;
use url_archiver::queue::JobQueue;
use url_archiver::service::ArchiveService;
use url_archiver::web::{self, AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting url-archiver");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    let config = Arc::new(config);

    info!(
        data_dir = %config.data_dir.display(),
        workers = config.worker_concurrency,
        allow_delete = config.allow_delete,
        "Configuration loaded"
    );

    // Ensure data directories exist
    let archives_dir = config.archives_dir();
    tokio::fs::create_dir_all(&archives_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create archives directory: {}",
                archives_dir.display()
            )
        })?;

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    info!("Database initialized");

    let queue = JobQueue::new(db.clone(), config.max_attempts);
    let (strategies, page_capture) = default_strategies(&config);
    let missing = strategies.missing_kinds();
    if !missing.is_empty() {
        warn!(?missing, "No capture strategy registered for some kinds");
    }

    let processor = Arc::new(ArchiveProcessor::new(
        db.clone(),
        strategies,
        Arc::clone(&config),
    ));
    let worker = ArchiveWorker::new(Arc::clone(&config), queue.clone(), processor);

    // Recover from any interrupted processing on startup
    if let Err(e) = worker.recover_on_startup().await {
        error!("Failed to recover capture jobs on startup: {e:#}");
    }

    let worker_handle = tokio::spawn(async move {
        worker.run().await;
    });

    let state = AppState {
        service: ArchiveService::new(db, queue, Arc::clone(&config)),
        config,
    };
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web::serve(state).await {
            error!("Web server error: {e:#}");
        }
    });

    shutdown_signal().await;

    info!("Shutting down...");

    web_handle.abort();
    worker_handle.abort();
    page_capture.shutdown().await;

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,url_archiver=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
