mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use routes::ApiError;

use crate::config::Config;
use crate::service::ArchiveService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: ArchiveService,
    pub config: Arc<Config>,
}

/// Start the web server.
///
/// # Errors
///
/// Returns an error if the address is invalid or the server fails.
pub async fn serve(state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.web_host, state.config.web_port)
        .parse()
        .context("Invalid web server address")?;

    let app = create_app(state);

    info!(addr = %addr, "Starting HTTP web server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind web server")?;

    axum::serve(listener, app).await.context("Web server error")?;

    Ok(())
}

/// Create the application router: the JSON API plus static UI assets as fallback.
pub fn create_app(state: AppState) -> Router {
    let router = Router::new().merge(routes::router());

    let router = match find_static_dir(&state.config) {
        Some(static_dir) => {
            info!(static_dir = %static_dir.display(), "Serving static files");
            router.fallback_service(ServeDir::new(static_dir).append_index_html_on_directories(true))
        }
        None => {
            info!("No static directory found, serving API only");
            router.fallback(routes::not_found)
        }
    };

    router
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Find the static files directory.
///
/// An explicitly configured directory wins; otherwise `./static` is used
/// when it exists.
fn find_static_dir(config: &Config) -> Option<PathBuf> {
    if let Some(dir) = &config.static_dir {
        return Some(dir.clone());
    }

    let candidate = PathBuf::from("./static");
    candidate.is_dir().then_some(candidate)
}
