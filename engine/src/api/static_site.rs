//! Static file server for generated frontends
//!
//! Backs the hidden `launchpad serve-static` command, which is the default
//! frontend command of the deployer. `/health` answers before the file
//! service so readiness can be probed without an index file.

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::path::Path;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub fn router(dir: &Path) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .fallback_service(ServeDir::new(dir).append_index_html_on_directories(true))
        .layer(TraceLayer::new_for_http())
}

/// Serve `dir` on `host:port` until SIGTERM or Ctrl+C
pub async fn serve(dir: &Path, host: &str, port: u16) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid address {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(dir = %dir.display(), "Serving static files on http://{}", addr);
    axum::serve(listener, router(dir))
        .with_graceful_shutdown(crate::daemon::shutdown_signal())
        .await
        .context("Static server error")
}
