//! Metrics HTTP Server for the stream analyzer
//!
//! Exposes the metrics snapshot and a liveness probe for dashboards and orchestrators.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::net::SocketAddr;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::metrics::{MetricsSnapshot, SharedMetrics};

/// Errors that can occur when running the metrics server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to bind to address: {0}")]
    BindError(#[source] std::io::Error),

    #[error("Metrics server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// Handler for GET /metrics endpoint
/// Returns the current MetricsSnapshot as JSON
async fn get_metrics(State(metrics): State<SharedMetrics>) -> Json<MetricsSnapshot> {
    let snapshot = metrics.read().await.clone();
    Json(snapshot)
}

/// Handler for GET /health; 503 once the pipeline has aborted
async fn get_health(State(metrics): State<SharedMetrics>) -> (StatusCode, &'static str) {
    if metrics.read().await.aborted {
        (StatusCode::SERVICE_UNAVAILABLE, "aborted")
    } else {
        (StatusCode::OK, "ok")
    }
}

/// Creates the axum Router with the metrics and health endpoints
pub fn create_metrics_router(metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/health", get(get_health))
        .with_state(metrics)
}

/// Runs the metrics HTTP server until `shutdown` is cancelled
pub async fn run_metrics_server(
    metrics: SharedMetrics,
    bind: &str,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| ServerError::InvalidAddress(bind.to_string()))?;
    let app = create_metrics_router(metrics);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(ServerError::BindError)?;
    info!(addr = %addr, "Metrics server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(ServerError::Serve)?;

    Ok(())
}
