// HTTP server for Prometheus metrics and region health
//
// Listens on /metrics, /health and /regions/health (default: 0.0.0.0:9090)
// Used by Prometheus to scrape metrics and by routers to read region health

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::metrics;
use crate::region::RegionHealthMonitor;

/// Build the HTTP routes
pub fn router(monitor: Arc<RegionHealthMonitor>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/regions/health", get(all_regions_handler))
        .route("/regions/{region}/health", get(region_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(monitor)
}

/// Start the HTTP server and run until `shutdown` resolves
///
/// # Arguments
/// * `addr` - Address to listen on
/// * `monitor` - Monitor answering the region health routes
/// * `shutdown` - Future that resolves when the server should stop
pub async fn start_metrics_server<F>(addr: SocketAddr, monitor: Arc<RegionHealthMonitor>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    metrics::init().context("Failed to initialize metrics")?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind metrics server")?;
    info!("Starting metrics server on {}", listener.local_addr().unwrap_or(addr));

    axum::serve(listener, router(monitor))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Metrics server error")?;

    info!("Metrics server stopped");
    Ok(())
}

/// Metrics endpoint handler
async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Liveness endpoint
async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn all_regions_handler(State(monitor): State<Arc<RegionHealthMonitor>>) -> Response {
    Json(monitor.get_all_region_health().await).into_response()
}

async fn region_handler(State(monitor): State<Arc<RegionHealthMonitor>>, Path(region): Path<String>) -> Response {
    if !monitor.topology().snapshot().await.contains(&region) {
        return (StatusCode::NOT_FOUND, format!("Unknown region {}", region)).into_response();
    }
    Json(monitor.check_region_health(&region).await).into_response()
}
