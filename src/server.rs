//! Axum HTTP servers for metrics and health probes

use std::net::SocketAddr;

use axum::{http::StatusCode, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::controller::metrics;
use crate::Result;

/// Metrics endpoint handler
async fn metrics_handler() -> (StatusCode, String) {
    match metrics::encode_registry() {
        Ok(buffer) => (StatusCode::OK, buffer),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

pub fn metrics_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
}

/// Liveness and readiness both answer as long as the process serves requests.
pub fn probe_router() -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(health))
}

async fn serve(addr: SocketAddr, app: Router, what: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("{} server listening on {}", what, listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Run the Prometheus metrics server
pub async fn run_metrics_server(addr: SocketAddr) -> Result<()> {
    serve(addr, metrics_router(), "Metrics").await
}

/// Run the health probe server
pub async fn run_probe_server(addr: SocketAddr) -> Result<()> {
    serve(addr, probe_router(), "Health probe").await
}
