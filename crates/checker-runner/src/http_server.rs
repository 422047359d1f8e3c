//! HTTP server for the Prometheus metrics and status endpoints.

use crate::metrics::MetricsRegistry;
use crate::runner::{Observation, Observations};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    registry: Arc<MetricsRegistry>,
    observations: Observations,
}

/// HTTP server for `/metrics` and `/status`
pub struct StatusServer {
    state: AppState,
    listen_addr: String,
}

impl StatusServer {
    pub fn new(
        registry: Arc<MetricsRegistry>,
        observations: Observations,
        listen_addr: String,
    ) -> Self {
        Self {
            state: AppState {
                registry,
                observations,
            },
            listen_addr,
        }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/status", get(status_handler))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(self.state.clone())
    }

    /// Run the HTTP server until it fails
    pub async fn run(self) -> common::Result<()> {
        info!(listen_addr = %self.listen_addr, "Starting status HTTP server");

        let app = self.router();
        let listener = TcpListener::bind(&self.listen_addr).await.map_err(|e| {
            common::Error::http(format!("failed to bind {}: {}", self.listen_addr, e))
        })?;
        info!(listen_addr = %self.listen_addr, "Status server listening");

        axum::serve(listener, app)
            .await
            .map_err(common::Error::http)?;

        Ok(())
    }
}

/// Handler for /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &state.registry.registry) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}

/// Handler for /status: the latest observation of every endpoint
async fn status_handler(State(state): State<AppState>) -> Json<Vec<Observation>> {
    let mut observations: Vec<_> = state
        .observations
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    observations.sort_by(|a, b| a.key().cmp(&b.key()));
    Json(observations)
}
