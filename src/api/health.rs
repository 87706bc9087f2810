//! Liveness probes and the Prometheus scrape endpoint. No authentication.

use axum::{http::header, response::IntoResponse};

use crate::core::metrics::render_metrics;

/// GET /healthz
pub async fn healthz() -> &'static str {
    "Healthy"
}

/// GET /health, kept for older probes.
pub async fn health() -> &'static str {
    "ok"
}

/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_metrics(),
    )
}
