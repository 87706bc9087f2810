//! HTTP layer: router assembly, proxy handlers and response streaming.

pub mod disconnect;
pub mod health;
pub mod proxy;
pub mod upstream;

use std::sync::Arc;

use axum::{
    http::Uri,
    middleware,
    routing::{any, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::core::middleware::{cors_middleware, request_id_middleware, MetricsMiddleware};
use crate::core::AppError;

pub use proxy::ProxyState;

/// Build the application router with all routes and middleware.
pub fn build_router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics_handler))
        .route("/v1/chat/completions", post(proxy::chat_completions))
        .route("/v1/completions", post(proxy::completions))
        .route("/v1/embeddings", post(proxy::embeddings))
        .route("/v1/responses", post(proxy::responses))
        .route("/v1/models", get(proxy::list_models))
        // Method restrictions for passthrough are enforced after the whitelist.
        .route("/openai/*path", any(proxy::openai_passthrough))
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::from_fn(MetricsMiddleware::track_metrics))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(cors_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(uri.path().to_string())
}
