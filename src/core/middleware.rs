//! HTTP middleware for CORS preflight handling, request ids and metrics.

use crate::core::logging::generate_request_id;
use crate::core::metrics::get_metrics;
use crate::with_request_context;
use axum::{
    body::Body,
    extract::{MatchedPath, Request},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// Header carrying the request id back to the caller.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Answer CORS preflight requests and mark every other response as
/// readable from any origin.
///
/// OPTIONS never reaches authentication: the browser sends preflights without
/// credentials.
pub async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let wildcard = HeaderValue::from_static("*");
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::OK;
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, wildcard.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, wildcard.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, wildcard);
        return response;
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .entry(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .or_insert(HeaderValue::from_static("*"));
    response
}

/// Assign a request id, scope it for logging and echo it in `x-request-id`.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = generate_request_id();
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = with_request_context!(request_id.clone(), next.run(request));
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Request id stored in request extensions.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

pub struct MetricsMiddleware;

impl MetricsMiddleware {
    /// Track metrics for incoming requests.
    ///
    /// Routes are labelled by their matched pattern, not the raw path, so
    /// passthrough sub-paths do not explode label cardinality.
    pub async fn track_metrics(request: Request, next: Next) -> Response {
        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "unmatched".to_string());
        let method = request.method().to_string();

        if route == "/metrics" {
            return next.run(request).await;
        }

        let metrics = get_metrics();
        metrics.active_requests.with_label_values(&[&route]).inc();
        let start = Instant::now();

        let response = next.run(request).await;

        let duration = start.elapsed().as_secs_f64();
        let status_code = response.status().as_u16().to_string();
        metrics
            .request_count
            .with_label_values(&[&method, &route, &status_code])
            .inc();
        metrics
            .request_duration
            .with_label_values(&[&method, &route])
            .observe(duration);
        metrics.active_requests.with_label_values(&[&route]).dec();

        tracing::debug!(
            method = %method,
            route = %route,
            status = %status_code,
            duration_secs = duration,
            "Request completed"
        );

        response
    }
}
