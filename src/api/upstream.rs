//! Upstream request execution and response streaming.
//!
//! Backend responses are never interpreted: status, headers (minus hop-by-hop)
//! and body chunks are relayed to the caller as they arrive.

use std::time::Duration;

use axum::{body::Body, http::HeaderMap, response::Response};

use crate::api::disconnect::DisconnectStream;
use crate::core::logging::{get_request_id, get_username};
use crate::core::metrics::get_metrics;
use crate::core::{AppError, Result};
use crate::services::rewriter::{is_hop_by_hop, OutboundRequest};

/// Send `outbound` and wait at most `header_timeout` for response headers.
///
/// Body streaming afterwards is not bounded.
pub async fn send(
    http_client: &reqwest::Client,
    outbound: OutboundRequest,
    header_timeout: Duration,
) -> Result<reqwest::Response> {
    let url = outbound.url.clone();
    let request = http_client
        .request(outbound.method, outbound.url)
        .headers(outbound.headers)
        .body(outbound.body);

    match tokio::time::timeout(header_timeout, request.send()).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => {
            let kind = classify_transport_error(&e);
            get_metrics()
                .upstream_errors
                .with_label_values(&[kind])
                .inc();
            tracing::error!(
                request_id = %get_request_id(),
                username = %get_username(),
                url = %redacted(&url),
                error = %e,
                kind = kind,
                "Upstream request failed"
            );
            Err(AppError::Upstream(e))
        }
        Err(_) => {
            get_metrics()
                .upstream_errors
                .with_label_values(&["timeout"])
                .inc();
            tracing::error!(
                request_id = %get_request_id(),
                username = %get_username(),
                url = %redacted(&url),
                timeout_secs = header_timeout.as_secs(),
                "Upstream did not send response headers in time"
            );
            Err(AppError::UpstreamTimeout(header_timeout.as_secs()))
        }
    }
}

fn classify_transport_error(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        "timeout"
    } else if error.is_connect() {
        "connect"
    } else {
        "other"
    }
}

/// URL without its query string, for logs.
pub fn redacted(url: &reqwest::Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

/// Relay a backend response to the caller, body streamed chunk by chunk.
///
/// Dropping the returned body (client gone) drops the backend stream.
pub fn stream_response(upstream: reqwest::Response, request_id: String) -> Response {
    let status = upstream.status();
    let headers = copy_response_headers(upstream.headers());

    if status.is_client_error() || status.is_server_error() {
        tracing::info!(status = status.as_u16(), "Relaying backend error response");
    } else {
        tracing::debug!(status = status.as_u16(), "Relaying backend response");
    }

    let stream = DisconnectStream::new(Box::pin(upstream.bytes_stream()), request_id);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn copy_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        // The relayed body is re-framed by our server.
        if is_hop_by_hop(name) || name == axum::http::header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_response_headers_drops_hop_by_hop() {
        let mut upstream = HeaderMap::new();
        upstream.insert("content-type", "text/event-stream".parse().unwrap());
        upstream.insert("transfer-encoding", "chunked".parse().unwrap());
        upstream.insert("connection", "keep-alive".parse().unwrap());
        upstream.insert("content-length", "42".parse().unwrap());
        upstream.insert("x-ms-region", "eastus".parse().unwrap());

        let headers = copy_response_headers(&upstream);
        assert_eq!(headers["content-type"], "text/event-stream");
        assert_eq!(headers["x-ms-region"], "eastus");
        assert!(headers.get("transfer-encoding").is_none());
        assert!(headers.get("connection").is_none());
        assert!(headers.get("content-length").is_none());
    }

    #[test]
    fn test_redacted_strips_query() {
        let url = reqwest::Url::parse(
            "https://example.openai.azure.com/openai/models?api-version=2024-10-21",
        )
        .unwrap();
        assert_eq!(redacted(&url), "https://example.openai.azure.com/openai/models");
    }
}
