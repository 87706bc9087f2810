//! Inbound -> outbound request translation.
//!
//! The rewriter never touches the inbound request; it builds a separate
//! [`OutboundRequest`] so the original URL stays available for logging.

use anyhow::Context;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Uri};
use bytes::Bytes;
use reqwest::Url;
use serde_json::Value;

use crate::core::config::AzureConfig;
use crate::core::{AppError, Result};

/// Header carrying the backend API key.
pub const API_KEY_HEADER: &str = "api-key";

/// Query parameter carrying the backend API version.
pub const API_VERSION_PARAM: &str = "api-version";

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// A fully buffered client request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Decode the body as JSON.
    pub fn json_body(&self) -> Result<Value> {
        serde_json::from_slice(&self.body).map_err(|e| {
            tracing::debug!(error = %e, "Request body is not valid JSON");
            AppError::BadRequest("Invalid JSON".to_string())
        })
    }
}

/// Where an outbound request goes on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// `/openai/deployments/<deployment>/<operation>`
    Deployment {
        deployment: String,
        operation: &'static str,
    },
    /// A fixed backend path such as `/openai/models`
    Fixed(String),
    /// The inbound path, unchanged
    Native,
}

/// The request sent to the backend.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct RequestRewriter {
    endpoint: Url,
    api_key: HeaderValue,
    api_version: String,
}

impl RequestRewriter {
    pub fn new(config: &AzureConfig) -> anyhow::Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .with_context(|| format!("Invalid backend endpoint: {}", config.endpoint))?;
        let mut api_key = HeaderValue::from_str(&config.api_key)
            .context("Backend API key is not a valid header value")?;
        api_key.set_sensitive(true);

        Ok(Self {
            endpoint,
            api_key,
            api_version: config.api_version.clone(),
        })
    }

    /// Build the outbound request for `inbound` aimed at `target`, carrying `body`.
    ///
    /// `body` is either the inbound bytes or the re-serialized mutated body;
    /// the HTTP client derives `Content-Length` from it.
    pub fn rewrite(
        &self,
        inbound: &InboundRequest,
        target: &RouteTarget,
        body: Bytes,
    ) -> OutboundRequest {
        // Scheme and host come from the endpoint before the path is assembled.
        let mut url = self.endpoint.clone();
        url.set_fragment(None);

        match target {
            RouteTarget::Deployment {
                deployment,
                operation,
            } => {
                if let Ok(mut segments) = url.path_segments_mut() {
                    segments
                        .clear()
                        .extend(["openai", "deployments", deployment.as_str()])
                        .extend(operation.split('/'));
                }
            }
            RouteTarget::Fixed(path) => url.set_path(path),
            RouteTarget::Native => url.set_path(inbound.path()),
        }

        url.set_query(inbound.query());
        let preserved: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != API_VERSION_PARAM)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(preserved)
            .append_pair(API_VERSION_PARAM, &self.api_version);

        OutboundRequest {
            method: inbound.method.clone(),
            url,
            headers: self.rewrite_headers(&inbound.headers),
            body,
        }
    }

    fn rewrite_headers(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(inbound.len() + 1);
        for (name, value) in inbound {
            if name == header::AUTHORIZATION
                || name == header::HOST
                || name == header::CONTENT_LENGTH
                || name.as_str() == API_KEY_HEADER
                || is_hop_by_hop(name)
            {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        headers.insert(API_KEY_HEADER, self.api_key.clone());
        headers
    }
}
