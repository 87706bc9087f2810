//! Proxy dispatcher: per-route request pipelines.
//!
//! Every handler runs the same shape of pipeline:
//!
//! 1. buffer the inbound request once into an [`InboundRequest`]
//! 2. passthrough routes only: whitelist and method check
//! 3. authenticate the caller
//! 4. route decision (model resolution, body mutation)
//! 5. count usage
//! 6. rewrite and forward, streaming the backend response back
//!
//! Steps 1-4 produce a [`Prepared`] request or an [`AppError`]; nothing touches
//! the network or the usage counter before that decision is made.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::Method,
    response::Response,
    Extension,
};
use bytes::Bytes;
use serde_json::Value;

use crate::api::upstream;
use crate::core::config::AppConfig;
use crate::core::database::UserStore;
use crate::core::logging::{get_request_id, get_username};
use crate::core::middleware::RequestId;
use crate::core::{AppError, Result};
use crate::services::auth_gate::{AuthGate, UserIdentity};
use crate::services::model_resolver::{extract_model, inject_web_search_tool, ModelResolver};
use crate::services::passthrough::PassthroughFilter;
use crate::services::rewriter::{InboundRequest, RequestRewriter, RouteTarget};
use crate::with_request_context;

/// Largest request body the proxy buffers.
pub const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Shared state for all proxy handlers.
pub struct ProxyState {
    pub auth: AuthGate,
    pub resolver: ModelResolver,
    pub rewriter: RequestRewriter,
    pub passthrough: PassthroughFilter,
    pub http_client: reqwest::Client,
    pub header_timeout: Duration,
    pub responses_path: String,
    pub models_path: String,
}

/// Backend path listing models.
pub const MODELS_PATH: &str = "/openai/models";

impl ProxyState {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn UserStore>,
        http_client: reqwest::Client,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            auth: AuthGate::new(store),
            resolver: ModelResolver::new(&config.azure),
            rewriter: RequestRewriter::new(&config.azure)?,
            passthrough: PassthroughFilter::new(),
            http_client,
            header_timeout: Duration::from_secs(config.header_timeout_secs),
            responses_path: config.azure.responses_path().to_string(),
            models_path: MODELS_PATH.to_string(),
        })
    }
}

/// A request that passed every local check and is ready to forward.
#[derive(Debug)]
pub struct Prepared {
    pub inbound: InboundRequest,
    pub identity: UserIdentity,
    pub target: RouteTarget,
    pub body: Bytes,
}

/// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<Arc<ProxyState>>,
    request_id: Option<Extension<RequestId>>,
    request: Request,
) -> Result<Response> {
    let prepared = prepare_deployment(&state, request, "chat/completions").await?;
    dispatch(&state, prepared, request_id).await
}

/// POST /v1/completions
pub async fn completions(
    State(state): State<Arc<ProxyState>>,
    request_id: Option<Extension<RequestId>>,
    request: Request,
) -> Result<Response> {
    let prepared = prepare_deployment(&state, request, "completions").await?;
    dispatch(&state, prepared, request_id).await
}

/// POST /v1/embeddings
pub async fn embeddings(
    State(state): State<Arc<ProxyState>>,
    request_id: Option<Extension<RequestId>>,
    request: Request,
) -> Result<Response> {
    let prepared = prepare_deployment(&state, request, "embeddings").await?;
    dispatch(&state, prepared, request_id).await
}

/// POST /v1/responses
pub async fn responses(
    State(state): State<Arc<ProxyState>>,
    request_id: Option<Extension<RequestId>>,
    request: Request,
) -> Result<Response> {
    let prepared = prepare_responses(&state, request).await?;
    dispatch(&state, prepared, request_id).await
}

/// GET /v1/models
pub async fn list_models(
    State(state): State<Arc<ProxyState>>,
    request_id: Option<Extension<RequestId>>,
    request: Request,
) -> Result<Response> {
    let inbound = buffer_request(request).await?;
    let identity = state.auth.authenticate_headers(&inbound.headers).await?;
    let body = inbound.body.clone();
    let prepared = Prepared {
        inbound,
        identity,
        target: RouteTarget::Fixed(state.models_path.clone()),
        body,
    };
    dispatch(&state, prepared, request_id).await
}

/// POST/GET/DELETE /openai/*
pub async fn openai_passthrough(
    State(state): State<Arc<ProxyState>>,
    request_id: Option<Extension<RequestId>>,
    request: Request,
) -> Result<Response> {
    let prepared = prepare_passthrough(&state, request).await?;
    dispatch(&state, prepared, request_id).await
}

async fn buffer_request(request: Request) -> Result<InboundRequest> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES)
        .await
        .map_err(|e| {
            tracing::debug!(error = %e, "Failed to read request body");
            AppError::BadRequest("Failed to read request body".to_string())
        })?;
    Ok(InboundRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
    })
}

fn encode(body: &Value) -> Result<Bytes> {
    serde_json::to_vec(body)
        .map(Bytes::from)
        .map_err(|e| AppError::Internal(format!("Failed to encode request body: {}", e)))
}

async fn prepare_deployment(
    state: &ProxyState,
    request: Request,
    operation: &'static str,
) -> Result<Prepared> {
    let inbound = buffer_request(request).await?;
    let identity = state.auth.authenticate_headers(&inbound.headers).await?;

    let mut json = inbound.json_body()?;
    let resolution = state.resolver.resolve(extract_model(&json), &identity)?;

    let body = if resolution.inject_web_search {
        inject_web_search_tool(&mut json);
        tracing::debug!(deployment = %resolution.deployment, "Injected web search tool");
        encode(&json)?
    } else {
        inbound.body.clone()
    };

    Ok(Prepared {
        inbound,
        identity,
        target: RouteTarget::Deployment {
            deployment: resolution.deployment,
            operation,
        },
        body,
    })
}

async fn prepare_responses(state: &ProxyState, request: Request) -> Result<Prepared> {
    let inbound = buffer_request(request).await?;
    let identity = state.auth.authenticate_headers(&inbound.headers).await?;

    let mut json = inbound.json_body()?;
    let client_model = extract_model(&json).to_string();
    let resolution = state.resolver.resolve(&client_model, &identity)?;

    if let Some(object) = json.as_object_mut() {
        object.insert(
            "model".to_string(),
            Value::String(resolution.deployment.clone()),
        );
    }
    if resolution.inject_web_search {
        inject_web_search_tool(&mut json);
    }
    let body = encode(&json)?;

    Ok(Prepared {
        inbound,
        identity,
        target: RouteTarget::Fixed(state.responses_path.clone()),
        body,
    })
}

async fn prepare_passthrough(state: &ProxyState, request: Request) -> Result<Prepared> {
    state
        .passthrough
        .check(request.method(), request.uri().path())?;

    let inbound = buffer_request(request).await?;
    let identity = state.auth.authenticate_headers(&inbound.headers).await?;

    // Bodies that are not JSON objects go out untouched.
    let mut body = inbound.body.clone();
    if inbound.method == Method::POST && !inbound.body.is_empty() {
        if let Ok(mut json) = serde_json::from_slice::<Value>(&inbound.body) {
            if state.resolver.map_model_best_effort(&mut json, &identity)? {
                body = encode(&json)?;
            }
        }
    }

    Ok(Prepared {
        inbound,
        identity,
        target: RouteTarget::Native,
        body,
    })
}

/// Count usage, rewrite and forward a prepared request.
async fn dispatch(
    state: &ProxyState,
    prepared: Prepared,
    request_id: Option<Extension<RequestId>>,
) -> Result<Response> {
    let request_id = request_id
        .map(|Extension(RequestId(id))| id)
        .unwrap_or_else(get_request_id);
    let Prepared {
        inbound,
        identity,
        target,
        body,
    } = prepared;

    let username = identity.username.clone();
    with_request_context!(request_id.clone(), username, async move {
        state.auth.record_usage(&identity).await;

        let outbound = state.rewriter.rewrite(&inbound, &target, body);
        tracing::info!(
            request_id = %get_request_id(),
            username = %get_username(),
            method = %inbound.method,
            original = %inbound.uri,
            rewritten = %upstream::redacted(&outbound.url),
            "Forwarding request"
        );

        let response = upstream::send(&state.http_client, outbound, state.header_timeout).await?;
        Ok::<_, AppError>(upstream::stream_response(response, request_id))
    })
}
