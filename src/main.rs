//! Azure LLM Proxy - main entry point
//!
//! Loads the YAML configuration, syncs configured users into the user store
//! and serves the proxy router until interrupted.

use anyhow::{Context, Result};
use azure_llm_proxy::{
    api::{build_router, ProxyState},
    core::{
        config::AppConfig, database::connect_store, init_metrics, logging::init_tracing,
        logging::mask_secret,
    },
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    init_tracing();
    init_metrics();

    let config_path = std::env::var("CONFIG_PATH")
        .ok()
        .or_else(|| std::env::args().nth(1))
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = AppConfig::load(&config_path)?;
    tracing::info!(
        path = %config_path,
        endpoint = %config.azure.endpoint,
        api_version = %config.azure.api_version,
        api_key = %mask_secret(&config.azure.api_key),
        deployments = config.azure.deployments.len(),
        users = config.users.len(),
        "Configuration loaded"
    );

    let store = connect_store(&config.database.url)
        .await
        .context("Failed to open user store")?;
    store
        .sync_users(&config.users)
        .await
        .context("Failed to sync configured users")?;

    let http_client = create_http_client(&config)?;
    let state = Arc::new(ProxyState::new(&config, store, http_client)?);
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    tracing::info!("Starting Azure LLM Proxy on {}", addr);
    tracing::info!("OpenAI API: /v1/chat/completions, /v1/completions, /v1/embeddings, /v1/responses, /v1/models");
    tracing::info!("Passthrough: /openai/responses, /openai/v1/responses");
    tracing::info!("Health: /healthz, metrics: /metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Build the upstream HTTP client.
///
/// Only connecting is bounded here; the header timeout is applied per request
/// and streamed bodies may run as long as the backend keeps sending.
fn create_http_client(config: &AppConfig) -> Result<reqwest::Client> {
    if !config.verify_ssl {
        tracing::warn!("TLS certificate verification for the backend is disabled");
    }
    reqwest::Client::builder()
        .danger_accept_invalid_certs(!config.verify_ssl)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .http2_keep_alive_interval(Duration::from_secs(30))
        .http2_keep_alive_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
