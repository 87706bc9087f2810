//! Shared helpers for router-level tests.

#![allow(dead_code)]

use axum::{body::Body, http::Request, response::Response, Router};
use azure_llm_proxy::{
    api::{build_router, ProxyState},
    core::{config::AppConfig, database::MemoryUserStore, init_metrics, UserStore},
};
use std::sync::Arc;

pub const BACKEND_KEY: &str = "backend-key";
pub const API_VERSION: &str = "2024-10-21";
pub const ALICE_TOKEN: &str = "sk-alice-0123456789";
pub const BOB_TOKEN: &str = "sk-bob-0123456789";
pub const CAROL_TOKEN: &str = "sk-carol-0123456789";

/// Config pointing at `endpoint` with three users:
/// alice (restricted tiers allowed), bob (not allowed), carol (disabled).
pub fn config_yaml(endpoint: &str, unmapped_models: &str, header_timeout_secs: u64) -> String {
    format!(
        r#"
database:
  url: memory
header_timeout_secs: {header_timeout_secs}
azure:
  endpoint: "{endpoint}"
  api_version: "{API_VERSION}"
  api_key: "{BACKEND_KEY}"
  unmapped_models: {unmapped_models}
  deployments:
    gpt-4o: dep-123
    gpt-35-turbo: dep-35
    text-embedding-3-small: emb-dep
  web_search_models:
    - gpt-4o-search
users:
  - username: alice
    password: "{ALICE_TOKEN}"
  - username: bob
    password: "{BOB_TOKEN}"
    can_use_gpt4: false
  - username: carol
    password: "{CAROL_TOKEN}"
    enabled: false
"#
    )
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryUserStore>,
}

impl TestApp {
    pub async fn new(endpoint: &str) -> Self {
        Self::with_options(endpoint, "strict", 30).await
    }

    pub async fn with_options(endpoint: &str, unmapped_models: &str, header_timeout_secs: u64) -> Self {
        init_metrics();
        let mut config =
            AppConfig::from_yaml(&config_yaml(endpoint, unmapped_models, header_timeout_secs))
                .expect("test config parses");
        // Web search injection is exercised on a dedicated alias.
        config
            .azure
            .deployments
            .insert("gpt-4o-search".to_string(), "dep-search".to_string());
        config.validate().expect("test config is valid");

        let store = Arc::new(MemoryUserStore::new());
        store.sync_users(&config.users).await.expect("users sync");

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(2))
            .build()
            .expect("Failed to build HTTP client");
        let state = ProxyState::new(&config, store.clone(), http_client).expect("state builds");

        Self {
            router: build_router(Arc::new(state)),
            store,
        }
    }

    pub async fn usage(&self, username: &str) -> i64 {
        self.store
            .find_by_name(username)
            .await
            .unwrap()
            .map(|u| u.usage_count)
            .unwrap_or_default()
    }
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn empty_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_bytes(response: Response) -> bytes::Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

pub async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}
