//! Configuration management for the proxy server.
//!
//! This module handles loading and parsing configuration from YAML files,
//! with support for environment variable expansion.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port)
    #[serde(default)]
    pub server: ServerConfig,

    /// User store location
    #[serde(default)]
    pub database: DatabaseSection,

    /// Backend gateway settings
    pub azure: AzureConfig,

    /// Users provisioned into the user store at startup
    #[serde(default)]
    pub users: Vec<UserConfig>,

    /// Whether to verify SSL certificates for upstream requests
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,

    /// Upper bound on establishing the upstream TCP/TLS connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound on waiting for upstream response headers.
    /// The response body itself may stream for as long as the backend keeps it open.
    #[serde(default = "default_header_timeout")]
    pub header_timeout_secs: u64,
}

/// What to do with a model name that has no deployment mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmappedModelPolicy {
    /// Reject with 400 Unsupported model
    #[default]
    Strict,
    /// Forward the client-supplied name unchanged
    Passthrough,
}

/// Backend gateway configuration. Immutable for the lifetime of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    /// Base URL of the backend, e.g. `https://my-resource.openai.azure.com`
    pub endpoint: String,

    /// Value for the `api-version` query parameter
    #[serde(alias = "api-version")]
    pub api_version: String,

    /// Key sent in the `api-key` header
    #[serde(alias = "api-key")]
    pub api_key: String,

    /// Client model name -> deployment id
    #[serde(default)]
    pub deployments: HashMap<String, String>,

    /// Client model names that get a web search tool injected
    #[serde(default)]
    pub web_search_models: Vec<String>,

    /// Override for the responses endpoint path
    #[serde(default)]
    pub responses_path: Option<String>,

    #[serde(default)]
    pub unmapped_models: UnmappedModelPolicy,

    /// Model name prefixes that require the `can_use_gpt4` capability
    #[serde(default = "default_restricted_prefixes")]
    pub restricted_model_prefixes: Vec<String>,
}

/// A user provisioned from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,

    /// Bearer token the user authenticates with
    pub password: String,

    #[serde(default = "default_true")]
    pub can_use_gpt4: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Server-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Where user records live. `memory` keeps them in process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_url")]
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: default_db_url(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_db_url() -> String {
    "sqlite://chatazure.db".to_string()
}

fn default_verify_ssl() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_header_timeout() -> u64 {
    300
}

fn default_restricted_prefixes() -> Vec<String> {
    vec!["gpt-4".to_string()]
}

/// Default path of the responses endpoint when no override is configured.
pub const DEFAULT_RESPONSES_PATH: &str = "/openai/v1/responses";

impl AzureConfig {
    /// Path the `/v1/responses` route forwards to.
    pub fn responses_path(&self) -> &str {
        match self.responses_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => path,
            _ => DEFAULT_RESPONSES_PATH,
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use azure_llm_proxy::core::config::AppConfig;
    ///
    /// let config = AppConfig::load("config.yaml").expect("Failed to load config");
    /// ```
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML text after environment variable expansion.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        Ok(serde_yaml::from_str(&expanded)?)
    }

    /// Environment variables take precedence over file values.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }

        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(db_url) = std::env::var("DB_URL") {
            self.database.url = db_url;
        }

        if let Ok(verify_ssl_str) = std::env::var("VERIFY_SSL") {
            self.verify_ssl = str_to_bool(&verify_ssl_str);
        }

        if let Ok(api_key) = std::env::var("AZURE_OPENAI_API_KEY") {
            if !api_key.is_empty() {
                self.azure.api_key = api_key;
            }
        }
    }

    /// Reject configurations the proxy cannot serve correctly.
    pub fn validate(&self) -> Result<()> {
        let endpoint = reqwest::Url::parse(&self.azure.endpoint)
            .with_context(|| format!("Invalid azure.endpoint: {}", self.azure.endpoint))?;
        if !matches!(endpoint.scheme(), "http" | "https") || endpoint.host_str().is_none() {
            bail!("azure.endpoint must be an absolute http(s) URL");
        }
        if self.azure.api_version.trim().is_empty() {
            bail!("azure.api_version must not be empty");
        }
        if self.azure.api_key.trim().is_empty() {
            bail!("azure.api_key must not be empty");
        }
        if let Some((model, _)) = self
            .azure
            .deployments
            .iter()
            .find(|(_, deployment)| deployment.trim().is_empty())
        {
            bail!("azure.deployments.{} has an empty deployment id", model);
        }

        let mut seen = HashSet::new();
        for user in &self.users {
            if user.username.trim().is_empty() || user.password.is_empty() {
                bail!("users entries need a username and a password");
            }
            if !seen.insert(user.username.as_str()) {
                bail!("duplicate user: {}", user.username);
            }
        }
        Ok(())
    }
}

/// Expand environment variables in configuration content.
///
/// Supports patterns: ${VAR}, ${VAR:-default}, ${VAR:default}
fn expand_env_vars(content: &str) -> String {
    let re = env_var_pattern();

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
    })
    .to_string()
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([^}:]+)(?::-?([^}]*))?\}").expect("env var pattern is valid")
    })
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive)
fn str_to_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
