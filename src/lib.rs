//! Azure LLM Proxy - an authenticating reverse proxy for Azure OpenAI
//!
//! Clients speak the OpenAI API with per-user bearer tokens; the proxy
//! authenticates them against a user store, maps OpenAI model names to Azure
//! deployment ids and forwards the request with the Azure `api-key` header and
//! `api-version` query parameter. Responses, including SSE streams, are relayed
//! unchanged.
//!
//! # Architecture
//!
//! - [`core`]: config, user store, errors, logging, metrics, middleware
//! - [`services`]: the request pipeline stages (auth, model resolution,
//!   passthrough whitelist, outbound rewriting)
//! - [`api`]: router, handlers and upstream streaming
//!
//! # Configuration
//!
//! A YAML file (`CONFIG_PATH`, first CLI argument, or `config.yaml`) with
//! `server`, `database`, `azure` and `users` sections. `${VAR}` references are
//! expanded from the environment. `HOST`, `PORT`, `DB_URL`, `VERIFY_SSL` and
//! `AZURE_OPENAI_API_KEY` override file values.

pub mod api;
pub mod core;
pub mod services;

// Re-export commonly used types for convenience
pub use api::{build_router, ProxyState};
pub use core::{AppConfig, AppError, Result};
