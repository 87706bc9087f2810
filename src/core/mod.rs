//! Core functionality for the proxy server.
//!
//! This module contains fundamental components used throughout the application:
//! - Configuration management
//! - User store
//! - Error handling
//! - Logging and metrics
//! - HTTP middleware

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;

// Re-export commonly used types
pub use config::{AppConfig, AzureConfig, ServerConfig, UnmappedModelPolicy, UserConfig};
pub use database::{connect_store, MemoryUserStore, SqliteUserStore, StoreError, User, UserStore};
pub use error::{AppError, Result};
pub use metrics::{get_metrics, init_metrics, Metrics};
pub use middleware::MetricsMiddleware;
