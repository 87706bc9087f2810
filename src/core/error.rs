//! Error types and handling for the proxy server.
//!
//! Every local rejection (authentication, model resolution, whitelist) is an
//! [`AppError`] variant that terminates the pipeline with a minimal plain-text
//! response. Backend error responses are never wrapped here; they are streamed
//! back to the caller unchanged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::core::database::StoreError;
use crate::core::logging::get_request_id;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing, invalid or disabled credential
    #[error("Unauthorized")]
    Unauthorized,

    /// Client provided a body that could not be read or parsed
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Request body has no usable `model` field
    #[error("Missing model")]
    MissingModel,

    /// Model is not in the deployment mapping (strict mode)
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    /// Authenticated user is not allowed to use the requested model tier
    #[error("Forbidden: {user} may not use {model}")]
    ForbiddenCapability { user: String, model: String },

    /// Passthrough path outside the whitelist, or unknown route
    #[error("Not found: {0}")]
    NotFound(String),

    /// Method not permitted on a passthrough path
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Transport-level failure talking to the backend
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Backend did not send response headers in time
    #[error("Upstream did not respond within {0} seconds")]
    UpstreamTimeout(u64),

    /// User store failure
    #[error("User store error: {0}")]
    Store(#[from] StoreError),

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status the error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) | AppError::MissingModel | AppError::UnsupportedModel(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::ForbiddenCapability { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Upstream(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body returned to the caller. Never includes endpoint, key or deployment details.
    fn public_message(&self) -> &str {
        match self {
            AppError::Unauthorized => "Unauthorized",
            AppError::BadRequest(msg) => msg,
            AppError::MissingModel => "Missing model",
            AppError::UnsupportedModel(_) => "Unsupported model",
            AppError::ForbiddenCapability { .. } => "Forbidden",
            AppError::NotFound(_) => "Not Found",
            AppError::MethodNotAllowed(_) => "Method Not Allowed",
            AppError::Upstream(e) if e.is_timeout() => "Gateway Timeout",
            AppError::Upstream(_) => "Bad Gateway",
            AppError::UpstreamTimeout(_) => "Gateway Timeout",
            AppError::Store(_) | AppError::Internal(_) => "Internal Server Error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(
                request_id = %get_request_id(),
                error = %self,
                status = status.as_u16(),
                "Request failed"
            );
        } else {
            tracing::info!(
                request_id = %get_request_id(),
                error = %self,
                status = status.as_u16(),
                "Request rejected"
            );
        }
        (status, self.public_message().to_string()).into_response()
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
