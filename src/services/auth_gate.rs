//! Bearer credential authentication against the user store.
//!
//! Authentication and usage accounting are separate calls: the dispatcher
//! records usage only once a request has passed every local check and is
//! about to be forwarded, so rejected requests are never counted.

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::core::database::{hash_key, UserStore};
use crate::core::logging::mask_secret;
use crate::core::metrics::get_metrics;
use crate::core::{AppError, Result};

/// The authenticated caller as seen by the rest of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub username: String,
    /// Allowed to use restricted model tiers
    pub can_use_gpt4: bool,
}

/// Extract the credential from an `Authorization` header value.
///
/// The `Bearer ` prefix is case-sensitive and stripped once when present.
pub fn extract_credential(authorization: &str) -> &str {
    authorization
        .strip_prefix("Bearer ")
        .unwrap_or(authorization)
}

#[derive(Clone)]
pub struct AuthGate {
    store: Arc<dyn UserStore>,
}

impl AuthGate {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Authenticate using the request's `Authorization` header.
    pub async fn authenticate_headers(&self, headers: &HeaderMap) -> Result<UserIdentity> {
        let authorization = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        self.authenticate(authorization).await
    }

    /// Validate a raw `Authorization` header value.
    ///
    /// The store record only counts if it is enabled and its stored digest
    /// matches the presented credential, so a store that hands back a blank
    /// record on a miss can never authenticate anyone.
    pub async fn authenticate(&self, authorization: &str) -> Result<UserIdentity> {
        let credential = extract_credential(authorization);
        if credential.is_empty() {
            tracing::warn!("Rejected request without credential");
            return Err(AppError::Unauthorized);
        }

        let user = self.store.find_by_credential(credential).await?;
        match user {
            Some(user) if user.enabled && user.token_hash == hash_key(credential) => {
                tracing::debug!(username = %user.username, "Authentication successful");
                Ok(UserIdentity {
                    username: user.username,
                    can_use_gpt4: user.can_use_gpt4,
                })
            }
            Some(user) if !user.enabled => {
                tracing::warn!(username = %user.username, "Rejected disabled user");
                Err(AppError::Unauthorized)
            }
            _ => {
                tracing::warn!(credential = %mask_secret(credential), "Rejected unknown credential");
                Err(AppError::Unauthorized)
            }
        }
    }

    /// Count one forwarded call for `identity`.
    ///
    /// A failed update is logged and does not block the request.
    pub async fn record_usage(&self, identity: &UserIdentity) {
        let metrics = get_metrics();
        match self.store.increment_usage(&identity.username).await {
            Ok(()) => metrics.usage_increments.with_label_values(&["ok"]).inc(),
            Err(e) => {
                metrics.usage_increments.with_label_values(&["error"]).inc();
                tracing::warn!(
                    username = %identity.username,
                    error = %e,
                    "Failed to record usage"
                );
            }
        }
    }
}
