//! Client model name -> backend deployment resolution.
//!
//! Pure decision logic: no I/O, no shared mutable state.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};

use crate::core::config::{AzureConfig, UnmappedModelPolicy};
use crate::core::{AppError, Result};
use crate::services::auth_gate::UserIdentity;

/// Tool type appended to `tools` for web-search-enabled models.
pub const WEB_SEARCH_TOOL_TYPE: &str = "web_search_preview";

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Name sent to the backend: a deployment id, or the client name in
    /// passthrough mode.
    pub deployment: String,
    /// Whether a web search tool must be injected into the body
    pub inject_web_search: bool,
}

#[derive(Debug, Clone)]
pub struct ModelResolver {
    deployments: HashMap<String, String>,
    web_search_models: HashSet<String>,
    unmapped_models: UnmappedModelPolicy,
    restricted_prefixes: Vec<String>,
}

impl ModelResolver {
    pub fn new(config: &AzureConfig) -> Self {
        Self {
            deployments: config.deployments.clone(),
            web_search_models: config.web_search_models.iter().cloned().collect(),
            unmapped_models: config.unmapped_models,
            restricted_prefixes: config.restricted_model_prefixes.clone(),
        }
    }

    /// Resolve `client_model` for `identity`.
    pub fn resolve(&self, client_model: &str, identity: &UserIdentity) -> Result<Resolution> {
        if client_model.is_empty() {
            return Err(AppError::MissingModel);
        }

        let deployment = match self.deployments.get(client_model) {
            Some(deployment) => deployment.clone(),
            None => match self.unmapped_models {
                UnmappedModelPolicy::Strict => {
                    return Err(AppError::UnsupportedModel(client_model.to_string()))
                }
                // The name ends up as a URL path segment.
                UnmappedModelPolicy::Passthrough if is_safe_path_segment(client_model) => {
                    client_model.to_string()
                }
                UnmappedModelPolicy::Passthrough => {
                    return Err(AppError::UnsupportedModel(client_model.to_string()))
                }
            },
        };

        if !identity.can_use_gpt4
            && (self.is_restricted(client_model) || self.is_restricted(&deployment))
        {
            return Err(AppError::ForbiddenCapability {
                user: identity.username.clone(),
                model: client_model.to_string(),
            });
        }

        Ok(Resolution {
            deployment,
            inject_web_search: self.web_search_models.contains(client_model),
        })
    }

    fn is_restricted(&self, model: &str) -> bool {
        self.restricted_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && model.starts_with(prefix.as_str()))
    }

    /// Substitute the `model` field of a passthrough body with its deployment
    /// id when the name is mapped. Returns true if the body changed.
    ///
    /// Unmapped names are left alone, but the capability gate still applies to
    /// whatever name ends up in the body.
    pub fn map_model_best_effort(&self, body: &mut Value, identity: &UserIdentity) -> Result<bool> {
        let Some(object) = body.as_object_mut() else {
            return Ok(false);
        };
        let client_model = match object.get("model").and_then(Value::as_str) {
            Some(model) if !model.is_empty() => model.to_string(),
            _ => return Ok(false),
        };
        let deployment = self.deployments.get(&client_model).cloned();

        if !identity.can_use_gpt4
            && (self.is_restricted(&client_model)
                || deployment.as_deref().is_some_and(|d| self.is_restricted(d)))
        {
            return Err(AppError::ForbiddenCapability {
                user: identity.username.clone(),
                model: client_model,
            });
        }

        match deployment {
            Some(deployment) => {
                object.insert("model".to_string(), Value::String(deployment));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn is_safe_path_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains(&['/', '\\', '?', '#', '%'][..]) && s != ".." && s != "."
}

/// Read the `model` field of a JSON body. Absent or non-string is empty.
pub fn extract_model(body: &Value) -> &str {
    body.get("model").and_then(Value::as_str).unwrap_or("")
}

/// Append one web search tool entry to `tools`, creating the array if it is
/// missing or not an array.
pub fn inject_web_search_tool(body: &mut Value) {
    let Some(object) = body.as_object_mut() else {
        return;
    };
    let tool = json!({ "type": WEB_SEARCH_TOOL_TYPE });
    match object.get_mut("tools") {
        Some(Value::Array(tools)) => tools.push(tool),
        _ => {
            object.insert("tools".to_string(), Value::Array(vec![tool]));
        }
    }
}
