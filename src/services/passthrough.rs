//! Whitelist for backend-native paths proxied under `/openai/*`.
//!
//! The backend exposes far more than this proxy means to offer, so
//! everything outside the listed resource families is denied.

use axum::http::Method;

use crate::core::{AppError, Result};

/// Resource families that may be proxied verbatim.
pub const ALLOWED_PATH_ROOTS: &[&str] = &["/openai/responses", "/openai/v1/responses"];

#[derive(Debug, Clone)]
pub struct PassthroughFilter {
    roots: Vec<String>,
    methods: Vec<Method>,
}

impl Default for PassthroughFilter {
    fn default() -> Self {
        Self {
            roots: ALLOWED_PATH_ROOTS.iter().map(|r| r.to_string()).collect(),
            methods: vec![Method::POST, Method::GET, Method::DELETE],
        }
    }
}

impl PassthroughFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `path` equals a root or is a sub-path (`root/...`) of one.
    ///
    /// Paths with dot segments are denied: URL normalization would otherwise
    /// turn `/openai/responses/../files` into a path outside the whitelist.
    pub fn is_allowed(&self, path: &str) -> bool {
        if path.split('/').any(is_dot_segment) {
            return false;
        }
        self.roots.iter().any(|root| {
            path == root
                || path
                    .strip_prefix(root.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Path first, then method: an unknown path is 404 whatever the method.
    pub fn check(&self, method: &Method, path: &str) -> Result<()> {
        if !self.is_allowed(path) {
            return Err(AppError::NotFound(path.to_string()));
        }
        if !self.methods.contains(method) {
            return Err(AppError::MethodNotAllowed(method.to_string()));
        }
        Ok(())
    }
}

/// `.` or `..`, including percent-encoded spellings.
fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}
