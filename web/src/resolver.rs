//! Mapping HTTP requests onto bridge addresses.
//!
//! - [`resolve_operation`]: path and method to an operation name
//! - [`ServiceResolver`]: path prefix to the target service
//! - [`status_for_operation`]: operation name back to the success status

use crate::error::GatewayError;
use axum::http::{Method, StatusCode};

/// Derive the operation name for a request.
///
/// The `api` segment is dropped, and so is the service segment when more
/// segments follow it. Numeric segments collapse into a single `ById`.
///
/// ```
/// use courier_web::resolver::resolve_operation;
///
/// assert_eq!(resolve_operation("/api/recipes", "GET"), "getRecipes");
/// assert_eq!(resolve_operation("/api/recipes/123", "GET"), "getById");
/// assert_eq!(resolve_operation("/api/account/profile", "PUT"), "putProfile");
/// assert_eq!(resolve_operation("/api/recipes/7/comments/9", "DELETE"), "deleteByIdCommentsById");
/// assert_eq!(resolve_operation("/", "GET"), "default");
/// ```
#[must_use]
pub fn resolve_operation(path: &str, method: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return "default".to_string();
    }

    let method = method.to_lowercase();
    let segments = match segments.as_slice() {
        ["api", _, rest @ ..] if !rest.is_empty() => rest,
        ["api", rest @ ..] if !rest.is_empty() => rest,
        all => all,
    };

    let mut operation = method;
    for segment in segments {
        if is_id(segment) {
            if !operation.ends_with("ById") {
                operation.push_str("ById");
            }
        } else {
            operation.push_str(&capitalize(segment));
        }
    }
    operation
}

fn is_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn capitalize(segment: &str) -> String {
    let mut chars = segment.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Path-prefix table selecting the service that handles a request.
///
/// Prefixes are checked in insertion order; the first match wins.
#[derive(Debug, Clone)]
pub struct ServiceResolver {
    routes: Vec<(String, String)>,
}

impl ServiceResolver {
    /// A resolver with no routes.
    #[must_use]
    pub const fn empty() -> Self {
        Self { routes: Vec::new() }
    }

    /// Route paths starting with `prefix` to `service`.
    #[must_use]
    pub fn with_route(mut self, prefix: impl Into<String>, service: impl Into<String>) -> Self {
        self.routes.push((prefix.into(), service.into()));
        self
    }

    /// Service handling `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UnsupportedPath`] when no prefix matches.
    pub fn resolve_target_service(&self, path: &str) -> Result<&str, GatewayError> {
        self.routes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, service)| service.as_str())
            .ok_or_else(|| GatewayError::UnsupportedPath(path.to_string()))
    }
}

impl Default for ServiceResolver {
    /// `/api/auth` → `auth`, `/api/recipes` → `recipe`, `/api/account` → `account`.
    fn default() -> Self {
        Self::empty()
            .with_route("/api/auth", "auth")
            .with_route("/api/recipes", "recipe")
            .with_route("/api/account", "account")
    }
}

/// HTTP method an operation name was derived from.
#[must_use]
pub fn method_for_operation(operation: &str) -> Option<Method> {
    [
        ("get", Method::GET),
        ("post", Method::POST),
        ("put", Method::PUT),
        ("delete", Method::DELETE),
        ("patch", Method::PATCH),
    ]
    .into_iter()
    .find(|(prefix, _)| operation.starts_with(prefix))
    .map(|(_, method)| method)
}

/// Success status for a method: POST → 201, DELETE → 204, anything else → 200.
#[must_use]
pub fn status_for_method(method: Option<&Method>) -> StatusCode {
    match method {
        Some(&Method::POST) => StatusCode::CREATED,
        Some(&Method::DELETE) => StatusCode::NO_CONTENT,
        _ => StatusCode::OK,
    }
}

/// Success status for a reply to `operation`.
#[must_use]
pub fn status_for_operation(operation: &str) -> StatusCode {
    status_for_method(method_for_operation(operation).as_ref())
}
