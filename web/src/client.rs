//! Forwarding HTTP requests to services over the bridge.

use crate::error::GatewayError;
use crate::resolver::{ServiceResolver, resolve_operation, status_for_operation};
use crate::response::ApiResponse;
use axum::{
    Json,
    body::Bytes,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use courier_core::enriched::EnrichedRequest;
use courier_core::envelope::{AuthenticationContext, ServiceMessage};
use courier_core::error::BridgeError;
use courier_runtime::ServiceMessageClient;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// An HTTP request as the gateway received it.
#[derive(Debug, Clone, Default)]
pub struct GatewayRequest {
    /// Request method
    pub method: Method,
    /// Request path without the query string
    pub path: String,
    /// Request headers
    pub headers: HeaderMap,
    /// Decoded query parameters
    pub query_params: HashMap<String, String>,
    /// Raw body
    pub body: Bytes,
    /// Authenticated caller, if any
    pub authentication: Option<AuthenticationContext>,
}

/// Gateway reply: status, headers copied from the service, and the body.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// Response status
    pub status: StatusCode,
    /// Headers set by the handling service
    pub headers: HeaderMap,
    /// Response body
    pub body: ApiResponse<Value>,
}

impl GatewayResponse {
    /// Build the HTTP response for a reply to `operation`.
    ///
    /// Error replies use the reply's status code (400 if absent or invalid)
    /// and drop its headers. Successful replies use the status derived from
    /// the operation's method prefix.
    #[must_use]
    pub fn from_reply(operation: &str, reply: ServiceMessage) -> Self {
        if let Some(error) = reply.error() {
            let status = reply
                .status_code()
                .and_then(|code| {
                    StatusCode::from_u16(code)
                        .inspect_err(|_| tracing::warn!(status_code = code, "Invalid status code in reply"))
                        .ok()
                })
                .unwrap_or(StatusCode::BAD_REQUEST);

            return Self {
                status,
                headers: HeaderMap::new(),
                body: ApiResponse::error(
                    status.as_u16(),
                    Value::String(error.to_string()),
                    reason(status),
                ),
            };
        }

        let status = status_for_operation(operation);
        let headers = reply.headers().map(copy_headers).unwrap_or_default();
        Self {
            status,
            headers,
            body: ApiResponse::success(status.as_u16(), reply.into_payload(), reason(status)),
        }
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        metrics::counter!("courier_gateway_responses_total", "status" => self.status.as_str().to_owned())
            .increment(1);
        (self.status, self.headers, Json(self.body)).into_response()
    }
}

/// Turns HTTP requests into bridge requests and replies into HTTP responses.
///
/// # Example
///
/// ```rust,no_run
/// use courier_runtime::ServiceMessageClient;
/// use courier_web::{ApiMessageClient, GatewayRequest};
/// use axum::http::Method;
///
/// # async fn example(bridge: ServiceMessageClient) -> Result<(), courier_web::GatewayError> {
/// let gateway = ApiMessageClient::new(bridge);
/// let response = gateway
///     .forward(GatewayRequest {
///         method: Method::GET,
///         path: "/api/account/42".into(),
///         ..Default::default()
///     })
///     .await?;
/// assert_eq!(response.status, 200);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ApiMessageClient {
    bridge: ServiceMessageClient,
    services: ServiceResolver,
}

impl ApiMessageClient {
    /// Create a gateway client with the default service routes.
    #[must_use]
    pub fn new(bridge: ServiceMessageClient) -> Self {
        Self {
            bridge,
            services: ServiceResolver::default(),
        }
    }

    /// Replace the service routing table.
    #[must_use]
    pub fn with_services(mut self, services: ServiceResolver) -> Self {
        self.services = services;
        self
    }

    /// The underlying bridge client.
    #[must_use]
    pub const fn bridge(&self) -> &ServiceMessageClient {
        &self.bridge
    }

    /// Forward a request to the service routed for its path.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::UnsupportedPath`] if no service is routed for the path
    /// - [`GatewayError::Bridge`] if the request could not be published or
    ///   no reply arrived in time
    pub async fn forward(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let target = self.services.resolve_target_service(&request.path)?;
        let operation = resolve_operation(&request.path, request.method.as_str());

        let enriched = EnrichedRequest {
            body: parse_body(&request.body),
            path: request.path,
            method: request.method.as_str().to_string(),
            headers: flatten_headers(&request.headers),
            query_params: request.query_params,
        };
        let payload = serde_json::to_value(&enriched).map_err(|e| BridgeError::Codec(e.to_string()))?;

        tracing::info!(
            service = target,
            operation = %operation,
            authenticated = request.authentication.is_some(),
            principal = request.authentication.as_ref().map_or("anonymous", |auth| auth.principal.as_str()),
            "Forwarding request"
        );

        let reply = self
            .bridge
            .request(target, &operation, payload, request.authentication)
            .await?;

        Ok(GatewayResponse::from_reply(&operation, reply))
    }
}

/// Empty body → `{}`; JSON → parsed; anything else → the raw text.
fn parse_body(body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Request body is not JSON, forwarding as text");
        Value::String(String::from_utf8_lossy(body).into_owned())
    })
}

fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn copy_headers(headers: &HashMap<String, String>) -> HeaderMap {
    let mut copied = HeaderMap::new();
    for (name, value) in headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            (Ok(name), Ok(value)) => {
                copied.append(name, value);
            }
            _ => tracing::debug!(header = %name, "Skipping invalid reply header"),
        }
    }
    copied
}

fn reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_testing::fixtures;
    use serde_json::json;

    #[test]
    fn body_parsing() {
        assert_eq!(parse_body(&Bytes::new()), json!({}));
        assert_eq!(parse_body(&Bytes::from_static(br#"{"name":"soup"}"#)), json!({ "name": "soup" }));
        assert_eq!(parse_body(&Bytes::from_static(b"[1,2]")), json!([1, 2]));
        assert_eq!(parse_body(&Bytes::from_static(b"name=soup")), json!("name=soup"));
    }

    #[test]
    fn success_reply_uses_method_status_and_headers() {
        let request = fixtures::request("gateway", "postRecipes", json!({}));
        let reply = ServiceMessage::reply(&request, "recipe")
            .payload(json!({ "id": 7 }))
            .header("Location", "/api/recipes/7")
            .build();

        let response = GatewayResponse::from_reply("postRecipes", reply);

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.headers.get("location").map(HeaderValue::as_bytes), Some(&b"/api/recipes/7"[..]));
        assert_eq!(response.body, ApiResponse::success(201, Some(json!({ "id": 7 })), "Created"));
    }

    #[test]
    fn error_reply_uses_reply_status() {
        let request = fixtures::request("gateway", "getById", json!({}));
        let reply = fixtures::error_reply(&request, "recipe", "recipe not found", 404);

        let response = GatewayResponse::from_reply("getById", reply);

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.body.error, Some(json!("recipe not found")));
        assert_eq!(response.body.data, None);
        assert_eq!(response.body.message, "Not Found");
    }

    #[test]
    fn error_reply_without_status_is_bad_request() {
        let request = fixtures::request("gateway", "putById", json!({}));
        let reply = ServiceMessage::reply(&request, "recipe").error("title is required", None).build();

        let response = GatewayResponse::from_reply("putById", reply);

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body.status, 400);
    }

    #[test]
    fn invalid_reply_header_is_skipped() {
        let headers = HashMap::from([
            ("x-total-count".to_string(), "3".to_string()),
            ("bad header".to_string(), "x".to_string()),
        ]);
        let copied = copy_headers(&headers);
        assert_eq!(copied.len(), 1);
        assert!(copied.contains_key("x-total-count"));
    }
}
