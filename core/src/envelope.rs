//! Wire envelopes exchanged between services.
//!
//! A single [`ServiceMessage`] shape is used in both directions: the caller
//! publishes it as a request, and the handling service publishes one back as the
//! reply, echoing the [`CorrelationId`].
//!
//! # Wire Format
//!
//! Envelopes are JSON with camelCase field names so that every service in the
//! fleet can read them regardless of implementation language:
//!
//! ```json
//! {
//!   "correlationId": "6f1c8a5e-...",
//!   "senderService": "gateway",
//!   "replyTo": "gateway.listener.routing.key",
//!   "operation": "getAccountById",
//!   "timestamp": 1735689600000,
//!   "error": null,
//!   "payload": { "id": 123 },
//!   "statusCode": null,
//!   "headers": null,
//!   "authentication": null
//! }
//! ```
//!
//! # Example
//!
//! ```
//! use courier_core::envelope::{CorrelationId, ServiceMessage};
//! use serde_json::json;
//!
//! let request = ServiceMessage::builder(CorrelationId::new())
//!     .sender_service("gateway")
//!     .reply_to("gateway.listener.routing.key")
//!     .operation("getAccountById")
//!     .payload(json!({ "id": 123 }))
//!     .build();
//!
//! let reply = ServiceMessage::reply(&request, "account")
//!     .payload(json!({ "id": 123, "email": "a@b.com" }))
//!     .build();
//!
//! assert_eq!(reply.correlation_id(), request.correlation_id());
//! ```

use crate::error::{BridgeError, Result};
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Opaque token linking an outbound request to its eventual reply.
///
/// Generated from a random UUID for every request. Matching is exact string
/// equality; no normalization is applied to ids received off the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh, random correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// Unset fields may arrive as an explicit `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Authenticated principal travelling with a request.
///
/// The bridge never interprets this; it is attached by the caller and handed
/// to the remote handler untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationContext {
    /// Subject identifier of the authenticated user.
    pub principal: String,
    /// Granted authorities (roles, scopes).
    #[serde(default, deserialize_with = "null_as_default")]
    pub authorities: Vec<String>,
    /// Free-form details such as email or display name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub details: Map<String, Value>,
}

impl AuthenticationContext {
    /// Create a context for `principal` with no authorities or details.
    #[must_use]
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            authorities: Vec::new(),
            details: Map::new(),
        }
    }

    /// Add a granted authority.
    #[must_use]
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authorities.push(authority.into());
        self
    }

    /// Add a detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// Request or reply envelope.
///
/// Fields are private: an envelope is immutable once built. Use
/// [`ServiceMessage::builder`] for requests and [`ServiceMessage::reply`] for
/// replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMessage {
    correlation_id: CorrelationId,
    #[serde(default, deserialize_with = "null_as_default")]
    sender_service: String,
    #[serde(default, deserialize_with = "null_as_default")]
    reply_to: String,
    #[serde(default, deserialize_with = "null_as_default")]
    operation: String,
    #[serde(default, deserialize_with = "null_as_default")]
    timestamp: i64,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
    #[serde(default)]
    authentication: Option<AuthenticationContext>,
}

impl ServiceMessage {
    /// Start building an envelope for `correlation_id`.
    #[must_use]
    pub fn builder(correlation_id: CorrelationId) -> ServiceMessageBuilder {
        ServiceMessageBuilder {
            message: Self {
                correlation_id,
                sender_service: String::new(),
                reply_to: String::new(),
                operation: String::new(),
                timestamp: Utc::now().timestamp_millis(),
                error: None,
                payload: None,
                status_code: None,
                headers: None,
                authentication: None,
            },
        }
    }

    /// Start building the reply to `request`, sent by `sender_service`.
    ///
    /// The reply echoes the request's correlation id and operation name.
    #[must_use]
    pub fn reply(request: &Self, sender_service: impl Into<String>) -> ServiceMessageBuilder {
        Self::builder(request.correlation_id.clone())
            .sender_service(sender_service)
            .operation(request.operation.clone())
    }

    /// Decode an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Codec`] if the bytes are not a valid envelope.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| BridgeError::Codec(e.to_string()))
    }

    /// Encode the envelope as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Codec`] if serialization fails.
    pub fn to_json_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| BridgeError::Codec(e.to_string()))
    }

    /// Correlation id shared by request and reply.
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Name of the service that published this envelope.
    #[must_use]
    pub fn sender_service(&self) -> &str {
        &self.sender_service
    }

    /// Routing key the reply must be published to.
    #[must_use]
    pub fn reply_to(&self) -> &str {
        &self.reply_to
    }

    /// Operation (command name) the request targets.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Publication time in epoch milliseconds.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Error reported by the remote handler, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Loosely typed payload. JSON `null` decodes as `None`.
    #[must_use]
    pub const fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Option<Value> {
        self.payload
    }

    /// Explicit status code set by the handler.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Optional headers to propagate to an HTTP caller.
    #[must_use]
    pub const fn headers(&self) -> Option<&HashMap<String, String>> {
        self.headers.as_ref()
    }

    /// Authentication context of the originating caller.
    #[must_use]
    pub const fn authentication(&self) -> Option<&AuthenticationContext> {
        self.authentication.as_ref()
    }

    /// Whether the handler reported a failure.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Builder for [`ServiceMessage`].
#[derive(Debug, Clone)]
pub struct ServiceMessageBuilder {
    message: ServiceMessage,
}

impl ServiceMessageBuilder {
    /// Set the sender service name.
    #[must_use]
    pub fn sender_service(mut self, sender: impl Into<String>) -> Self {
        self.message.sender_service = sender.into();
        self
    }

    /// Set the reply routing key.
    #[must_use]
    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.message.reply_to = reply_to.into();
        self
    }

    /// Set the operation name.
    #[must_use]
    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.message.operation = operation.into();
        self
    }

    /// Set the payload. `Value::Null` is stored as an absent payload.
    #[must_use]
    pub fn payload(mut self, payload: Value) -> Self {
        self.message.payload = if payload.is_null() { None } else { Some(payload) };
        self
    }

    /// Mark the envelope as a failure with an optional status code.
    #[must_use]
    pub fn error(mut self, message: impl Into<String>, status_code: Option<u16>) -> Self {
        self.message.error = Some(message.into());
        self.message.status_code = status_code;
        self
    }

    /// Set an explicit status code.
    #[must_use]
    pub const fn status_code(mut self, status_code: u16) -> Self {
        self.message.status_code = Some(status_code);
        self
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.message
            .headers
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Attach (or clear) the caller's authentication context.
    #[must_use]
    pub fn authentication(mut self, authentication: Option<AuthenticationContext>) -> Self {
        self.message.authentication = authentication;
        self
    }

    /// Override the timestamp (epoch milliseconds).
    #[must_use]
    pub const fn timestamp(mut self, timestamp: i64) -> Self {
        self.message.timestamp = timestamp;
        self
    }

    /// Finish the envelope.
    #[must_use]
    pub fn build(self) -> ServiceMessage {
        self.message
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_uses_camel_case() {
        let message = ServiceMessage::builder(CorrelationId::from("abc"))
            .sender_service("gateway")
            .reply_to("gateway.listener.routing.key")
            .operation("getAccountById")
            .payload(json!({ "id": 123 }))
            .timestamp(42)
            .build();

        let value: Value = serde_json::from_slice(&message.to_json_vec().unwrap()).unwrap();

        assert_eq!(value["correlationId"], "abc");
        assert_eq!(value["senderService"], "gateway");
        assert_eq!(value["replyTo"], "gateway.listener.routing.key");
        assert_eq!(value["operation"], "getAccountById");
        assert_eq!(value["timestamp"], 42);
        assert_eq!(value["payload"]["id"], 123);
        assert!(value["error"].is_null());
        assert!(value["statusCode"].is_null());
        assert!(value["authentication"].is_null());
    }

    #[test]
    fn decodes_reply_from_other_services() {
        let json = br#"{
            "correlationId": "c-1",
            "senderService": "account",
            "replyTo": null,
            "operation": "getAccountById",
            "timestamp": 1735689600000,
            "error": "account not found",
            "payload": null,
            "statusCode": 404,
            "headers": {"Content-Type": "application/json"},
            "authentication": {"principal": "42", "authorities": ["ROLE_USER"], "details": {"email": "a@b.com"}}
        }"#;

        let reply = ServiceMessage::from_json_slice(json).unwrap();

        assert_eq!(reply.correlation_id().as_str(), "c-1");
        assert_eq!(reply.error(), Some("account not found"));
        assert_eq!(reply.status_code(), Some(404));
        assert!(reply.payload().is_none());
        assert_eq!(reply.reply_to(), "");
        let auth = reply.authentication().unwrap();
        assert_eq!(auth.principal, "42");
        assert_eq!(auth.authorities, vec!["ROLE_USER".to_string()]);
        assert_eq!(auth.details["email"], "a@b.com");
    }

    #[test]
    fn explicit_nulls_decode_as_unset() {
        let json = br#"{
            "correlationId": "c-1",
            "senderService": null,
            "replyTo": null,
            "operation": null,
            "timestamp": null,
            "error": null,
            "payload": {"id": 1},
            "statusCode": null,
            "headers": null,
            "authentication": {"principal": "42", "authorities": null, "details": null}
        }"#;

        let reply = ServiceMessage::from_json_slice(json).unwrap();

        assert_eq!(reply.sender_service(), "");
        assert_eq!(reply.reply_to(), "");
        assert_eq!(reply.operation(), "");
        assert_eq!(reply.timestamp(), 0);
        assert!(!reply.is_error());
        assert_eq!(reply.payload(), Some(&json!({"id": 1})));
        let auth = reply.authentication().unwrap();
        assert!(auth.authorities.is_empty());
        assert!(auth.details.is_empty());
    }

    #[test]
    fn malformed_bytes_are_codec_errors() {
        let err = ServiceMessage::from_json_slice(b"not json").unwrap_err();
        assert!(matches!(err, BridgeError::Codec(_)));

        let err = ServiceMessage::from_json_slice(br#"{"operation":"x"}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Codec(_)));
    }

    #[test]
    fn reply_echoes_correlation_and_operation() {
        let request = ServiceMessage::builder(CorrelationId::new())
            .sender_service("gateway")
            .operation("postRecipe")
            .build();

        let reply = ServiceMessage::reply(&request, "recipe")
            .error("title is required", Some(400))
            .build();

        assert_eq!(reply.correlation_id(), request.correlation_id());
        assert_eq!(reply.operation(), "postRecipe");
        assert_eq!(reply.sender_service(), "recipe");
        assert!(reply.is_error());
        assert_eq!(reply.status_code(), Some(400));
    }

    #[test]
    fn null_payload_is_absent() {
        let message = ServiceMessage::builder(CorrelationId::new())
            .payload(Value::Null)
            .build();
        assert!(message.payload().is_none());
    }

    #[test]
    fn generated_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..10_000).map(|_| CorrelationId::new()).collect();
        assert_eq!(ids.len(), 10_000);
    }
}
