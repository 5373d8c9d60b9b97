//! Turning reply envelopes into typed results.

use courier_core::envelope::ServiceMessage;
use courier_core::error::{BridgeError, Result};
use serde::de::DeserializeOwned;

/// Typed outcome of a successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceResponse<R> {
    /// The reply carried a payload of the expected type
    Content(R),
    /// The reply carried no payload (absent or JSON `null`)
    NoContent,
}

impl<R> ServiceResponse<R> {
    /// The payload, if any.
    #[must_use]
    pub fn into_option(self) -> Option<R> {
        match self {
            Self::Content(value) => Some(value),
            Self::NoContent => None,
        }
    }

    /// Whether the reply carried no payload.
    #[must_use]
    pub const fn is_no_content(&self) -> bool {
        matches!(self, Self::NoContent)
    }
}

/// Coerce `reply` into a [`ServiceResponse<R>`].
///
/// An error reply becomes [`BridgeError::Remote`] with the remote message
/// verbatim; its payload is ignored. A payload that does not deserialize into
/// `R` becomes [`BridgeError::Coercion`].
///
/// # Errors
///
/// See above.
pub fn coerce<R: DeserializeOwned>(reply: ServiceMessage) -> Result<ServiceResponse<R>> {
    if let Some(message) = reply.error() {
        return Err(BridgeError::Remote {
            message: message.to_string(),
            status_code: reply.status_code(),
        });
    }

    match reply.into_payload() {
        None => Ok(ServiceResponse::NoContent),
        Some(payload) => serde_json::from_value(payload)
            .map(ServiceResponse::Content)
            .map_err(|e| BridgeError::Coercion(e.to_string())),
    }
}
