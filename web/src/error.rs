//! Gateway errors and their HTTP responses.

use crate::response::{ApiResponse, default_message};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use courier_core::error::BridgeError;
use serde_json::Value;
use thiserror::Error;

/// Failure forwarding an HTTP request.
///
/// Remote failures are not errors here: an error reply is a normal response
/// carrying the remote status. This type covers requests that never got a
/// reply.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No service is routed for the path.
    #[error("Unsupported API path: {0}")]
    UnsupportedPath(String),

    /// The bridge failed (timeout, transport, codec).
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Unexpected failure inside the gateway.
    #[error("An internal error occurred")]
    Internal(#[source] anyhow::Error),
}

impl GatewayError {
    /// HTTP status returned for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedPath(_) => StatusCode::NOT_FOUND,
            Self::Bridge(err) => {
                StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            match &self {
                Self::Internal(source) => tracing::error!(
                    status = %status,
                    error = %source,
                    "Internal gateway error"
                ),
                other => tracing::error!(status = %status, error = %other, "Request forwarding failed"),
            }
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }

        metrics::counter!("courier_gateway_responses_total", "status" => status.as_str().to_owned())
            .increment(1);

        let body = ApiResponse::error(
            status.as_u16(),
            Value::String(self.to_string()),
            default_message(status.as_u16()),
        );
        (status, Json(body)).into_response()
    }
}
