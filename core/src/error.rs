//! Error taxonomy for the request/response bridge.
//!
//! Every failure a caller can observe is one of these variants. The split
//! matters to callers: a [`BridgeError::Remote`] is a business failure reported
//! by the handling service, while a [`BridgeError::Coercion`] means the reply did
//! not have the shape the caller declared.

use crate::broker::BrokerError;
use crate::envelope::CorrelationId;
use crate::relay::RelayError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced to callers of the bridge.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// Publishing to the broker or subscribing to a channel failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No reply arrived within the configured window.
    #[error("No reply for correlation id {correlation_id} within {after:?}")]
    Timeout {
        /// The request that timed out
        correlation_id: CorrelationId,
        /// The window that elapsed
        after: Duration,
    },

    /// The handling service reported a failure.
    #[error("{message}")]
    Remote {
        /// Error message, verbatim from the reply
        message: String,
        /// Status code reported alongside the error, if any
        status_code: Option<u16>,
    },

    /// The reply payload could not be converted to the declared type.
    #[error("Failed to convert reply payload: {0}")]
    Coercion(String),

    /// An envelope could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The correlation id is already registered for an in-flight request.
    #[error("Correlation id already in flight: {0}")]
    DuplicateCorrelation(CorrelationId),

    /// The bridge was shut down before the request completed.
    #[error("Bridge is shutting down")]
    ShuttingDown,
}

impl BridgeError {
    /// HTTP-equivalent status code for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use courier_core::error::BridgeError;
    ///
    /// let err = BridgeError::Remote { message: "account not found".into(), status_code: Some(404) };
    /// assert_eq!(err.status_code(), 404);
    ///
    /// let err = BridgeError::Remote { message: "bad input".into(), status_code: None };
    /// assert_eq!(err.status_code(), 400);
    /// ```
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Transport(_) | Self::ShuttingDown => 503,
            Self::Timeout { .. } => 504,
            Self::Remote { status_code, .. } => match status_code {
                Some(code) => *code,
                None => 400,
            },
            Self::Coercion(_) | Self::Codec(_) | Self::DuplicateCorrelation(_) => 500,
        }
    }

    /// Returns `true` for [`BridgeError::Timeout`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` for [`BridgeError::Remote`].
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

impl From<BrokerError> for BridgeError {
    fn from(err: BrokerError) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<RelayError> for BridgeError {
    fn from(err: RelayError) -> Self {
        Self::Transport(err.to_string())
    }
}
