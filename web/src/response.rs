//! Uniform JSON body returned by the gateway.

use serde::{Deserialize, Serialize};

/// Response body for every gateway reply, success or failure.
///
/// ```json
/// { "status": 201, "data": { "id": 7 }, "message": "Created", "error": null }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// HTTP status code
    pub status: u16,
    /// Payload on success
    pub data: Option<T>,
    /// Human-readable summary
    pub message: String,
    /// Error detail on failure
    pub error: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Successful response.
    #[must_use]
    pub fn success(status: u16, data: Option<T>, message: impl Into<String>) -> Self {
        Self {
            status,
            data,
            message: message.into(),
            error: None,
        }
    }

    /// Successful response with the default message for `status`.
    #[must_use]
    pub fn success_with_default_message(status: u16, data: Option<T>) -> Self {
        Self::success(status, data, default_message(status))
    }

    /// Error response; `data` is always empty.
    #[must_use]
    pub fn error(status: u16, error: T, message: impl Into<String>) -> Self {
        Self {
            status,
            data: None,
            message: message.into(),
            error: Some(error),
        }
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Default message for a status code.
#[must_use]
pub const fn default_message(status: u16) -> &'static str {
    match status {
        201 => "Resource created successfully.",
        202 => "Request accepted and is being processed.",
        204 => "Request processed successfully with no content.",
        200..=299 => "Request processed successfully.",
        _ => "An error occurred while processing the request.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn success_serializes_every_field() {
        let response = ApiResponse::success(200, Some(json!({ "id": 1 })), "OK");
        assert_eq!(
            serde_json::to_value(&response).ok(),
            Some(json!({ "status": 200, "data": { "id": 1 }, "message": "OK", "error": null }))
        );
        assert!(response.is_success());
    }

    #[test]
    fn error_carries_detail_not_data() {
        let response = ApiResponse::error(404, Value::from("account not found"), "Not Found");
        assert_eq!(response.data, None);
        assert_eq!(response.error, Some(Value::from("account not found")));
        assert!(!response.is_success());
    }

    #[test]
    fn default_messages() {
        assert_eq!(default_message(200), "Request processed successfully.");
        assert_eq!(default_message(201), "Resource created successfully.");
        assert_eq!(default_message(204), "Request processed successfully with no content.");
        assert_eq!(default_message(206), "Request processed successfully.");
        assert_eq!(default_message(504), "An error occurred while processing the request.");

        let response = ApiResponse::<Value>::success_with_default_message(202, None);
        assert_eq!(response.message, "Request accepted and is being processed.");
    }
}
