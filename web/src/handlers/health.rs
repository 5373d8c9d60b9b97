//! Health check endpoints.

use crate::client::ApiMessageClient;
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

/// Liveness: the process is up.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness report.
#[derive(Debug, Serialize)]
pub struct Readiness {
    /// `ready` or `shutting_down`
    pub status: &'static str,
    /// Requests awaiting a reply
    pub pending_requests: usize,
}

/// Readiness: 503 once the bridge has been shut down.
///
/// ```text
/// GET /health/ready
/// ```
#[allow(clippy::unused_async)]
pub async fn readiness(State(client): State<ApiMessageClient>) -> (StatusCode, Json<Readiness>) {
    let registry = client.bridge().registry();
    if registry.is_closed() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(Readiness {
                status: "shutting_down",
                pending_requests: registry.len(),
            }),
        );
    }
    (
        StatusCode::OK,
        Json(Readiness {
            status: "ready",
            pending_requests: registry.len(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
