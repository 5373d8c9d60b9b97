//! HTTP gateway for Courier.
//!
//! Every request under a routed prefix becomes one bridge request to the
//! service owning that prefix, and its reply becomes the HTTP response.
//!
//! # Request Flow
//!
//! 1. **Resolve** the target service from the path prefix (404 if none)
//! 2. **Resolve** the operation name from path and method
//! 3. **Wrap** body, path, method, headers and query in an `EnrichedRequest`
//! 4. **Send** it over the bridge with the caller's authentication context
//! 5. **Map** the reply: error replies keep their status, successes get
//!    201 for `post*`, 204 for `delete*`, 200 otherwise
//!
//! Timeouts answer 504 and transport failures 503.
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_runtime::ServiceMessageClient;
//! use courier_web::{ApiMessageClient, serve};
//!
//! # async fn example(bridge: ServiceMessageClient) -> anyhow::Result<()> {
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! serve(listener, ApiMessageClient::new(bridge), async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod resolver;
pub mod response;

use anyhow::Context;
use axum::{Router, routing::get};
use std::future::Future;
use tower_http::trace::TraceLayer;

pub use client::{ApiMessageClient, GatewayRequest, GatewayResponse};
pub use error::GatewayError;
pub use extractors::Authenticated;
pub use middleware::{REQUEST_ID_HEADER, RequestId, request_id_layer};
pub use resolver::{ServiceResolver, resolve_operation, status_for_operation};
pub use response::ApiResponse;

/// Result type alias for gateway handlers.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway routes: health endpoints, everything else forwarded.
pub fn gateway_router(client: ApiMessageClient) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness))
        .fallback(handlers::proxy)
        .layer(request_id_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(client)
}

/// Serve the gateway on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the listener address cannot be read or the server
/// fails.
pub async fn serve<F>(listener: tokio::net::TcpListener, client: ApiMessageClient, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("Failed to read gateway address")?;
    tracing::info!(%addr, "Gateway listening");

    axum::serve(listener, gateway_router(client))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Gateway server failed")?;

    tracing::info!("Gateway stopped");
    Ok(())
}
