//! Catch-all handler forwarding requests to services.

use crate::client::{ApiMessageClient, GatewayRequest, GatewayResponse};
use crate::GatewayResult;
use crate::extractors::Authenticated;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, Method, Uri},
};
use std::collections::HashMap;

/// Forward any request under a routed prefix.
///
/// Installed as the router fallback by [`crate::gateway_router`].
///
/// # Errors
///
/// See [`ApiMessageClient::forward`].
pub async fn proxy(
    State(client): State<ApiMessageClient>,
    Authenticated(authentication): Authenticated,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query_params): Query<HashMap<String, String>>,
    body: Bytes,
) -> GatewayResult<GatewayResponse> {
    client
        .forward(GatewayRequest {
            method,
            path: uri.path().to_string(),
            headers,
            query_params,
            body,
            authentication,
        })
        .await
}
