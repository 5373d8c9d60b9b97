//! Request id tracking for gateway traffic.
//!
//! Every request leaves the gateway with an `X-Request-ID` header:
//!
//! 1. **Reuse** the caller's id if it is a valid UUID, otherwise generate one
//! 2. **Write** it back into the request headers, so the handling service sees
//!    it among the forwarded headers
//! 3. **Span** the request with `request_id`
//! 4. **Echo** it in the response
//!
//! The request id identifies the HTTP exchange; each bridge request still gets
//! its own correlation id.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    response::Response,
};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the request id.
pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Request id assigned by [`RequestIdLayer`], stored in request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(pub Uuid);

/// Create a layer that assigns request ids.
#[must_use]
pub const fn request_id_layer() -> RequestIdLayer {
    RequestIdLayer
}

/// Layer for request id tracking.
#[derive(Clone, Debug)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdMiddleware { inner }
    }
}

/// Middleware service for request id tracking.
#[derive(Clone, Debug)]
pub struct RequestIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for RequestIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future =
        std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let request_id = req
            .headers()
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);
        let header_value = HeaderValue::from_str(&request_id.to_string()).ok();

        if let Some(value) = &header_value {
            req.headers_mut().insert(REQUEST_ID_HEADER.clone(), value.clone());
        }
        req.extensions_mut().insert(RequestId(request_id));

        let span = tracing::info_span!(
            "gateway_request",
            request_id = %request_id,
            method = %req.method(),
            path = %req.uri().path(),
        );

        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.instrument(span).await?;
            if let Some(value) = header_value {
                response.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
            }
            Ok(response)
        })
    }
}
