//! HTTP requests through the gateway to services on the in-memory broker.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use axum::{
    Extension, Router,
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use courier_core::enriched::EnrichedRequest;
use courier_core::envelope::AuthenticationContext;
use courier_runtime::handler::payload_as;
use courier_runtime::{
    BridgeConfig, CorrelationRegistry, HandlerError, ListenerHandle, OperationRouter, ReplyListener,
    RequestConsumer, ServiceMessageClient, handler_fn,
};
use courier_testing::{InMemoryBroker, fixtures};
use courier_web::{ApiMessageClient, REQUEST_ID_HEADER, gateway_router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

// ============================================================================
// Test Fixtures
// ============================================================================

fn account_router() -> OperationRouter {
    OperationRouter::new()
        .route(
            "getById",
            handler_fn(|request| async move {
                let http: EnrichedRequest = payload_as(&request)?;
                let id = http.id_from_path().ok_or_else(|| HandlerError::bad_request("id required"))?;
                if id == 0 {
                    return Err(HandlerError::not_found("account not found"));
                }
                Ok(json!({
                    "id": id,
                    "requestId": http.headers.get("x-request-id"),
                    "verbose": http.query_param("verbose"),
                }))
            }),
        )
        .route(
            "getMe",
            handler_fn(|request| async move {
                let principal = request
                    .authentication()
                    .map(|auth| auth.principal.clone())
                    .ok_or_else(|| HandlerError::unauthorized("login required"))?;
                Ok(json!({ "principal": principal }))
            }),
        )
}

fn recipe_router() -> OperationRouter {
    OperationRouter::new()
        .route(
            "postRecipes",
            handler_fn(|request| async move {
                let http: EnrichedRequest = payload_as(&request)?;
                Ok(json!({ "received": http.body, "method": http.method }))
            }),
        )
        .route("deleteById", handler_fn(|_| async { Ok(Value::Null) }))
        .route(
            "getSlow",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(json!("too late"))
            }),
        )
}

struct Gateway {
    broker: InMemoryBroker,
    registry: Arc<CorrelationRegistry>,
    app: Router,
    _listener: ListenerHandle,
    _services: Vec<ListenerHandle>,
}

async fn gateway() -> Gateway {
    fixtures::init_tracing();
    let broker = InMemoryBroker::new();

    let mut services = Vec::new();
    for (name, router) in [("account", account_router()), ("recipe", recipe_router())] {
        services.push(
            RequestConsumer::new(Arc::new(broker.clone()), router, BridgeConfig::new(name))
                .spawn()
                .await
                .unwrap(),
        );
    }

    let config = BridgeConfig::new("gateway").with_reply_timeout(Duration::from_millis(300));
    let registry = Arc::new(CorrelationRegistry::new());
    let listener = ReplyListener::new(Arc::new(broker.clone()), Arc::clone(&registry), config.clone())
        .spawn()
        .await
        .unwrap();
    let bridge = ServiceMessageClient::new(Arc::new(broker.clone()), Arc::clone(&registry), config);

    Gateway {
        broker,
        registry,
        app: gateway_router(ApiMessageClient::new(bridge)),
        _listener: listener,
        _services: services,
    }
}

async fn call(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ============================================================================
// Forwarding
// ============================================================================

#[tokio::test]
async fn get_forwards_path_query_and_request_id() {
    let gateway = gateway().await;

    let response = call(&gateway.app, get("/api/account/42?verbose=true")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response
        .headers()
        .get(&REQUEST_ID_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(
        json_body(response).await,
        json!({
            "status": 200,
            "data": { "id": 42, "requestId": request_id, "verbose": "true" },
            "message": "OK",
            "error": null,
        })
    );

    let sent = gateway.broker.published_to("account.consumer.routing.key");
    let envelope = sent[0].envelope().unwrap();
    assert_eq!(envelope.operation(), "getById");
    assert_eq!(envelope.sender_service(), "gateway");
    assert!(envelope.authentication().is_none());
    assert!(gateway.registry.is_empty());
}

#[tokio::test]
async fn post_is_created_with_parsed_body() {
    let gateway = gateway().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/recipes")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"title":"soup"}"#))
        .unwrap();

    let response = call(&gateway.app, request).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["status"], 201);
    assert_eq!(body["data"], json!({ "received": { "title": "soup" }, "method": "POST" }));
}

#[tokio::test]
async fn empty_and_non_json_bodies() {
    let gateway = gateway().await;

    let empty = Request::builder().method("POST").uri("/api/recipes").body(Body::empty()).unwrap();
    let body = json_body(call(&gateway.app, empty).await).await;
    assert_eq!(body["data"]["received"], json!({}));

    let text = Request::builder()
        .method("POST")
        .uri("/api/recipes")
        .body(Body::from("title=soup"))
        .unwrap();
    let body = json_body(call(&gateway.app, text).await).await;
    assert_eq!(body["data"]["received"], json!("title=soup"));
}

#[tokio::test]
async fn delete_is_no_content() {
    let gateway = gateway().await;
    let request = Request::builder()
        .method("DELETE")
        .uri("/api/recipes/9")
        .body(Body::empty())
        .unwrap();

    let response = call(&gateway.app, request).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn authentication_context_is_forwarded() {
    let gateway = gateway().await;
    let app = gateway
        .app
        .clone()
        .layer(Extension(AuthenticationContext::new("user-7").with_authority("ROLE_USER")));

    let response = call(&app, get("/api/account/me")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"], json!({ "principal": "user-7" }));

    let sent = gateway.broker.published_to("account.consumer.routing.key");
    let auth = sent[0].envelope().unwrap().authentication().cloned().unwrap();
    assert_eq!(auth.authorities, vec!["ROLE_USER".to_string()]);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn remote_error_keeps_its_status() {
    let gateway = gateway().await;

    let response = call(&gateway.app, get("/api/account/0")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        json_body(response).await,
        json!({ "status": 404, "data": null, "message": "Not Found", "error": "account not found" })
    );
}

#[tokio::test]
async fn anonymous_caller_gets_remote_unauthorized() {
    let gateway = gateway().await;

    let response = call(&gateway.app, get("/api/account/me")).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_operation_is_not_found() {
    let gateway = gateway().await;

    let response = call(&gateway.app, get("/api/recipes")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], json!("Unsupported operation: getRecipes"));
}

#[tokio::test]
async fn unrouted_path_is_not_found_without_publishing() {
    let gateway = gateway().await;

    let response = call(&gateway.app, get("/api/orders/1")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], json!("Unsupported API path: /api/orders/1"));
    assert!(gateway.broker.published().is_empty());
}

#[tokio::test]
async fn slow_service_is_gateway_timeout() {
    let gateway = gateway().await;

    let response = call(&gateway.app, get("/api/recipes/slow")).await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json_body(response).await["status"], 504);
    assert!(gateway.registry.is_empty());
}

#[tokio::test]
async fn broker_down_is_service_unavailable() {
    let gateway = gateway().await;
    gateway.broker.fail_publishes(true);

    let response = call(&gateway.app, get("/api/account/1")).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn health_endpoints() {
    let gateway = gateway().await;

    let live = call(&gateway.app, get("/health")).await;
    assert_eq!(live.status(), StatusCode::OK);

    let ready = call(&gateway.app, get("/health/ready")).await;
    assert_eq!(ready.status(), StatusCode::OK);
    assert_eq!(json_body(ready).await, json!({ "status": "ready", "pending_requests": 0 }));

    gateway.registry.shutdown();

    let ready = call(&gateway.app, get("/health/ready")).await;
    assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
}
