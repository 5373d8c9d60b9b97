//! Request side: routing incoming requests to operation handlers.
//!
//! A service answers calls by registering one handler per operation name on an
//! [`OperationRouter`] and running a [`RequestConsumer`] over it. The consumer
//! reads `<service>.consumer.routing.key`, dispatches each request concurrently
//! and publishes the reply to the request's `replyTo` routing key.
//!
//! ```rust,no_run
//! use courier_runtime::handler::{HandlerError, OperationRouter, handler_fn, payload_as};
//! use serde_json::json;
//!
//! let router = OperationRouter::new().route(
//!     "getAccount",
//!     handler_fn(|request| async move {
//!         let id: u64 = payload_as(&request)?;
//!         if id == 0 {
//!             return Err(HandlerError::not_found("account not found"));
//!         }
//!         Ok(json!({ "id": id, "name": "Ada" }))
//!     }),
//! );
//! ```

use crate::config::BridgeConfig;
use crate::listener::ListenerHandle;
use crate::metrics::BridgeMetrics;
use courier_core::broker::{Delivery, DeliveryStream, MessageBroker};
use courier_core::envelope::ServiceMessage;
use courier_core::error::Result;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Semaphore, oneshot};

/// Failure returned by an operation handler; travels back as an error reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    /// HTTP-style status code of the failure
    pub status_code: u16,
    /// Message relayed to the caller verbatim
    pub message: String,
}

impl HandlerError {
    /// Error with an explicit status code.
    #[must_use]
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    /// 401 Unauthorized.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, message)
    }

    /// 403 Forbidden.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, message)
    }

    /// 404 Not Found.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }
}

/// Decode the request payload into `T`.
///
/// # Errors
///
/// Returns a 400 [`HandlerError`] if the payload is missing or has the wrong shape.
pub fn payload_as<T: DeserializeOwned>(request: &ServiceMessage) -> std::result::Result<T, HandlerError> {
    let payload = request.payload().cloned().unwrap_or(Value::Null);
    serde_json::from_value(payload)
        .map_err(|e| HandlerError::bad_request(format!("Invalid payload for {}: {e}", request.operation())))
}

/// Boxed future returned by [`OperationHandler::handle`].
pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<Value, HandlerError>> + Send + 'a>>;

/// Handler for one operation.
pub trait OperationHandler: Send + Sync {
    /// Handle `request`, returning the reply payload.
    fn handle(&self, request: ServiceMessage) -> HandlerFuture<'_>;
}

/// [`OperationHandler`] backed by an async closure. See [`handler_fn`].
pub struct FnHandler<F>(F);

/// Adapt an async closure into an [`OperationHandler`].
#[must_use]
pub const fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(ServiceMessage) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, HandlerError>> + Send + 'static,
{
    FnHandler(f)
}

impl<F, Fut> OperationHandler for FnHandler<F>
where
    F: Fn(ServiceMessage) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, HandlerError>> + Send + 'static,
{
    fn handle(&self, request: ServiceMessage) -> HandlerFuture<'_> {
        Box::pin((self.0)(request))
    }
}

/// Operation name to handler table.
#[derive(Default, Clone)]
pub struct OperationRouter {
    handlers: HashMap<String, Arc<dyn OperationHandler>>,
}

impl OperationRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `operation`, replacing any previous handler.
    #[must_use]
    pub fn route(mut self, operation: impl Into<String>, handler: impl OperationHandler + 'static) -> Self {
        self.handlers.insert(operation.into(), Arc::new(handler));
        self
    }

    /// Whether a handler is registered for `operation`.
    #[must_use]
    pub fn handles(&self, operation: &str) -> bool {
        self.handlers.contains_key(operation)
    }

    /// Registered operation names, sorted.
    #[must_use]
    pub fn operations(&self) -> Vec<&str> {
        let mut operations: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        operations.sort_unstable();
        operations
    }

    /// Run the handler for `request` and build the reply sent by `sender_service`.
    ///
    /// An unknown operation yields a 404 error reply.
    pub async fn dispatch(&self, request: ServiceMessage, sender_service: &str) -> ServiceMessage {
        let reply = ServiceMessage::reply(&request, sender_service);

        let Some(handler) = self.handlers.get(request.operation()) else {
            tracing::warn!(
                correlation_id = %request.correlation_id(),
                operation = %request.operation(),
                "Unsupported operation"
            );
            let message = format!("Unsupported operation: {}", request.operation());
            return reply.error(message, Some(404)).build();
        };

        let outcome = handler.handle(request).await;
        BridgeMetrics::record_handled(outcome.is_err());
        match outcome {
            Ok(payload) => reply.payload(payload).build(),
            Err(e) => reply.error(e.message, Some(e.status_code)).build(),
        }
    }
}

/// Consumer of this service's request queue.
pub struct RequestConsumer {
    broker: Arc<dyn MessageBroker>,
    router: Arc<OperationRouter>,
    config: BridgeConfig,
}

impl RequestConsumer {
    /// Create a consumer dispatching to `router`.
    #[must_use]
    pub fn new(broker: Arc<dyn MessageBroker>, router: OperationRouter, config: BridgeConfig) -> Self {
        Self {
            broker,
            router: Arc::new(router),
            config,
        }
    }

    /// Subscribe to the request queue and start consuming in the background.
    ///
    /// At most `buffer_size` requests are handled at once.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`](courier_core::error::BridgeError::Transport)
    /// if the subscription fails.
    pub async fn spawn(self) -> Result<ListenerHandle> {
        let binding = self.config.identity().request_binding(&self.config.exchange);
        let stream = self.broker.subscribe(&binding).await?;

        tracing::info!(
            service = %self.config.service_name,
            routing_key = %binding.routing_key,
            queue = %binding.queue,
            operations = ?self.router.operations(),
            "Request consumer started"
        );

        Ok(ListenerHandle::spawn(move |signal| self.run(stream, signal)))
    }

    async fn run(self, mut stream: DeliveryStream, mut shutdown: oneshot::Receiver<()>) {
        let permits = Arc::new(Semaphore::new(self.config.buffer_size.max(1)));
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(service = %self.config.service_name, "Request consumer stopping");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                            break;
                        };
                        let worker = self.worker();
                        tokio::spawn(async move {
                            worker.handle(delivery).await;
                            drop(permit);
                        });
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Request stream error");
                    }
                    None => {
                        tracing::warn!(service = %self.config.service_name, "Request stream ended");
                        break;
                    }
                },
            }
        }
    }

    fn worker(&self) -> RequestWorker {
        RequestWorker {
            broker: Arc::clone(&self.broker),
            router: Arc::clone(&self.router),
            service_name: self.config.service_name.clone(),
            exchange: self.config.exchange.clone(),
        }
    }
}

struct RequestWorker {
    broker: Arc<dyn MessageBroker>,
    router: Arc<OperationRouter>,
    service_name: String,
    exchange: String,
}

impl RequestWorker {
    async fn handle(self, delivery: Delivery) {
        let request = match ServiceMessage::from_json_slice(&delivery.body) {
            Ok(request) => request,
            Err(e) => {
                BridgeMetrics::record_malformed();
                tracing::warn!(
                    routing_key = %delivery.routing_key,
                    key = ?delivery.key,
                    error = %e,
                    "Dropping malformed request"
                );
                return;
            }
        };

        let correlation_id = request.correlation_id().clone();
        let reply_to = request.reply_to().to_string();
        tracing::debug!(
            correlation_id = %correlation_id,
            operation = %request.operation(),
            sender = %request.sender_service(),
            "Handling request"
        );

        let reply = self.router.dispatch(request, &self.service_name).await;

        if reply_to.is_empty() {
            tracing::warn!(correlation_id = %correlation_id, "Request has no replyTo, discarding reply");
            return;
        }

        let body = match reply.to_json_vec() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(correlation_id = %correlation_id, error = %e, "Failed to encode reply");
                return;
            }
        };

        if let Err(e) = self
            .broker
            .publish(&self.exchange, &reply_to, correlation_id.as_str(), &body)
            .await
        {
            tracing::error!(
                correlation_id = %correlation_id,
                reply_to = %reply_to,
                error = %e,
                "Failed to publish reply"
            );
        }
    }
}
