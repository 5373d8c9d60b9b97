//! Request dispatcher: synchronous-looking calls over the broker.
//!
//! # Call Flow
//!
//! ```text
//! send_message(target, op, payload)
//!   │
//!   ├─ register correlation id          (before publish; replies can't race it)
//!   ├─ publish  service.exchange / <target>.consumer.routing.key
//!   ├─ wait     local completion  ─┐
//!   │           relay claim       ─┴─ first one wins, bounded by reply_timeout
//!   └─ coerce   reply → ServiceResponse<R> | Remote | Coercion
//! ```
//!
//! With a [`CompletionStore`] configured, the waiter also covers replies that
//! another instance consumed from the shared reply queue: it subscribes to the
//! park notifications for its id, then tries a claim (catches a reply parked
//! before the subscription), then waits for either the local completion or a
//! notification followed by a claim.

use crate::coerce::{ServiceResponse, coerce};
use crate::config::BridgeConfig;
use crate::metrics::BridgeMetrics;
use crate::registry::{CorrelationRegistry, PendingReply};
use courier_core::broker::MessageBroker;
use courier_core::envelope::{AuthenticationContext, CorrelationId, ServiceMessage};
use courier_core::error::{BridgeError, Result};
use courier_core::identity::consumer_routing_key;
use courier_core::relay::CompletionStore;
use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Client for calling other services over the broker.
///
/// Cheap to clone; clones share the broker, registry and store.
#[derive(Clone)]
pub struct ServiceMessageClient {
    broker: Arc<dyn MessageBroker>,
    registry: Arc<CorrelationRegistry>,
    store: Option<Arc<dyn CompletionStore>>,
    config: BridgeConfig,
}

impl ServiceMessageClient {
    /// Create a client that resolves replies through `registry` only.
    ///
    /// Pair it with a [`ReplyListener`](crate::listener::ReplyListener) on the
    /// same registry.
    #[must_use]
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        registry: Arc<CorrelationRegistry>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            broker,
            registry,
            store: None,
            config,
        }
    }

    /// Also wait on replies relayed through `store`.
    #[must_use]
    pub fn with_completion_store(mut self, store: Arc<dyn CompletionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The client's configuration.
    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The registry replies are resolved through.
    #[must_use]
    pub const fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// Call `operation` on `target` and coerce the reply into `R`.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Codec`] if `payload` cannot be serialized
    /// - [`BridgeError::Transport`] if publishing fails
    /// - [`BridgeError::Timeout`] if no reply arrives in time
    /// - [`BridgeError::Remote`] if the target replied with an error
    /// - [`BridgeError::Coercion`] if the reply payload is not an `R`
    pub async fn send_message<T, R>(
        &self,
        target: &str,
        operation: &str,
        payload: &T,
    ) -> Result<ServiceResponse<R>>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send_message_as(target, operation, payload, None).await
    }

    /// [`send_message`](Self::send_message) on behalf of an authenticated caller.
    ///
    /// # Errors
    ///
    /// As for [`send_message`](Self::send_message).
    pub async fn send_message_as<T, R>(
        &self,
        target: &str,
        operation: &str,
        payload: &T,
        authentication: Option<AuthenticationContext>,
    ) -> Result<ServiceResponse<R>>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_value(payload).map_err(|e| BridgeError::Codec(e.to_string()))?;
        let reply = self.request(target, operation, payload, authentication).await?;

        let response = coerce(reply);
        if matches!(response, Err(BridgeError::Remote { .. })) {
            BridgeMetrics::record_remote_error();
        }
        response
    }

    /// Call `operation` on `target` and return the raw reply envelope.
    ///
    /// Error replies are returned as envelopes, not as [`BridgeError::Remote`].
    ///
    /// # Errors
    ///
    /// [`BridgeError::Transport`], [`BridgeError::Timeout`] or
    /// [`BridgeError::ShuttingDown`].
    pub async fn request(
        &self,
        target: &str,
        operation: &str,
        payload: Value,
        authentication: Option<AuthenticationContext>,
    ) -> Result<ServiceMessage> {
        let correlation_id = CorrelationId::new();
        let pending = self.registry.register(correlation_id.clone())?;

        let message = ServiceMessage::builder(correlation_id.clone())
            .sender_service(self.config.service_name.clone())
            .reply_to(self.config.identity().response_routing_key())
            .operation(operation)
            .payload(payload)
            .authentication(authentication)
            .build();
        let body = message.to_json_vec()?;
        let routing_key = consumer_routing_key(target);

        tracing::debug!(
            correlation_id = %correlation_id,
            target,
            operation,
            "Sending request"
        );

        let started = Instant::now();
        if let Err(e) = self
            .broker
            .publish(&self.config.exchange, &routing_key, correlation_id.as_str(), &body)
            .await
        {
            tracing::error!(
                correlation_id = %correlation_id,
                target,
                operation,
                error = %e,
                "Failed to publish request"
            );
            return Err(e.into());
        }
        BridgeMetrics::record_request_sent();

        let timeout = self.config.reply_timeout;
        match tokio::time::timeout(timeout, self.await_reply(&correlation_id, pending)).await {
            Ok(outcome) => {
                if outcome.is_ok() {
                    BridgeMetrics::record_reply(started.elapsed());
                }
                outcome
            }
            Err(_) => {
                BridgeMetrics::record_timeout();
                tracing::warn!(
                    correlation_id = %correlation_id,
                    target,
                    operation,
                    ?timeout,
                    "Request timed out"
                );
                self.release(&correlation_id).await;
                Err(BridgeError::Timeout {
                    correlation_id,
                    after: timeout,
                })
            }
        }
    }

    async fn await_reply(
        &self,
        correlation_id: &CorrelationId,
        mut pending: PendingReply,
    ) -> Result<ServiceMessage> {
        let Some(store) = &self.store else {
            return pending.await;
        };

        let mut parked = match store.watch(correlation_id).await {
            Ok(parked) => parked,
            Err(e) => {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    error = %e,
                    "Relay unavailable, waiting for local reply only"
                );
                return pending.await;
            }
        };

        if let Some(reply) = self.claim(store.as_ref(), correlation_id).await {
            return Ok(reply);
        }

        loop {
            tokio::select! {
                outcome = &mut pending => return outcome,
                notified = parked.next() => {
                    if notified.is_none() {
                        tracing::warn!(
                            correlation_id = %correlation_id,
                            "Relay subscription closed, waiting for local reply only"
                        );
                        return pending.await;
                    }
                    if let Some(reply) = self.claim(store.as_ref(), correlation_id).await {
                        return Ok(reply);
                    }
                }
            }
        }
    }

    async fn claim(
        &self,
        store: &dyn CompletionStore,
        correlation_id: &CorrelationId,
    ) -> Option<ServiceMessage> {
        match store.claim(correlation_id).await {
            Ok(Some(reply)) => {
                tracing::debug!(correlation_id = %correlation_id, "Claimed relayed reply");
                Some(reply)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(correlation_id = %correlation_id, error = %e, "Relay claim failed");
                None
            }
        }
    }

    async fn release(&self, correlation_id: &CorrelationId) {
        if let Some(store) = &self.store {
            if let Err(e) = store.release(correlation_id).await {
                tracing::warn!(correlation_id = %correlation_id, error = %e, "Relay release failed");
            }
        }
    }
}
