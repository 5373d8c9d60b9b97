//! Message broker abstraction for service-to-service messaging.
//!
//! This module provides the [`MessageBroker`] trait: fire-and-forget publishing to
//! an exchange with a routing key, and consumption of everything bound to a
//! queue. Request/response semantics are layered on top of it by the runtime
//! crate; the broker itself knows nothing about correlation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   service.exchange    ┌──────────────────────────┐
//! │   gateway    │ ───────────────────►  │ account.consumer.routing │
//! │              │                       │        .key              │
//! │              │ ◄───────────────────  │ (account.service.consumer│
//! └──────────────┘  gateway.listener     │  queue)                  │
//!                   .routing.key         └──────────────────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: a delivery may be observed more than once
//! - **Unordered across queues**: no ordering is assumed between routing keys
//! - **Competing consumers**: subscribers that share a queue split the
//!   deliveries; subscribers on different queues each receive a copy
//!
//! # Implementations
//!
//! - `InMemoryBroker` in `courier-testing` - for tests (fast, deterministic)
//! - `RedpandaBroker` in `courier-redpanda` - for production (Kafka-compatible)

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a binding
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed to subscribe
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error while consuming
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Binding of a queue to an exchange/routing key pair.
///
/// Every subscriber names the queue it consumes from. Subscribers that share
/// a queue name compete for deliveries (one instance handles each message);
/// distinct queue names each receive every message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    /// Exchange the routing key belongs to (e.g. `service.exchange`)
    pub exchange: String,
    /// Routing key (e.g. `account.consumer.routing.key`)
    pub routing_key: String,
    /// Queue name shared by competing consumers (e.g. `account.service.consumer`)
    pub queue: String,
}

impl Binding {
    /// Create a new binding.
    #[must_use]
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            queue: queue.into(),
        }
    }

    /// Physical topic name for brokers without exchanges.
    #[must_use]
    pub fn topic(&self) -> String {
        topic_name(&self.exchange, &self.routing_key)
    }
}

/// Physical topic name for an exchange/routing key pair: `{exchange}.{routing_key}`.
#[must_use]
pub fn topic_name(exchange: &str, routing_key: &str) -> String {
    format!("{exchange}.{routing_key}")
}

/// A raw message received from a binding.
///
/// The body is left undecoded so consumers can drop malformed messages
/// without tearing down the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Routing key the message was published with
    pub routing_key: String,
    /// Message key (the correlation id for bridge traffic)
    pub key: Option<String>,
    /// Raw message body
    pub body: Vec<u8>,
}

/// Stream of deliveries from a subscription.
///
/// Dropping the stream ends the subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BrokerError>> + Send>>;

/// Trait for broker implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a single broker is shared by the
/// dispatcher, the reply listener and the request consumer.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be used as `Arc<dyn MessageBroker>`.
pub trait MessageBroker: Send + Sync {
    /// Publish `body` to `exchange` with `routing_key`.
    ///
    /// `key` is a partitioning hint (the correlation id for bridge traffic).
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the broker rejects the message.
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        key: &str,
        body: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Consume every message routed to `binding`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the subscription cannot be
    /// established.
    fn subscribe(
        &self,
        binding: &Binding,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>>;
}
