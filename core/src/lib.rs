//! # Courier Core
//!
//! Core types and traits for correlation-based RPC over a message broker.
//!
//! A caller publishes a request envelope carrying a fresh correlation id and a
//! reply-to routing key; the handling service publishes a reply envelope echoing
//! the id; the caller's reply listener matches the two. This crate defines the
//! pieces every participant shares:
//!
//! - [`envelope`]: [`ServiceMessage`] and [`CorrelationId`], the JSON wire shape
//! - [`identity`]: routing keys and queue names derived from a service name
//! - [`broker`]: the [`MessageBroker`] transport trait
//! - [`relay`]: the [`CompletionStore`] trait for fleet-wide reply relay
//! - [`error`]: the [`BridgeError`] taxonomy surfaced to callers
//! - [`enriched`]: the payload the gateway forwards for HTTP requests
//!
//! The runtime pieces (registry, dispatcher, listener) live in
//! `courier-runtime`; transports live in `courier-redpanda` and `courier-redis`.

pub mod broker;
pub mod enriched;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod relay;

pub use broker::{Binding, BrokerError, Delivery, DeliveryStream, MessageBroker};
pub use enriched::EnrichedRequest;
pub use envelope::{AuthenticationContext, CorrelationId, ServiceMessage, ServiceMessageBuilder};
pub use error::{BridgeError, Result};
pub use identity::{SERVICE_EXCHANGE, ServiceIdentity};
pub use relay::{CompletionStore, ParkedStream, RelayError, RelayKeys};
