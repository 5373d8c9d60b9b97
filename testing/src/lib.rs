//! # Courier Testing
//!
//! Testing utilities for Courier services.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: exchange/queue semantics without a broker process
//! - [`InMemoryCompletionStore`]: expiring relay store with notifications
//! - [`fixtures`]: envelope builders and tracing setup
//! - [`properties`]: proptest strategies for ids, service names and paths
//!
//! ## Example
//!
//! ```ignore
//! use courier_testing::{InMemoryBroker, fixtures};
//! use courier_runtime::{BridgeConfig, CorrelationRegistry, ReplyListener, ServiceMessageClient};
//!
//! #[tokio::test]
//! async fn test_account_lookup() {
//!     fixtures::init_tracing();
//!     let broker = Arc::new(InMemoryBroker::new());
//!     let registry = Arc::new(CorrelationRegistry::new());
//!     let _listener = ReplyListener::new(broker.clone(), registry.clone(), BridgeConfig::new("gateway"))
//!         .spawn()
//!         .await
//!         .unwrap();
//!     // ...
//! }
//! ```

pub mod broker;
pub mod relay;

pub use broker::{InMemoryBroker, PublishedMessage};
pub use relay::InMemoryCompletionStore;

/// Envelope builders and test setup.
pub mod fixtures {
    use courier_core::envelope::{CorrelationId, ServiceMessage};
    use serde_json::Value;

    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Honors `RUST_LOG`; safe to call from every test.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// A request from `sender` for `operation`, replying to `sender`'s listener key.
    #[must_use]
    pub fn request(sender: &str, operation: &str, payload: Value) -> ServiceMessage {
        ServiceMessage::builder(CorrelationId::new())
            .sender_service(sender)
            .reply_to(courier_core::identity::listener_routing_key(sender))
            .operation(operation)
            .payload(payload)
            .build()
    }

    /// A successful reply to `request` from `sender`.
    #[must_use]
    pub fn reply(request: &ServiceMessage, sender: &str, payload: Value) -> ServiceMessage {
        ServiceMessage::reply(request, sender).payload(payload).build()
    }

    /// An error reply to `request` from `sender`.
    #[must_use]
    pub fn error_reply(request: &ServiceMessage, sender: &str, message: &str, status_code: u16) -> ServiceMessage {
        ServiceMessage::reply(request, sender)
            .error(message, Some(status_code))
            .build()
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Lowercase service names such as `account` or `recipe`.
    pub fn service_names() -> impl Strategy<Value = String> {
        "[a-z]{1,12}"
    }

    /// Path segments: lowercase words or numeric ids.
    pub fn path_segments() -> impl Strategy<Value = String> {
        prop_oneof!["[a-z]{1,10}", "[0-9]{1,6}"]
    }

    /// Request paths of the form `/api/<segments...>`.
    pub fn api_paths() -> impl Strategy<Value = String> {
        prop::collection::vec(path_segments(), 0..5)
            .prop_map(|segments| format!("/api/{}", segments.join("/")))
    }

    /// HTTP methods the gateway forwards.
    pub fn http_methods() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just("GET"), Just("POST"), Just("PUT"), Just("PATCH"), Just("DELETE")]
    }
}
