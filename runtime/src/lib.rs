//! # Courier Runtime
//!
//! Request/response over a fire-and-forget broker.
//!
//! - [`registry::CorrelationRegistry`]: in-flight requests, resolved at most once
//! - [`client::ServiceMessageClient`]: registers, publishes, awaits, coerces
//! - [`listener::ReplyListener`]: routes replies from the shared reply queue
//! - [`coerce`]: reply envelope into a typed [`ServiceResponse`]
//! - [`handler`]: operation routing for the serving side
//!
//! ## Wiring
//!
//! ```rust,no_run
//! use courier_core::broker::MessageBroker;
//! use courier_runtime::{BridgeConfig, CorrelationRegistry, ReplyListener, ServiceMessageClient};
//! use serde_json::{Value, json};
//! use std::sync::Arc;
//!
//! # async fn example(broker: Arc<dyn MessageBroker>) -> courier_core::Result<()> {
//! let config = BridgeConfig::new("gateway");
//! let registry = Arc::new(CorrelationRegistry::new());
//!
//! let listener = ReplyListener::new(Arc::clone(&broker), Arc::clone(&registry), config.clone())
//!     .spawn()
//!     .await?;
//! let client = ServiceMessageClient::new(broker, registry, config);
//!
//! let account = client
//!     .send_message::<_, Value>("account", "getAccountById", &json!(42))
//!     .await?;
//!
//! listener.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod coerce;
pub mod config;
pub mod handler;
pub mod listener;
pub mod metrics;
pub mod registry;

pub use client::ServiceMessageClient;
pub use coerce::{ServiceResponse, coerce};
pub use config::BridgeConfig;
pub use handler::{HandlerError, OperationHandler, OperationRouter, RequestConsumer, handler_fn};
pub use listener::{ListenerHandle, ReplyListener};
pub use registry::{CorrelationRegistry, PendingReply};
