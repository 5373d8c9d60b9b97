//! Distributed completion relay.
//!
//! When several instances of a service share one reply queue, a reply may land
//! on an instance that is not the one awaiting it. The [`CompletionStore`]
//! ferries such replies across the fleet.
//!
//! # Hybrid Design
//!
//! A parked reply is written under a key with a short expiry *and* announced on
//! a per-correlation notification channel. The awaiting side subscribes to the
//! channel first and then claims the key, so both orderings are covered:
//!
//! ```text
//! reply parked BEFORE waiter subscribes   reply parked AFTER waiter subscribes
//! ─────────────────────────────────────   ────────────────────────────────────
//! park: SET key EX ttl; PUBLISH           watch: SUBSCRIBE channel
//! watch: SUBSCRIBE channel                claim: GETDEL key  → None
//! claim: GETDEL key  → Some(reply)  ✓     park: SET key EX ttl; PUBLISH
//!                                         notification → claim → Some(reply) ✓
//! ```
//!
//! A notification alone is never trusted as the reply: pub/sub delivery is
//! at-most-once to current subscribers, the key is the source of truth.

use crate::envelope::{CorrelationId, ServiceMessage};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Default key prefix for parked replies.
pub const DEFAULT_KEY_PREFIX: &str = "courier:response:";

/// Default channel prefix for park notifications.
pub const DEFAULT_CHANNEL_PREFIX: &str = "courier:response-channel:";

/// Errors from the completion store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Could not reach the store
    #[error("Relay connection failed: {0}")]
    Connection(String),

    /// A read or write against the store failed
    #[error("Relay operation failed: {0}")]
    Store(String),

    /// Subscribing to a notification channel failed
    #[error("Relay subscription failed: {0}")]
    Subscribe(String),

    /// A parked reply could not be encoded or decoded
    #[error("Relay codec error: {0}")]
    Codec(String),
}

/// Key and channel naming for parked replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayKeys {
    key_prefix: String,
    channel_prefix: String,
}

impl RelayKeys {
    /// Create naming with custom prefixes.
    #[must_use]
    pub fn new(key_prefix: impl Into<String>, channel_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            channel_prefix: channel_prefix.into(),
        }
    }

    /// Key under which the reply for `id` is parked.
    #[must_use]
    pub fn key(&self, id: &CorrelationId) -> String {
        format!("{}{id}", self.key_prefix)
    }

    /// Channel on which parking of `id` is announced.
    #[must_use]
    pub fn channel(&self, id: &CorrelationId) -> String {
        format!("{}{id}", self.channel_prefix)
    }
}

impl Default for RelayKeys {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX, DEFAULT_CHANNEL_PREFIX)
    }
}

/// Stream of park notifications for one correlation id.
///
/// Each item means "a reply may now be claimable". Dropping the stream releases
/// the underlying subscription.
pub type ParkedStream = Pin<Box<dyn Stream<Item = ()> + Send>>;

/// Boxed future returned by [`CompletionStore`] methods.
pub type RelayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RelayError>> + Send + 'a>>;

/// Key-value store with expiry plus notification channels.
pub trait CompletionStore: Send + Sync {
    /// Park `reply` for `id` with expiry `ttl` and notify current watchers.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Store`] if the write fails.
    fn park<'a>(
        &'a self,
        id: &'a CorrelationId,
        reply: &'a ServiceMessage,
        ttl: Duration,
    ) -> RelayFuture<'a, ()>;

    /// Atomically take the parked reply for `id`, if any.
    ///
    /// At most one caller observes a given parked reply.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Store`] or [`RelayError::Codec`] on failure.
    fn claim<'a>(&'a self, id: &'a CorrelationId) -> RelayFuture<'a, Option<ServiceMessage>>;

    /// Subscribe to park notifications for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Subscribe`] if the subscription fails.
    fn watch<'a>(&'a self, id: &'a CorrelationId) -> RelayFuture<'a, ParkedStream>;

    /// Delete any parked reply for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Store`] if the delete fails.
    fn release<'a>(&'a self, id: &'a CorrelationId) -> RelayFuture<'a, ()>;
}
