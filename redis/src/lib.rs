//! Redis-based completion store.
//!
//! Relays replies between instances that share one reply queue.
//!
//! # Architecture
//!
//! Parked replies are stored in Redis with:
//! - **Key**: `courier:response:{correlation_id}` → JSON-encoded reply envelope
//! - **TTL**: the bridge's relay TTL (30 seconds by default)
//! - **Notification**: `PUBLISH courier:response-channel:{correlation_id}` in the
//!   same transaction as the write
//! - **Atomic claim**: GETDEL, so exactly one waiter takes a parked reply
//!
//! Waiters subscribe to their notification channel on a dedicated pub/sub
//! connection; the subscription ends when the returned stream is dropped.
//!
//! # Example
//!
//! ```no_run
//! use courier_core::envelope::{CorrelationId, ServiceMessage};
//! use courier_core::relay::CompletionStore;
//! use courier_redis::RedisCompletionStore;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisCompletionStore::new("redis://127.0.0.1:6379").await?;
//!
//! let id = CorrelationId::new();
//! let reply = ServiceMessage::builder(id.clone()).sender_service("account").build();
//! store.park(&id, &reply, Duration::from_secs(30)).await?;
//!
//! assert!(store.claim(&id).await?.is_some());
//! # Ok(())
//! # }
//! ```

use courier_core::envelope::{CorrelationId, ServiceMessage};
use courier_core::relay::{CompletionStore, ParkedStream, RelayError, RelayFuture, RelayKeys};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;

/// `Redis`-backed [`CompletionStore`].
///
/// # Thread Safety
///
/// This type is `Clone`; clones share the same `ConnectionManager`.
pub struct RedisCompletionStore {
    client: Client,
    conn_manager: ConnectionManager,
    keys: RelayKeys,
}

impl RedisCompletionStore {
    /// Connect with default key naming.
    ///
    /// # Connection URL Format
    ///
    /// - TCP: `redis://[:password@]host[:port][/database]`
    /// - TLS: `rediss://[:password@]host[:port][/database]`
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Connection`] if the URL is malformed or the
    /// server cannot be reached.
    pub async fn new(redis_url: &str) -> Result<Self, RelayError> {
        Self::builder().url(redis_url).build().await
    }

    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedisCompletionStoreBuilder {
        RedisCompletionStoreBuilder::default()
    }

    /// Key naming in use.
    #[must_use]
    pub const fn keys(&self) -> &RelayKeys {
        &self.keys
    }
}

impl Clone for RedisCompletionStore {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            conn_manager: self.conn_manager.clone(),
            keys: self.keys.clone(),
        }
    }
}

/// Builder for [`RedisCompletionStore`].
#[derive(Default)]
pub struct RedisCompletionStoreBuilder {
    url: Option<String>,
    key_prefix: Option<String>,
    channel_prefix: Option<String>,
}

impl RedisCompletionStoreBuilder {
    /// Redis connection URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Prefix for parked reply keys. Default `courier:response:`.
    #[must_use]
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Prefix for notification channels. Default `courier:response-channel:`.
    #[must_use]
    pub fn channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = Some(prefix.into());
        self
    }

    /// Connect and build the store.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Connection`] if no URL is set, the URL is
    /// malformed, or the server cannot be reached.
    pub async fn build(self) -> Result<RedisCompletionStore, RelayError> {
        let url = self
            .url
            .ok_or_else(|| RelayError::Connection("Redis URL not configured".to_string()))?;

        let client = Client::open(url.as_str())
            .map_err(|e| RelayError::Connection(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client.clone()).await.map_err(|e| {
            RelayError::Connection(format!("Failed to create Redis connection manager: {e}"))
        })?;

        let defaults = RelayKeys::default();
        let keys = match (self.key_prefix, self.channel_prefix) {
            (None, None) => defaults,
            (key_prefix, channel_prefix) => RelayKeys::new(
                key_prefix.unwrap_or_else(|| courier_core::relay::DEFAULT_KEY_PREFIX.to_string()),
                channel_prefix.unwrap_or_else(|| courier_core::relay::DEFAULT_CHANNEL_PREFIX.to_string()),
            ),
        };

        tracing::info!("RedisCompletionStore initialized successfully");

        Ok(RedisCompletionStore {
            client,
            conn_manager,
            keys,
        })
    }
}

impl CompletionStore for RedisCompletionStore {
    fn park<'a>(
        &'a self,
        id: &'a CorrelationId,
        reply: &'a ServiceMessage,
        ttl: Duration,
    ) -> RelayFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = self.keys.key(id);
            let channel = self.keys.channel(id);
            let body = reply.to_json_vec().map_err(|e| RelayError::Codec(e.to_string()))?;
            let ttl_seconds = ttl.as_secs().max(1);

            // SET EX and PUBLISH in one transaction: a watcher woken by the
            // notification always finds the key.
            let (): () = redis::pipe()
                .atomic()
                .set_ex(&key, body, ttl_seconds)
                .ignore()
                .publish(&channel, "parked")
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| RelayError::Store(format!("Failed to park reply: {e}")))?;

            tracing::debug!(correlation_id = %id, ttl_seconds, "Parked reply in Redis");
            Ok(())
        })
    }

    fn claim<'a>(&'a self, id: &'a CorrelationId) -> RelayFuture<'a, Option<ServiceMessage>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = self.keys.key(id);

            let body: Option<Vec<u8>> = conn
                .get_del(&key)
                .await
                .map_err(|e| RelayError::Store(format!("Failed to claim reply: {e}")))?;

            body.map(|bytes| {
                ServiceMessage::from_json_slice(&bytes).map_err(|e| RelayError::Codec(e.to_string()))
            })
            .transpose()
        })
    }

    fn watch<'a>(&'a self, id: &'a CorrelationId) -> RelayFuture<'a, ParkedStream> {
        Box::pin(async move {
            let channel = self.keys.channel(id);
            let mut pubsub = self
                .client
                .get_async_pubsub()
                .await
                .map_err(|e| RelayError::Connection(format!("Failed to open pub/sub connection: {e}")))?;

            pubsub
                .subscribe(&channel)
                .await
                .map_err(|e| RelayError::Subscribe(format!("Failed to subscribe to {channel}: {e}")))?;

            tracing::trace!(correlation_id = %id, channel = %channel, "Watching for parked reply");

            let stream: ParkedStream = Box::pin(pubsub.into_on_message().map(|_| ()));
            Ok(stream)
        })
    }

    fn release<'a>(&'a self, id: &'a CorrelationId) -> RelayFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let (): () = conn
                .del(self.keys.key(id))
                .await
                .map_err(|e| RelayError::Store(format!("Failed to release reply: {e}")))?;
            Ok(())
        })
    }
}
