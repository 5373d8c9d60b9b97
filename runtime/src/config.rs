//! Bridge configuration.

use courier_core::identity::{SERVICE_EXCHANGE, ServiceIdentity};
use courier_core::relay::{DEFAULT_CHANNEL_PREFIX, DEFAULT_KEY_PREFIX, RelayKeys};
use std::time::Duration;

/// Default time a caller waits for a reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default expiry of a parked reply in the completion store.
pub const DEFAULT_RELAY_TTL: Duration = Duration::from_secs(30);

/// Default capacity of the listener and consumer hand-off channels.
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Configuration shared by the dispatcher, reply listener and request consumer.
///
/// # Example
///
/// ```
/// use courier_runtime::config::BridgeConfig;
/// use std::time::Duration;
///
/// let config = BridgeConfig::new("gateway")
///     .with_reply_timeout(Duration::from_secs(5))
///     .with_relay_ttl(Duration::from_secs(10));
///
/// assert_eq!(config.service_name, "gateway");
/// assert_eq!(config.exchange, "service.exchange");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Name of this service; replies are addressed to it
    pub service_name: String,
    /// Exchange requests and replies are published on
    pub exchange: String,
    /// How long a caller waits for a reply
    pub reply_timeout: Duration,
    /// Expiry of replies parked for other instances
    pub relay_ttl: Duration,
    /// Capacity of internal hand-off channels
    pub buffer_size: usize,
    /// Key prefix for parked replies
    pub relay_key_prefix: String,
    /// Channel prefix for park notifications
    pub relay_channel_prefix: String,
}

impl BridgeConfig {
    /// Configuration for `service_name` with default settings.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    /// Set the exchange.
    #[must_use]
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Set the reply timeout.
    #[must_use]
    pub const fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Set the parked reply expiry.
    #[must_use]
    pub const fn with_relay_ttl(mut self, ttl: Duration) -> Self {
        self.relay_ttl = ttl;
        self
    }

    /// Set the hand-off channel capacity.
    #[must_use]
    pub const fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the relay key and channel prefixes.
    #[must_use]
    pub fn with_relay_prefixes(
        mut self,
        key_prefix: impl Into<String>,
        channel_prefix: impl Into<String>,
    ) -> Self {
        self.relay_key_prefix = key_prefix.into();
        self.relay_channel_prefix = channel_prefix.into();
        self
    }

    /// Identity derived from the service name.
    #[must_use]
    pub fn identity(&self) -> ServiceIdentity {
        ServiceIdentity::new(self.service_name.clone())
    }

    /// Relay key naming derived from the configured prefixes.
    #[must_use]
    pub fn relay_keys(&self) -> RelayKeys {
        RelayKeys::new(self.relay_key_prefix.clone(), self.relay_channel_prefix.clone())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            service_name: "service".to_string(),
            exchange: SERVICE_EXCHANGE.to_string(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            relay_ttl: DEFAULT_RELAY_TTL,
            buffer_size: DEFAULT_BUFFER_SIZE,
            relay_key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            relay_channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
        }
    }
}
