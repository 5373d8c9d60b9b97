//! Service identity and routing names.
//!
//! Every routing key and queue name in the fleet derives from a service name:
//!
//! | Purpose                  | Name                              |
//! |--------------------------|-----------------------------------|
//! | requests to `account`    | `account.consumer.routing.key`    |
//! | queue for those requests | `account.service.consumer`        |
//! | replies to `account`     | `account.listener.routing.key`    |
//! | queue for those replies  | `account.service.listener`        |

use crate::broker::Binding;

/// Exchange carrying service-to-service requests and replies.
pub const SERVICE_EXCHANGE: &str = "service.exchange";

/// Exchange carrying gateway API traffic.
pub const API_EXCHANGE: &str = "api.exchange";

/// Reply queue consumed by the API gateway.
pub const GATEWAY_QUEUE: &str = "gateway.queue";

/// Routing key for requests addressed to `service`.
#[must_use]
pub fn consumer_routing_key(service: &str) -> String {
    format!("{service}.consumer.routing.key")
}

/// Routing key for replies addressed to `service`.
#[must_use]
pub fn listener_routing_key(service: &str) -> String {
    format!("{service}.listener.routing.key")
}

/// Identity of the current service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    service_name: String,
}

impl ServiceIdentity {
    /// Create an identity for `service_name`.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// The service name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Routing key other services publish replies to.
    #[must_use]
    pub fn response_routing_key(&self) -> String {
        listener_routing_key(&self.service_name)
    }

    /// Queue this service consumes replies from.
    #[must_use]
    pub fn response_queue_name(&self) -> String {
        format!("{}.service.listener", self.service_name)
    }

    /// Routing key other services publish requests to.
    #[must_use]
    pub fn request_routing_key(&self) -> String {
        consumer_routing_key(&self.service_name)
    }

    /// Queue this service consumes requests from.
    #[must_use]
    pub fn request_queue_name(&self) -> String {
        format!("{}.service.consumer", self.service_name)
    }

    /// Binding for the reply queue on `exchange`.
    #[must_use]
    pub fn reply_binding(&self, exchange: &str) -> Binding {
        Binding::new(exchange, self.response_routing_key(), self.response_queue_name())
    }

    /// Binding for the request queue on `exchange`.
    #[must_use]
    pub fn request_binding(&self, exchange: &str) -> Binding {
        Binding::new(exchange, self.request_routing_key(), self.request_queue_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_names_derive_from_service_name() {
        let identity = ServiceIdentity::new("account");

        assert_eq!(identity.response_routing_key(), "account.listener.routing.key");
        assert_eq!(identity.response_queue_name(), "account.service.listener");
        assert_eq!(identity.request_routing_key(), "account.consumer.routing.key");
        assert_eq!(identity.request_queue_name(), "account.service.consumer");
        assert_eq!(consumer_routing_key("auth"), "auth.consumer.routing.key");
    }

    #[test]
    fn bindings_pair_routing_key_with_queue() {
        let binding = ServiceIdentity::new("gateway").reply_binding(SERVICE_EXCHANGE);
        assert_eq!(binding.exchange, "service.exchange");
        assert_eq!(binding.routing_key, "gateway.listener.routing.key");
        assert_eq!(binding.queue, "gateway.service.listener");
    }
}
