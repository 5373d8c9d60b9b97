//! In-memory message broker.
//!
//! Models an exchange with queues bound by routing key:
//!
//! - every queue bound to a routing key receives a copy of each message
//! - subscribers sharing a queue take turns (round robin)
//! - a message published to a routing key with no bound queue is dropped
//!
//! Every publish is recorded for assertions, and publishing can be made to
//! fail on demand.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use courier_core::broker::{Binding, BrokerError, Delivery, DeliveryStream, MessageBroker, topic_name};
use courier_core::envelope::ServiceMessage;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Subscriber = mpsc::UnboundedSender<Result<Delivery, BrokerError>>;

/// A message recorded by [`InMemoryBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Exchange it was published to
    pub exchange: String,
    /// Routing key it was published with
    pub routing_key: String,
    /// Message key
    pub key: String,
    /// Raw body
    pub body: Vec<u8>,
}

impl PublishedMessage {
    /// Decode the body as an envelope.
    #[must_use]
    pub fn envelope(&self) -> Option<ServiceMessage> {
        ServiceMessage::from_json_slice(&self.body).ok()
    }
}

#[derive(Default)]
struct QueueGroup {
    subscribers: Vec<Subscriber>,
    next: usize,
}

impl QueueGroup {
    fn deliver(&mut self, delivery: Delivery) {
        self.subscribers.retain(|subscriber| !subscriber.is_closed());
        if self.subscribers.is_empty() {
            return;
        }
        let index = self.next % self.subscribers.len();
        self.next = self.next.wrapping_add(1);
        let _ = self.subscribers[index].send(Ok(delivery));
    }
}

#[derive(Default)]
struct BrokerState {
    // topic -> queue -> competing subscribers
    bindings: HashMap<String, HashMap<String, QueueGroup>>,
    published: Vec<PublishedMessage>,
    fail_publishes: bool,
}

/// In-memory [`MessageBroker`] for tests.
///
/// # Example
///
/// ```
/// use courier_core::broker::{Binding, MessageBroker};
/// use courier_testing::InMemoryBroker;
/// use futures::StreamExt;
///
/// # tokio_test::block_on(async {
/// let broker = InMemoryBroker::new();
/// let binding = Binding::new("service.exchange", "account.consumer.routing.key", "account.service.consumer");
/// let mut deliveries = broker.subscribe(&binding).await.unwrap();
///
/// broker
///     .publish("service.exchange", "account.consumer.routing.key", "id-1", b"{}")
///     .await
///     .unwrap();
///
/// let delivery = deliveries.next().await.unwrap().unwrap();
/// assert_eq!(delivery.body, b"{}");
/// assert_eq!(broker.published().len(), 1);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail (or succeed again).
    pub fn fail_publishes(&self, fail: bool) {
        self.state.lock().unwrap().fail_publishes = fail;
    }

    /// All messages published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().unwrap().published.clone()
    }

    /// Messages published with `routing_key`.
    #[must_use]
    pub fn published_to(&self, routing_key: &str) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|message| message.routing_key == routing_key)
            .cloned()
            .collect()
    }

    /// Number of live subscribers on `binding`'s queue.
    #[must_use]
    pub fn subscriber_count(&self, binding: &Binding) -> usize {
        self.state
            .lock()
            .unwrap()
            .bindings
            .get(&binding.topic())
            .and_then(|queues| queues.get(&binding.queue))
            .map_or(0, |group| {
                group.subscribers.iter().filter(|s| !s.is_closed()).count()
            })
    }

    fn route(&self, exchange: &str, routing_key: &str, key: &str, body: &[u8]) -> Result<(), BrokerError> {
        let topic = topic_name(exchange, routing_key);
        let mut state = self.state.lock().unwrap();
        if state.fail_publishes {
            return Err(BrokerError::PublishFailed {
                topic,
                reason: "publishing disabled".to_string(),
            });
        }

        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            key: key.to_string(),
            body: body.to_vec(),
        });

        if let Some(queues) = state.bindings.get_mut(&topic) {
            for group in queues.values_mut() {
                group.deliver(Delivery {
                    routing_key: routing_key.to_string(),
                    key: Some(key.to_string()),
                    body: body.to_vec(),
                });
            }
        }
        Ok(())
    }
}

impl MessageBroker for InMemoryBroker {
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        key: &str,
        body: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let result = self.route(exchange, routing_key, key, body);
        Box::pin(async move { result })
    }

    fn subscribe(
        &self,
        binding: &Binding,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BrokerError>> + Send + '_>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .unwrap()
            .bindings
            .entry(binding.topic())
            .or_default()
            .entry(binding.queue.clone())
            .or_default()
            .subscribers
            .push(tx);

        let stream: DeliveryStream = Box::pin(async_stream::stream! {
            while let Some(delivery) = rx.recv().await {
                yield delivery;
            }
        });
        Box::pin(async move { Ok(stream) })
    }
}
