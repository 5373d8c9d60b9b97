//! Reply listener: routes replies from the shared reply queue to waiters.
//!
//! One long-lived task per process consumes `<service>.listener.routing.key`
//! from the queue `<service>.service.listener`. All instances of a service
//! share that queue, so a reply may land on any of them:
//!
//! - a local waiter exists: it is completed in place
//! - no local waiter, relay configured: the reply is parked for the instance
//!   that is waiting
//! - no local waiter, no relay: the reply is late (timed out) or foreign and
//!   is dropped
//!
//! Malformed messages and broker stream errors are logged and skipped; the
//! task only stops on shutdown or when the broker ends the stream.

use crate::config::BridgeConfig;
use crate::metrics::BridgeMetrics;
use crate::registry::CorrelationRegistry;
use courier_core::broker::{Delivery, DeliveryStream, MessageBroker};
use courier_core::envelope::ServiceMessage;
use courier_core::error::Result;
use courier_core::relay::CompletionStore;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Handle to a running background consumer.
///
/// Dropping the handle leaves the task running; call
/// [`shutdown`](Self::shutdown) to stop it.
#[derive(Debug)]
pub struct ListenerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub(crate) fn spawn<F>(run: impl FnOnce(oneshot::Receiver<()>) -> F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let (shutdown, signal) = oneshot::channel();
        let task = tokio::spawn(run(signal));
        Self { shutdown, task }
    }

    /// Whether the task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the task to stop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Listener task panicked");
        }
    }
}

/// Consumer of this service's reply queue.
pub struct ReplyListener {
    broker: Arc<dyn MessageBroker>,
    registry: Arc<CorrelationRegistry>,
    store: Option<Arc<dyn CompletionStore>>,
    config: BridgeConfig,
}

impl ReplyListener {
    /// Create a listener completing entries in `registry`.
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

    /// Park replies with no local waiter in `store`.
    #[must_use]
    pub fn with_completion_store(mut self, store: Arc<dyn CompletionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Subscribe to the reply queue and start consuming in the background.
    ///
    /// The subscription is established before this returns, so replies
    /// published afterwards are observed.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`](courier_core::error::BridgeError::Transport)
    /// if the subscription fails.
    pub async fn spawn(self) -> Result<ListenerHandle> {
        let binding = self.config.identity().reply_binding(&self.config.exchange);
        let stream = self.broker.subscribe(&binding).await?;

        tracing::info!(
            service = %self.config.service_name,
            routing_key = %binding.routing_key,
            queue = %binding.queue,
            "Reply listener started"
        );

        Ok(ListenerHandle::spawn(move |signal| self.run(stream, signal)))
    }

    async fn run(self, mut stream: DeliveryStream, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(service = %self.config.service_name, "Reply listener stopping");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(delivery)) => self.on_delivery(delivery),
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Reply stream error");
                    }
                    None => {
                        tracing::warn!(service = %self.config.service_name, "Reply stream ended");
                        break;
                    }
                },
            }
        }
    }

    fn on_delivery(&self, delivery: Delivery) {
        let reply = match ServiceMessage::from_json_slice(&delivery.body) {
            Ok(reply) => reply,
            Err(e) => {
                BridgeMetrics::record_malformed();
                tracing::warn!(
                    routing_key = %delivery.routing_key,
                    key = ?delivery.key,
                    error = %e,
                    "Dropping malformed reply"
                );
                return;
            }
        };

        let correlation_id = reply.correlation_id().clone();
        if self.registry.complete(&correlation_id, reply.clone()) {
            tracing::debug!(
                correlation_id = %correlation_id,
                sender = %reply.sender_service(),
                "Reply delivered"
            );
            return;
        }

        let Some(store) = self.store.clone() else {
            tracing::debug!(
                correlation_id = %correlation_id,
                sender = %reply.sender_service(),
                "No waiter for reply, dropping"
            );
            return;
        };

        let ttl = self.config.relay_ttl;
        tokio::spawn(async move {
            match store.park(&correlation_id, &reply, ttl).await {
                Ok(()) => {
                    BridgeMetrics::record_parked();
                    tracing::debug!(correlation_id = %correlation_id, "Reply parked for relay");
                }
                Err(e) => {
                    tracing::error!(
                        correlation_id = %correlation_id,
                        error = %e,
                        "Failed to park reply"
                    );
                }
            }
        });
    }
}
