//! Correlation registry: in-flight requests awaiting a reply.
//!
//! Every outbound request is registered here *before* it is published, so a
//! reply can never arrive ahead of its entry. The reply listener completes
//! entries; the caller awaits a [`PendingReply`].
//!
//! # Resolution
//!
//! Each entry resolves at most once. [`CorrelationRegistry::complete`] and
//! [`CorrelationRegistry::fail`] remove the entry from the map and then fulfil
//! it, so of two racing completions exactly one observes the entry; the other
//! returns `false` and changes nothing.
//!
//! # Cleanup
//!
//! [`PendingReply`] removes its entry when dropped. Success, failure, timeout
//! and caller cancellation all go through that drop, so no exit path leaks an
//! entry.

use crate::metrics::BridgeMetrics;
use chrono::{DateTime, Utc};
use courier_core::envelope::{CorrelationId, ServiceMessage};
use courier_core::error::{BridgeError, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type Completion = oneshot::Sender<Result<ServiceMessage>>;

/// A registered request awaiting its reply.
#[derive(Debug)]
struct PendingRequest {
    completion: Completion,
    created_at: DateTime<Utc>,
}

/// Concurrent map of in-flight correlation ids.
///
/// Construct one per process and share it via `Arc` between the dispatcher
/// and the reply listener.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    pending: DashMap<CorrelationId, PendingRequest>,
    closed: AtomicBool,
}

impl CorrelationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the guard that yields its outcome.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::DuplicateCorrelation`] if `id` is already in flight
    /// - [`BridgeError::ShuttingDown`] after [`shutdown`](Self::shutdown)
    pub fn register(self: &Arc<Self>, id: CorrelationId) -> Result<PendingReply> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::ShuttingDown);
        }

        let (completion, receiver) = oneshot::channel();
        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => return Err(BridgeError::DuplicateCorrelation(id)),
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    completion,
                    created_at: Utc::now(),
                });
            }
        }

        // A shutdown that drained the map between the check and the insert
        // would otherwise leave this entry behind.
        if self.closed.load(Ordering::Acquire) {
            self.pending.remove(&id);
            return Err(BridgeError::ShuttingDown);
        }

        BridgeMetrics::record_pending(self.pending.len());

        Ok(PendingReply {
            id,
            registry: Arc::clone(self),
            receiver,
        })
    }

    /// Resolve `id` with `reply`.
    ///
    /// Returns `false` if no entry for `id` is in flight (already resolved,
    /// timed out, or never registered here).
    pub fn complete(&self, id: &CorrelationId, reply: ServiceMessage) -> bool {
        self.resolve(id, Ok(reply))
    }

    /// Resolve `id` with `error`.
    ///
    /// Returns `false` if no entry for `id` is in flight.
    pub fn fail(&self, id: &CorrelationId, error: BridgeError) -> bool {
        self.resolve(id, Err(error))
    }

    fn resolve(&self, id: &CorrelationId, outcome: Result<ServiceMessage>) -> bool {
        let Some((_, pending)) = self.pending.remove(id) else {
            return false;
        };
        BridgeMetrics::record_pending(self.pending.len());
        // A dropped receiver means the caller went away after we removed the entry.
        pending.completion.send(outcome).is_ok()
    }

    /// Whether `id` is in flight.
    #[must_use]
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of in-flight requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no request is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fail every in-flight request with [`BridgeError::ShuttingDown`] and
    /// refuse further registrations.
    ///
    /// Returns the number of requests that were failed.
    pub fn shutdown(&self) -> usize {
        self.closed.store(true, Ordering::Release);

        let ids: Vec<CorrelationId> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((id, pending)) = self.pending.remove(&id) {
                let age_ms = (Utc::now() - pending.created_at).num_milliseconds();
                tracing::debug!(correlation_id = %id, age_ms, "Failing pending request on shutdown");
                let _ = pending.completion.send(Err(BridgeError::ShuttingDown));
                failed += 1;
            }
        }

        BridgeMetrics::record_pending(0);
        tracing::info!(failed, "Correlation registry shut down");
        failed
    }

    fn retire(&self, id: &CorrelationId) {
        if self.pending.remove(id).is_some() {
            BridgeMetrics::record_pending(self.pending.len());
        }
    }
}

/// Guard for a registered request; resolves to the request's outcome.
///
/// Dropping the guard retires the registry entry.
#[derive(Debug)]
pub struct PendingReply {
    id: CorrelationId,
    registry: Arc<CorrelationRegistry>,
    receiver: oneshot::Receiver<Result<ServiceMessage>>,
}

impl PendingReply {
    /// Correlation id this guard waits on.
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.id
    }
}

impl Future for PendingReply {
    type Output = Result<ServiceMessage>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(BridgeError::ShuttingDown)))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.registry.retire(&self.id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn reply(id: &CorrelationId, value: serde_json::Value) -> ServiceMessage {
        ServiceMessage::builder(id.clone())
            .sender_service("account")
            .payload(value)
            .build()
    }

    #[tokio::test]
    async fn complete_resolves_the_waiter() {
        let registry = Arc::new(CorrelationRegistry::new());
        let id = CorrelationId::new();
        let pending = registry.register(id.clone()).unwrap();

        assert!(registry.contains(&id));
        assert!(registry.complete(&id, reply(&id, json!({ "ok": true }))));

        let received = pending.await.unwrap();
        assert_eq!(received.payload(), Some(&json!({ "ok": true })));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn second_completion_is_a_no_op() {
        let registry = Arc::new(CorrelationRegistry::new());
        let id = CorrelationId::new();
        let pending = registry.register(id.clone()).unwrap();

        assert!(registry.complete(&id, reply(&id, json!(1))));
        assert!(!registry.complete(&id, reply(&id, json!(2))));
        assert!(!registry.fail(&id, BridgeError::ShuttingDown));

        assert_eq!(pending.await.unwrap().payload(), Some(&json!(1)));
    }

    #[tokio::test]
    async fn fail_delivers_the_error() {
        let registry = Arc::new(CorrelationRegistry::new());
        let id = CorrelationId::new();
        let pending = registry.register(id.clone()).unwrap();

        assert!(registry.fail(&id, BridgeError::Transport("down".into())));
        assert_eq!(pending.await.unwrap_err(), BridgeError::Transport("down".into()));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = Arc::new(CorrelationRegistry::new());
        let id = CorrelationId::from("same");
        let _pending = registry.register(id.clone()).unwrap();

        let err = registry.register(id.clone()).unwrap_err();
        assert_eq!(err, BridgeError::DuplicateCorrelation(id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropping_the_guard_retires_the_entry() {
        let registry = Arc::new(CorrelationRegistry::new());
        let id = CorrelationId::new();
        let pending = registry.register(id.clone()).unwrap();
        assert_eq!(registry.len(), 1);

        drop(pending);

        assert!(!registry.contains(&id));
        assert!(!registry.complete(&id, reply(&id, json!(null))));
    }

    #[tokio::test]
    async fn shutdown_fails_everything_and_refuses_new_work() {
        let registry = Arc::new(CorrelationRegistry::new());
        let first = registry.register(CorrelationId::new()).unwrap();
        let second = registry.register(CorrelationId::new()).unwrap();

        assert!(!registry.is_closed());
        assert_eq!(registry.shutdown(), 2);
        assert!(registry.is_closed());

        assert_eq!(first.await.unwrap_err(), BridgeError::ShuttingDown);
        assert_eq!(second.await.unwrap_err(), BridgeError::ShuttingDown);
        assert_eq!(
            registry.register(CorrelationId::new()).unwrap_err(),
            BridgeError::ShuttingDown
        );
    }

    #[tokio::test]
    async fn concurrent_completions_resolve_exactly_once() {
        let registry = Arc::new(CorrelationRegistry::new());
        let id = CorrelationId::new();
        let pending = registry.register(id.clone()).unwrap();

        let mut tasks = Vec::new();
        for n in 0..16 {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                registry.complete(&id, reply(&id, json!(n)))
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert!(pending.await.is_ok());
    }

    proptest! {
        #[test]
        fn first_resolution_is_the_one_delivered(attempts in prop::collection::vec(any::<bool>(), 1..12)) {
            let registry = Arc::new(CorrelationRegistry::new());
            let id = CorrelationId::new();
            let pending = registry.register(id.clone()).unwrap();

            let accepted: Vec<bool> = attempts
                .iter()
                .enumerate()
                .map(|(n, succeed)| {
                    if *succeed {
                        registry.complete(&id, reply(&id, json!(n)))
                    } else {
                        registry.fail(&id, BridgeError::Transport(n.to_string()))
                    }
                })
                .collect();

            prop_assert!(accepted[0]);
            prop_assert_eq!(accepted.iter().filter(|a| **a).count(), 1);
            prop_assert!(registry.is_empty());

            let outcome = futures::executor::block_on(pending);
            if attempts[0] {
                let delivered = outcome.unwrap();
                prop_assert_eq!(delivered.payload().cloned(), Some(json!(0)));
            } else {
                prop_assert_eq!(outcome.unwrap_err(), BridgeError::Transport("0".to_string()));
            }
        }
    }
}
