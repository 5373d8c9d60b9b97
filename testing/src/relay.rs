//! In-memory completion store.
//!
//! Mirrors the Redis store: replies are kept as JSON under a key with an
//! expiry, claims are get-and-delete, and notifications are broadcast to
//! current watchers only.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use courier_core::envelope::{CorrelationId, ServiceMessage};
use courier_core::relay::{CompletionStore, ParkedStream, RelayError, RelayFuture, RelayKeys};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

#[derive(Default)]
struct StoreState {
    entries: HashMap<String, (Vec<u8>, Instant)>,
    channels: HashMap<String, broadcast::Sender<()>>,
    watch_delay: Duration,
}

impl StoreState {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
    }

    fn drop_idle_channel(&mut self, channel: &str) {
        if self
            .channels
            .get(channel)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            self.channels.remove(channel);
        }
    }
}

/// One watcher's subscription. Unsubscribes when dropped.
struct Subscription {
    receiver: Option<broadcast::Receiver<()>>,
    channel: String,
    state: Arc<Mutex<StoreState>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        drop(self.receiver.take());
        if let Ok(mut state) = self.state.lock() {
            state.drop_idle_channel(&self.channel);
        }
    }
}

/// In-memory [`CompletionStore`] for tests.
///
/// Clones share state, so two clones stand in for one store reached from two
/// service instances.
#[derive(Clone, Default)]
pub struct InMemoryCompletionStore {
    keys: RelayKeys,
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryCompletionStore {
    /// Create an empty store with default key naming.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `watch` by `delay` before subscribing.
    ///
    /// Lets a test force a reply to be parked before its waiter subscribes.
    pub fn set_watch_delay(&self, delay: Duration) {
        self.state.lock().unwrap().watch_delay = delay;
    }

    /// Whether an unexpired reply is parked for `id`.
    #[must_use]
    pub fn contains(&self, id: &CorrelationId) -> bool {
        let key = self.keys.key(id);
        self.state
            .lock()
            .unwrap()
            .entries
            .get(&key)
            .is_some_and(|(_, expires_at)| *expires_at > Instant::now())
    }

    /// Number of unexpired parked replies.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .unwrap()
            .entries
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    /// Whether no unexpired reply is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of notification channels with at least one watcher.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.state.lock().unwrap().channels.len()
    }

    /// Number of stored entries, expired or not, since the last purge.
    #[must_use]
    pub fn stored_entries(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }
}

impl CompletionStore for InMemoryCompletionStore {
    fn park<'a>(
        &'a self,
        id: &'a CorrelationId,
        reply: &'a ServiceMessage,
        ttl: Duration,
    ) -> RelayFuture<'a, ()> {
        Box::pin(async move {
            let body = reply.to_json_vec().map_err(|e| RelayError::Codec(e.to_string()))?;
            let mut state = self.state.lock().unwrap();
            state.purge_expired();
            state
                .entries
                .insert(self.keys.key(id), (body, Instant::now() + ttl));
            if let Some(channel) = state.channels.get(&self.keys.channel(id)) {
                let _ = channel.send(());
            }
            Ok(())
        })
    }

    fn claim<'a>(&'a self, id: &'a CorrelationId) -> RelayFuture<'a, Option<ServiceMessage>> {
        Box::pin(async move {
            let entry = {
                let mut state = self.state.lock().unwrap();
                let entry = state.entries.remove(&self.keys.key(id));
                state.purge_expired();
                entry
            };
            match entry {
                Some((body, expires_at)) if expires_at > Instant::now() => ServiceMessage::from_json_slice(&body)
                    .map(Some)
                    .map_err(|e| RelayError::Codec(e.to_string())),
                _ => Ok(None),
            }
        })
    }

    fn watch<'a>(&'a self, id: &'a CorrelationId) -> RelayFuture<'a, ParkedStream> {
        Box::pin(async move {
            let delay = self.state.lock().unwrap().watch_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let channel = self.keys.channel(id);
            let receiver = self
                .state
                .lock()
                .unwrap()
                .channels
                .entry(channel.clone())
                .or_insert_with(|| broadcast::channel(16).0)
                .subscribe();
            let mut subscription = Subscription {
                receiver: Some(receiver),
                channel,
                state: Arc::clone(&self.state),
            };

            let stream: ParkedStream = Box::pin(async_stream::stream! {
                while let Some(receiver) = subscription.receiver.as_mut() {
                    match receiver.recv().await {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => yield (),
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            Ok(stream)
        })
    }

    fn release<'a>(&'a self, id: &'a CorrelationId) -> RelayFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.entries.remove(&self.keys.key(id));
            state.purge_expired();
            state.drop_idle_channel(&self.keys.channel(id));
            Ok(())
        })
    }
}
