//! Event fan-out and append-only logs
//!
//! Snapshots, alert notifications and execution completions are delivered to external
//! consumers (report generators, dashboards) through a [`Subscribers`] registry.
//!
//! Delivery is sequential and awaited, but every sink gets at most a grace period per
//! event. A sink that exceeds it, or whose receiving side is gone, is dropped and logged,
//! so one misbehaving consumer can never stall the monitor loop indefinitely.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::{trace, warn};

/// Identifier returned by `subscribe`, used to `unsubscribe`
pub type SubscriptionId = u64;

/// Something that accepts events of type `E`
#[async_trait]
pub trait EventSink<E>: Send + Sync {
    /// Deliver one event
    ///
    /// Returns `false` once the sink can no longer accept events; it is then removed.
    async fn deliver(&self, event: &E) -> bool;
}

#[async_trait]
impl<E> EventSink<E> for mpsc::Sender<E>
where
    E: Clone + Send + Sync + 'static,
{
    async fn deliver(&self, event: &E) -> bool {
        self.send(event.clone()).await.is_ok()
    }
}

/// Adapter turning a plain callback into a sink
///
/// The callback runs inline on the publishing task, so it must not block. Consumers doing
/// slow work should subscribe with a channel instead.
pub struct FnSink<F>(pub F);

#[async_trait]
impl<E, F> EventSink<E> for FnSink<F>
where
    E: Send + Sync + 'static,
    F: Fn(&E) + Send + Sync,
{
    async fn deliver(&self, event: &E) -> bool {
        (self.0)(event);
        true
    }
}

struct Subscriber<E> {
    id: SubscriptionId,
    sink: Arc<dyn EventSink<E>>,
}

impl<E> Clone for Subscriber<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sink: self.sink.clone(),
        }
    }
}

/// Registry of sinks for one event type
pub struct Subscribers<E> {
    label: &'static str,
    next_id: Arc<AtomicU64>,
    entries: Arc<RwLock<Vec<Subscriber<E>>>>,
}

impl<E> Clone for Subscribers<E> {
    fn clone(&self) -> Self {
        Self {
            label: self.label,
            next_id: self.next_id.clone(),
            entries: self.entries.clone(),
        }
    }
}

impl<E> Subscribers<E>
where
    E: Send + Sync + 'static,
{
    /// Create an empty registry; `label` names the event stream in logs
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            next_id: Arc::new(AtomicU64::new(1)),
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn subscribe(&self, sink: impl EventSink<E> + 'static) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().await.push(Subscriber {
            id,
            sink: Arc::new(sink),
        });
        trace!("{}: added subscriber {id}", self.label);
        id
    }

    /// Remove a subscriber; returns whether it was still registered
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|s| s.id != id);
        before != entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Deliver `event` to every subscriber in registration order
    ///
    /// Returns the number of sinks that accepted the event. Sinks that time out or report
    /// themselves closed are removed.
    pub async fn publish(&self, event: &E, grace: Duration) -> usize {
        let current: Vec<Subscriber<E>> = self.entries.read().await.clone();
        if current.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        let mut dropped = Vec::new();

        for subscriber in &current {
            match tokio::time::timeout(grace, subscriber.sink.deliver(event)).await {
                Ok(true) => delivered += 1,
                Ok(false) => {
                    trace!("{}: subscriber {} closed", self.label, subscriber.id);
                    dropped.push(subscriber.id);
                }
                Err(_) => {
                    warn!(
                        "{}: subscriber {} exceeded grace period of {grace:?}, dropping it",
                        self.label, subscriber.id
                    );
                    dropped.push(subscriber.id);
                }
            }
        }

        if !dropped.is_empty() {
            self.entries
                .write()
                .await
                .retain(|s| !dropped.contains(&s.id));
        }

        delivered
    }
}

/// Append-only record list guarded by a single writer lock
///
/// Readers always see a consistent prefix of the log.
#[derive(Debug)]
pub struct EventLog<T> {
    entries: Arc<RwLock<Vec<T>>>,
}

impl<T> Clone for EventLog<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T> Default for EventLog<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl<T: Clone> EventLog<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, entry: T) {
        self.entries.write().await.push(entry);
    }

    pub async fn extend(&self, entries: impl IntoIterator<Item = T>) {
        self.entries.write().await.extend(entries);
    }

    /// Copy of every entry recorded so far
    pub async fn snapshot(&self) -> Vec<T> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
