//! Multicast change stream.
//!
//! Every subscriber receives its own copy of every published item:
//! broadcast, not a shared work queue. Each subscriber is backed by its own
//! bounded channel:
//!
//! - A full subscriber buffer backpressures the publisher rather than
//!   dropping items.
//! - Dropping one subscription only prunes that one outlet; siblings keep
//!   receiving.
//! - Dropping the [`Multicast`] itself closes every subscription.
//!
//! # Key Design
//!
//! The outlet list is held behind a `parking_lot` mutex, but sends happen
//! outside the lock (senders are cloned out first) so a slow subscriber
//! never holds up registration of new ones.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Debounce window consumers use to drain a subscription in batches before
/// re-deriving dependent views.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(333);

/// Per-subscriber buffer size. Generous: exhaustion means the subscriber
/// has fallen a long way behind, and the publisher waits for it.
const SUBSCRIBER_BUFFER: usize = 1024;

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct Outlet<T> {
    tx: mpsc::Sender<T>,
    predicate: Option<Predicate<T>>,
}

impl<T> Clone for Outlet<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

/// Fan-out point for a stream of values.
pub struct Multicast<T> {
    outlets: Mutex<Vec<Outlet<T>>>,
}

impl<T: Clone> Multicast<T> {
    pub fn new() -> Self {
        Self {
            outlets: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to every future published item.
    pub fn subscribe(&self) -> Subscription<T> {
        self.register(None)
    }

    /// Subscribe to future published items matching `predicate`.
    pub fn subscribe_where(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Subscription<T> {
        self.register(Some(Arc::new(predicate)))
    }

    fn register(&self, predicate: Option<Predicate<T>>) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.outlets.lock().push(Outlet { tx, predicate });
        Subscription { rx }
    }

    /// Deliver one item to every live matching subscriber.
    ///
    /// Suspends while any matching subscriber's buffer is full. Subscribers
    /// that have gone away are pruned; their departure never affects
    /// delivery to the rest.
    pub async fn publish(&self, item: &T) {
        let outlets: Vec<Outlet<T>> = self.outlets.lock().clone();

        for outlet in outlets {
            if let Some(predicate) = &outlet.predicate
                && !predicate(item)
            {
                continue;
            }
            // A send error just means the receiver was dropped
            let _ = outlet.tx.send(item.clone()).await;
        }

        self.outlets.lock().retain(|o| !o.tx.is_closed());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut outlets = self.outlets.lock();
        outlets.retain(|o| !o.tx.is_closed());
        outlets.len()
    }
}

impl<T: Clone> Default for Multicast<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's live view of a [`Multicast`] stream.
///
/// Dropping the subscription is a one-way signal: the publisher prunes the
/// outlet on its next publish and everything else carries on.
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// Receive the next item, or `None` once the upstream source is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Receive the next item without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next item, then keep draining for `window` so bursts
    /// arrive as one batch.
    ///
    /// Returns an empty batch only when the upstream source is gone.
    pub async fn recv_batch(&mut self, window: Duration) -> Vec<T> {
        let Some(first) = self.rx.recv().await else {
            return Vec::new();
        };
        let mut batch = vec![first];

        tokio::time::sleep(window).await;
        while let Ok(item) = self.rx.try_recv() {
            batch.push(item);
        }
        batch
    }
}
