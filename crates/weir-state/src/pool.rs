//! Relay pool port.
//!
//! The wire-level relay client (connection pooling, subscription
//! management, WebSocket transport) is an external collaborator. This
//! module defines the interface the state layer consumes and an in-memory
//! implementation used by tests; it does not reimplement the transport.

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use weir_core::{Event, NoteKind};

/// Errors surfaced by the relay pool collaborator.
#[derive(Error, Debug)]
pub enum PoolError {
    /// A subscription with this id already exists; use
    /// [`RelayPool::update_subscription`] instead.
    #[error("subscription '{0}' already exists")]
    SubscriptionExists(String),

    /// No subscription with this id.
    #[error("no subscription named '{0}'")]
    UnknownSubscription(String),

    /// A single relay refused a connection-pool operation.
    #[error("relay '{url}' rejected: {reason}")]
    Relay { url: String, reason: String },

    /// Broadcasting a locally produced event failed everywhere.
    #[error("event broadcast failed: {0}")]
    Send(String),
}

/// Subscription filter, matched against events relay-side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Match these event ids.
    pub ids: Option<Vec<String>>,
    /// Match these author keys (hex).
    pub authors: Option<Vec<String>>,
    /// Match these kinds.
    pub kinds: Option<Vec<NoteKind>>,
    /// Match events with `created_at >= since`.
    pub since: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = String>) -> Self {
        self.authors = Some(authors.into_iter().collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = NoteKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    /// Whether an event passes every populated clause.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids
            && !ids.contains(&event.id)
        {
            return false;
        }
        if let Some(authors) = &self.authors
            && !authors.contains(&event.pubkey)
        {
            return false;
        }
        if let Some(kinds) = &self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }
        if let Some(since) = self.since
            && event.created_at < since
        {
            return false;
        }
        true
    }
}

/// An event together with the relay it arrived from.
#[derive(Debug, Clone)]
pub struct RelayedEvent {
    pub event: Event,
    pub relay_url: String,
}

/// Connection pool and subscription surface of the relay transport.
///
/// Sends are best-effort broadcasts across the pool; subscription streams
/// deliver `{event, relay_url}` pairs with no cross-relay ordering
/// guarantee.
#[async_trait]
pub trait RelayPool: Send + Sync {
    /// Open a named filtered stream across the pool.
    ///
    /// # Errors
    ///
    /// Fails with [`PoolError::SubscriptionExists`] if `id` is taken;
    /// callers then use [`Self::update_subscription`].
    async fn subscribe(
        &self,
        id: &str,
        filter: Filter,
    ) -> Result<mpsc::Receiver<RelayedEvent>, PoolError>;

    /// Replace the filter of an existing subscription, keeping its stream.
    async fn update_subscription(&self, id: &str, filter: Filter) -> Result<(), PoolError>;

    /// Broadcast a locally produced signed event to all connected relays.
    async fn send_event(&self, event: &Event) -> Result<(), PoolError>;

    /// Add a relay to the pool and connect.
    async fn add_relay(&self, url: &str) -> Result<(), PoolError>;

    /// Disconnect and remove a relay from the pool.
    async fn remove_relay(&self, url: &str) -> Result<(), PoolError>;

    /// Currently configured relay URLs.
    async fn relays(&self) -> Vec<String>;
}

/// Buffer size for in-memory subscription streams.
const MEMORY_SUB_BUFFER: usize = 256;

struct MemorySub {
    filter: Filter,
    tx: mpsc::Sender<RelayedEvent>,
}

/// In-memory relay pool for tests.
///
/// Records sent events, tracks pool membership, and lets a test inject
/// "remote" events with [`MemoryPool::deliver`]. Individual URLs can be
/// made to fail pool operations to exercise per-URL error paths.
#[derive(Default)]
pub struct MemoryPool {
    relays: Mutex<BTreeSet<String>>,
    subs: Mutex<HashMap<String, MemorySub>>,
    sent: Mutex<Vec<Event>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make pool operations on this URL fail from now on.
    pub fn fail_url(&self, url: &str) {
        self.failing.lock().insert(url.to_string());
    }

    /// Events broadcast through [`RelayPool::send_event`], oldest first.
    pub fn sent_events(&self) -> Vec<Event> {
        self.sent.lock().clone()
    }

    /// Drop every subscription, ending each subscriber's stream.
    pub fn close_all(&self) {
        self.subs.lock().clear();
    }

    /// Inject an event as if it arrived from `relay_url`, delivering it to
    /// every matching subscription.
    pub async fn deliver(&self, relay_url: &str, event: Event) {
        let matching: Vec<mpsc::Sender<RelayedEvent>> = self
            .subs
            .lock()
            .values()
            .filter(|sub| sub.filter.matches(&event))
            .map(|sub| sub.tx.clone())
            .collect();

        for tx in matching {
            let _ = tx
                .send(RelayedEvent {
                    event: event.clone(),
                    relay_url: relay_url.to_string(),
                })
                .await;
        }
    }

    fn check_url(&self, url: &str) -> Result<(), PoolError> {
        if self.failing.lock().contains(url) {
            return Err(PoolError::Relay {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RelayPool for MemoryPool {
    async fn subscribe(
        &self,
        id: &str,
        filter: Filter,
    ) -> Result<mpsc::Receiver<RelayedEvent>, PoolError> {
        let mut subs = self.subs.lock();
        if subs.contains_key(id) {
            return Err(PoolError::SubscriptionExists(id.to_string()));
        }
        let (tx, rx) = mpsc::channel(MEMORY_SUB_BUFFER);
        subs.insert(id.to_string(), MemorySub { filter, tx });
        Ok(rx)
    }

    async fn update_subscription(&self, id: &str, filter: Filter) -> Result<(), PoolError> {
        let mut subs = self.subs.lock();
        match subs.get_mut(id) {
            Some(sub) => {
                sub.filter = filter;
                Ok(())
            }
            None => Err(PoolError::UnknownSubscription(id.to_string())),
        }
    }

    async fn send_event(&self, event: &Event) -> Result<(), PoolError> {
        self.sent.lock().push(event.clone());
        Ok(())
    }

    async fn add_relay(&self, url: &str) -> Result<(), PoolError> {
        self.check_url(url)?;
        self.relays.lock().insert(url.to_string());
        Ok(())
    }

    async fn remove_relay(&self, url: &str) -> Result<(), PoolError> {
        self.check_url(url)?;
        self.relays.lock().remove(url);
        Ok(())
    }

    async fn relays(&self) -> Vec<String> {
        self.relays.lock().iter().cloned().collect()
    }
}
