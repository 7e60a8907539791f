//! On-demand syncers.
//!
//! Thin coordination between the views and the relay pool: when a view
//! encounters a pubkey without a profile or a reference to an event it
//! does not hold, it asks a syncer, which widens a pool subscription and
//! feeds whatever comes back into the event store. Requests are
//! fire-and-forget; the store's own de-duplication absorbs overlap, and
//! nothing here ever blocks waiting on a relay to answer.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use weir_core::{NoteKind, PublicKey};

use crate::error::Result;
use crate::pool::{Filter, PoolError, RelayPool, RelayedEvent};
use crate::store::EventStore;

const PROFILE_SUB: &str = "profile-sync";
const EVENT_SUB: &str = "event-sync";

/// Requests profile (kind-0) events for peers we have traffic with but no
/// metadata for.
pub struct ProfileSyncer {
    pool: Arc<dyn RelayPool>,
    store: Arc<EventStore>,
    requested: Mutex<HashSet<PublicKey>>,
}

impl ProfileSyncer {
    pub fn new(pool: Arc<dyn RelayPool>, store: Arc<EventStore>) -> Self {
        Self {
            pool,
            store,
            requested: Mutex::new(HashSet::new()),
        }
    }

    /// Request profiles for the given peers.
    ///
    /// Already-requested keys are dropped; if nothing new remains, no
    /// relay traffic happens at all. Otherwise the shared subscription is
    /// (re)issued to cover every requested author.
    pub async fn add(&self, peers: impl IntoIterator<Item = PublicKey>) -> Result<()> {
        let added = {
            let mut requested = self.requested.lock();
            let before = requested.len();
            requested.extend(peers);
            requested.len() > before
        };
        if !added {
            debug!("profile sync request fully deduplicated");
            return Ok(());
        }

        let authors: Vec<String> = self.requested.lock().iter().map(PublicKey::to_hex).collect();
        let filter = Filter::new().kinds([NoteKind::Metadata]).authors(authors);
        resubscribe(&*self.pool, &self.store, PROFILE_SUB, filter).await
    }
}

/// Requests specific events by id (reply parents, pinned references).
pub struct EventSyncer {
    pool: Arc<dyn RelayPool>,
    store: Arc<EventStore>,
    requested: Mutex<HashSet<String>>,
}

impl EventSyncer {
    pub fn new(pool: Arc<dyn RelayPool>, store: Arc<EventStore>) -> Self {
        Self {
            pool,
            store,
            requested: Mutex::new(HashSet::new()),
        }
    }

    /// Request events by id, skipping ids already requested or already in
    /// the store.
    pub async fn add(&self, ids: impl IntoIterator<Item = String>) -> Result<()> {
        let added = {
            let mut requested = self.requested.lock();
            let before = requested.len();
            for id in ids {
                if self.store.get_event(&id)?.is_some() {
                    continue;
                }
                requested.insert(id);
            }
            requested.len() > before
        };
        if !added {
            debug!("event sync request fully deduplicated");
            return Ok(());
        }

        let ids: Vec<String> = self.requested.lock().iter().cloned().collect();
        let filter = Filter::new().ids(ids);
        resubscribe(&*self.pool, &self.store, EVENT_SUB, filter).await
    }
}

/// Issue or widen a named subscription and keep draining it into the
/// store in the background.
async fn resubscribe(
    pool: &dyn RelayPool,
    store: &Arc<EventStore>,
    sub_id: &str,
    filter: Filter,
) -> Result<()> {
    match pool.subscribe(sub_id, filter.clone()).await {
        Ok(rx) => {
            spawn_drain(Arc::clone(store), rx);
            Ok(())
        }
        Err(PoolError::SubscriptionExists(_)) => {
            // Stream already running; widening the filter is enough
            pool.update_subscription(sub_id, filter).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn spawn_drain(store: Arc<EventStore>, mut rx: mpsc::Receiver<RelayedEvent>) {
    tokio::spawn(async move {
        while let Some(relayed) = rx.recv().await {
            if let Err(e) = store.add_event(relayed.event).await {
                warn!(relay = %relayed.relay_url, error = %e, "failed to store synced event");
            }
        }
        debug!("sync drain stream closed");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::MemoryPool;
    use weir_core::{EventTemplate, MemorySigner, Signer};

    fn profile_event(author: &MemorySigner, name: &str) -> weir_core::Event {
        let content = format!(r#"{{"name":"{name}"}}"#);
        author
            .sign(EventTemplate::new(
                author.public_key(),
                NoteKind::Metadata,
                content,
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_profile_syncer_feeds_store() {
        let me = Arc::new(MemorySigner::from_seed(1));
        let peer = MemorySigner::from_seed(2);
        let pool = Arc::new(MemoryPool::new());
        let store = Arc::new(EventStore::open_in_memory(me).unwrap());
        let mut changes = store.subscribe();

        let syncer = ProfileSyncer::new(pool.clone(), store.clone());
        syncer.add([peer.public_key()]).await.unwrap();
        tokio::task::yield_now().await;

        let event = profile_event(&peer, "peer");
        pool.deliver("wss://relay.example", event.clone()).await;

        let arrived = tokio::time::timeout(std::time::Duration::from_secs(1), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(arrived.event.id, event.id);
        assert!(store.get_event(&event.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_profile_syncer_deduplicates() {
        let me = Arc::new(MemorySigner::from_seed(1));
        let peer = MemorySigner::from_seed(2).public_key();
        let pool = Arc::new(MemoryPool::new());
        let store = Arc::new(EventStore::open_in_memory(me).unwrap());

        let syncer = ProfileSyncer::new(pool.clone(), store.clone());
        syncer.add([peer]).await.unwrap();
        // Same key again: no new subscription, no error
        syncer.add([peer]).await.unwrap();

        // A genuinely new key widens the existing subscription
        let another = MemorySigner::from_seed(3).public_key();
        syncer.add([another]).await.unwrap();
    }

    #[tokio::test]
    async fn test_event_syncer_skips_known_events() {
        let me = Arc::new(MemorySigner::from_seed(1));
        let peer = MemorySigner::from_seed(2);
        let pool = Arc::new(MemoryPool::new());
        let store = Arc::new(EventStore::open_in_memory(me).unwrap());

        let known = profile_event(&peer, "known");
        store.add_event(known.clone()).await.unwrap();

        let syncer = EventSyncer::new(pool.clone(), store.clone());
        // Only already-stored ids: fully deduplicated, no subscription
        syncer.add([known.id.clone()]).await.unwrap();
        syncer.add([known.id.clone()]).await.unwrap();

        // A missing id triggers the subscription and gets drained in
        let missing = profile_event(&peer, "missing");
        syncer.add([missing.id.clone()]).await.unwrap();
        tokio::task::yield_now().await;

        let mut changes = store.subscribe();
        pool.deliver("wss://relay.example", missing.clone()).await;
        let arrived = tokio::time::timeout(std::time::Duration::from_secs(1), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(arrived.event.id, missing.id);
    }
}
