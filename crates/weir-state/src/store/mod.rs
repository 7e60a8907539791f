//! Local event store.
//!
//! The store owns the durable append-only event table, performs idempotent
//! insertion, classifies and (for private kinds) decrypts events once, and
//! fans out every accepted event to any number of independent subscribers.
//!
//! # Architecture
//!
//! ```text
//! [relay transport] → add_event → [EventDb]   (durable, id-keyed)
//!                          │
//!                          ├→ [cache]         (ParsedEvent by id)
//!                          │
//!                          └→ [Multicast] ──→ conversation folding
//!                                        ──→ config reconciliation
//!                                        ──→ ... any subscriber
//! ```
//!
//! Decryption failures tombstone the one affected event (dropped and
//! removed from the durable table); they never abort a batch or close the
//! change stream. Persistence failures are fatal to the `add_event` call
//! and propagate to the caller.

mod db;
mod multicast;

pub use db::EventDb;
pub use multicast::{DEBOUNCE_WINDOW, Multicast, Subscription};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use weir_core::{Event, LamportClock, NoteKind, ParsedEvent, PublicKey, Signer};

use crate::error::Result;

/// Outcome of classifying one incoming event.
enum Classified {
    Ok(ParsedEvent),
    /// Malformed input (e.g. garbage author key): skip, keep going.
    Invalid(weir_core::Error),
    /// Private-kind event this account cannot decrypt: tombstone.
    Undecryptable(weir_core::Error),
}

/// Deduplicating, classifying event store with a multicast change stream.
pub struct EventStore {
    db: EventDb,
    cache: RwLock<HashMap<String, ParsedEvent>>,
    fanout: Multicast<ParsedEvent>,
    signer: Arc<dyn Signer>,
    clock: Arc<LamportClock>,
}

impl EventStore {
    /// Open a store at the given path, rebuilding the in-memory cache and
    /// reseeding the logical clock from stored history.
    pub fn open<P: AsRef<Path>>(path: P, signer: Arc<dyn Signer>) -> Result<Self> {
        Self::from_db(EventDb::open(path)?, signer)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory(signer: Arc<dyn Signer>) -> Result<Self> {
        Self::from_db(EventDb::open_in_memory()?, signer)
    }

    fn from_db(db: EventDb, signer: Arc<dyn Signer>) -> Result<Self> {
        let history = db.load_all()?;
        let clock = Arc::new(LamportClock::from_events(&history));

        let store = Self {
            db,
            cache: RwLock::new(HashMap::with_capacity(history.len())),
            fanout: Multicast::new(),
            signer,
            clock,
        };

        let mut loaded = 0usize;
        for event in history {
            let id = event.id.clone();
            match store.classify(event) {
                Classified::Ok(parsed) => {
                    store.cache.write().insert(id, parsed);
                    loaded += 1;
                }
                Classified::Invalid(e) => {
                    warn!(id = %id, error = %e, "dropping malformed stored event");
                    store.db.delete(&id)?;
                }
                Classified::Undecryptable(e) => {
                    // Key changed underneath us (shared-device account switch)
                    warn!(id = %id, error = %e, "tombstoning undecryptable stored event");
                    store.db.delete(&id)?;
                }
            }
        }
        info!(events = loaded, lamport = store.clock.peek(), "event store loaded");

        Ok(store)
    }

    /// The logical clock, seeded from stored history.
    pub fn clock(&self) -> Arc<LamportClock> {
        Arc::clone(&self.clock)
    }

    /// The identity this store decrypts for.
    pub fn public_key(&self) -> PublicKey {
        self.signer.public_key()
    }

    /// Insert one event.
    ///
    /// Idempotent: an event whose id is already stored is a no-op and is
    /// not re-published. On acceptance the parsed event is handed to every
    /// live subscriber and returned.
    ///
    /// # Errors
    ///
    /// Only persistence failures surface here. Malformed and undecryptable
    /// events are resolved locally (skipped or tombstoned) and yield
    /// `Ok(None)`.
    pub async fn add_event(&self, event: Event) -> Result<Option<ParsedEvent>> {
        let id = event.id.clone();

        if self.cache.read().contains_key(&id) {
            debug!(id = %id, "duplicate event ignored");
            return Ok(None);
        }

        let parsed = match self.classify(event) {
            Classified::Ok(parsed) => parsed,
            Classified::Invalid(e) => {
                warn!(id = %id, error = %e, "ignoring malformed event");
                return Ok(None);
            }
            Classified::Undecryptable(e) => {
                warn!(id = %id, error = %e, "tombstoning undecryptable event");
                self.db.delete(&id)?;
                return Ok(None);
            }
        };

        // The primary key is the authoritative duplicate check; the cache
        // lookup above is only the fast path.
        if !self.db.insert(&parsed.event)? {
            debug!(id = %id, "duplicate event ignored (durable)");
            return Ok(None);
        }

        if let Some(time) = parsed.tags.lamport {
            self.clock.observe(time);
        }

        if parsed.event.kind == NoteKind::Deletion {
            self.apply_deletion(&parsed)?;
        }

        self.cache.write().insert(id, parsed.clone());
        self.fanout.publish(&parsed).await;
        Ok(Some(parsed))
    }

    /// Point lookup by id, falling back to the durable table.
    pub fn get_event(&self, id: &str) -> Result<Option<ParsedEvent>> {
        if let Some(parsed) = self.cache.read().get(id) {
            return Ok(Some(parsed.clone()));
        }
        match self.db.get(id)? {
            Some(event) => match self.classify(event) {
                Classified::Ok(parsed) => Ok(Some(parsed)),
                Classified::Invalid(_) | Classified::Undecryptable(_) => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Synchronous snapshot scan over the cached events.
    ///
    /// Results are ordered by `(created_at, id)` for deterministic output;
    /// the scan has no side effects.
    pub fn filter_events(&self, predicate: impl Fn(&ParsedEvent) -> bool) -> Vec<ParsedEvent> {
        let cache = self.cache.read();
        let mut events: Vec<ParsedEvent> = cache.values().filter(|p| predicate(p)).cloned().collect();
        events.sort_by(|a, b| {
            (a.event.created_at, &a.event.id).cmp(&(b.event.created_at, &b.event.id))
        });
        events
    }

    /// Subscribe to every future accepted event.
    pub fn subscribe(&self) -> Subscription<ParsedEvent> {
        self.fanout.subscribe()
    }

    /// Subscribe to future accepted events matching `predicate`.
    ///
    /// Each subscriber receives its own copy of every matching event;
    /// dropping the subscription affects no other subscriber. The stream
    /// ends only when the store itself is dropped.
    pub fn subscribe_where(
        &self,
        predicate: impl Fn(&ParsedEvent) -> bool + Send + Sync + 'static,
    ) -> Subscription<ParsedEvent> {
        self.fanout.subscribe_where(predicate)
    }

    /// Parse the event and decrypt private kinds with the held capability.
    fn classify(&self, event: Event) -> Classified {
        let mut parsed = match ParsedEvent::parse(event) {
            Ok(parsed) => parsed,
            Err(e) => return Classified::Invalid(e),
        };

        if parsed.event.kind.is_encrypted() {
            let Some(peer) = self.decrypt_peer(&parsed) else {
                return Classified::Undecryptable(weir_core::Error::Decrypt(
                    "no usable peer key for decryption".to_string(),
                ));
            };
            match self.signer.decrypt(&peer, &parsed.event.content) {
                Ok(plaintext) => parsed.decrypted_content = Some(plaintext),
                Err(e) => return Classified::Undecryptable(e),
            }
        }

        Classified::Ok(parsed)
    }

    /// Which peer key unlocks this event's ciphertext.
    ///
    /// For a direct message we sent, the counterparty is the first `p` tag;
    /// for one we received, the author. Application data is self-encrypted.
    fn decrypt_peer(&self, parsed: &ParsedEvent) -> Option<PublicKey> {
        match parsed.event.kind {
            NoteKind::DirectMessage => {
                if parsed.author == self.signer.public_key() {
                    parsed
                        .tags
                        .peers
                        .first()
                        .and_then(|hex| PublicKey::from_hex(hex).ok())
                } else {
                    Some(parsed.author)
                }
            }
            NoteKind::AppData => Some(parsed.author),
            _ => None,
        }
    }

    /// Remove events referenced by a deletion, author-matched only.
    fn apply_deletion(&self, deletion: &ParsedEvent) -> Result<()> {
        for target_id in &deletion.tags.events {
            let target = self.cache.read().get(target_id).cloned();
            if let Some(target) = target {
                if target.author == deletion.author {
                    self.cache.write().remove(target_id);
                    self.db.delete(target_id)?;
                    debug!(id = %target_id, "event deleted by its author");
                } else {
                    debug!(id = %target_id, "ignoring deletion from non-author");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use weir_core::{EventTemplate, MemorySigner};

    fn signer() -> Arc<MemorySigner> {
        Arc::new(MemorySigner::from_seed(1))
    }

    fn text_note(author: &MemorySigner, content: &str, lamport: u64) -> Event {
        let template = EventTemplate::new(author.public_key(), NoteKind::TextNote, content)
            .tag_lamport(lamport);
        author.sign(template).unwrap()
    }

    fn dm(from: &MemorySigner, to: &PublicKey, plaintext: &str) -> Event {
        let ciphertext = from.encrypt(to, plaintext).unwrap();
        let template = EventTemplate::new(from.public_key(), NoteKind::DirectMessage, ciphertext)
            .tag_peer(to);
        from.sign(template).unwrap()
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_and_publishes_once() {
        let me = signer();
        let store = EventStore::open_in_memory(me.clone()).unwrap();
        let mut sub = store.subscribe();

        let event = text_note(&me, "hello", 1);
        assert!(store.add_event(event.clone()).await.unwrap().is_some());
        assert!(store.add_event(event.clone()).await.unwrap().is_none());

        assert_eq!(sub.recv().await.unwrap().event.id, event.id);
        assert!(sub.try_recv().is_none());
        assert_eq!(store.filter_events(|_| true).len(), 1);
    }

    #[tokio::test]
    async fn test_two_subscribers_both_receive() {
        let me = signer();
        let store = EventStore::open_in_memory(me.clone()).unwrap();
        let mut a = store.subscribe();
        let mut b = store.subscribe();

        let event = text_note(&me, "fan out", 1);
        store.add_event(event.clone()).await.unwrap();

        assert_eq!(a.recv().await.unwrap().event.id, event.id);
        assert_eq!(b.recv().await.unwrap().event.id, event.id);

        // Closing one stream does not affect the other
        drop(a);
        let second = text_note(&me, "still here", 2);
        store.add_event(second.clone()).await.unwrap();
        assert_eq!(b.recv().await.unwrap().event.id, second.id);
    }

    #[tokio::test]
    async fn test_direct_message_is_decrypted_once() {
        let me = signer();
        let peer = MemorySigner::from_seed(2);
        let store = EventStore::open_in_memory(me.clone()).unwrap();

        // Received: peer → me
        let inbound = dm(&peer, &me.public_key(), "hi me");
        let parsed = store.add_event(inbound).await.unwrap().unwrap();
        assert_eq!(parsed.content(), "hi me");
        assert!(parsed.event.content.starts_with("v0:")); // ciphertext intact

        // Sent: me → peer
        let outbound = dm(&me, &peer.public_key(), "hi peer");
        let parsed = store.add_event(outbound).await.unwrap().unwrap();
        assert_eq!(parsed.content(), "hi peer");
    }

    #[tokio::test]
    async fn test_undecryptable_event_is_tombstoned() {
        let me = signer();
        let peer = MemorySigner::from_seed(2);
        let store = EventStore::open_in_memory(me.clone()).unwrap();
        let mut sub = store.subscribe();

        let template = EventTemplate::new(
            peer.public_key(),
            NoteKind::DirectMessage,
            "never-encrypted garbage",
        )
        .tag_peer(&me.public_key());
        let event = peer.sign(template).unwrap();
        let id = event.id.clone();

        assert!(store.add_event(event).await.unwrap().is_none());
        assert!(store.get_event(&id).unwrap().is_none());
        assert!(sub.try_recv().is_none());

        // An unrelated event still flows through the stream
        let ok = dm(&peer, &me.public_key(), "fine");
        store.add_event(ok.clone()).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().event.id, ok.id);
    }

    #[tokio::test]
    async fn test_malformed_author_is_skipped() {
        let me = signer();
        let store = EventStore::open_in_memory(me.clone()).unwrap();

        let mut event = text_note(&me, "x", 1);
        event.pubkey = "not-a-key".to_string();
        assert!(store.add_event(event).await.unwrap().is_none());
        assert!(store.filter_events(|_| true).is_empty());
    }

    #[tokio::test]
    async fn test_deletion_removes_author_matched_events() {
        let me = signer();
        let other = MemorySigner::from_seed(2);
        let store = EventStore::open_in_memory(me.clone()).unwrap();

        let note = text_note(&me, "delete me", 1);
        let foreign = text_note(&other, "not yours", 1);
        store.add_event(note.clone()).await.unwrap();
        store.add_event(foreign.clone()).await.unwrap();

        let mut template = EventTemplate::new(me.public_key(), NoteKind::Deletion, "");
        template.tags.push(vec!["e".to_string(), note.id.clone()]);
        template.tags.push(vec!["e".to_string(), foreign.id.clone()]);
        store
            .add_event(me.sign(template).unwrap())
            .await
            .unwrap()
            .unwrap();

        assert!(store.get_event(&note.id).unwrap().is_none());
        // Author mismatch: untouched
        assert!(store.get_event(&foreign.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_cache_and_clock() {
        let me = signer();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("events.db");

        {
            let store = EventStore::open(&path, me.clone()).unwrap();
            store.add_event(text_note(&me, "one", 5)).await.unwrap();
            store.add_event(text_note(&me, "two", 12)).await.unwrap();
        }

        let store = EventStore::open(&path, me.clone()).unwrap();
        assert_eq!(store.filter_events(|_| true).len(), 2);
        // Clock reseeded from the max lamport tag in history
        assert_eq!(store.clock().now(), 13);
    }

    #[tokio::test]
    async fn test_filter_events_snapshot() {
        let me = signer();
        let store = EventStore::open_in_memory(me.clone()).unwrap();
        for (i, content) in ["a", "b", "c"].iter().enumerate() {
            let mut event = text_note(&me, content, i as u64 + 1);
            event.created_at = 1000 + i as u64;
            // re-sign not needed for store acceptance; id stays unique
            store.add_event(event).await.unwrap();
        }

        let notes = store.filter_events(|p| p.event.kind == NoteKind::TextNote);
        assert_eq!(notes.len(), 3);
        assert!(notes.windows(2).all(|w| {
            w[0].event.created_at <= w[1].event.created_at
        }));
    }
}
