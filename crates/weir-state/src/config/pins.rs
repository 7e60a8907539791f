//! Replicated pin list.
//!
//! The pin list is a set of peer keys replicated as an append-only log of
//! add/remove operations, one encrypted application-data event per
//! operation, all carrying the same `d` identifier.
//!
//! Remote operations are applied in delivery order with no timestamp
//! comparison: apply `-a` then `+a` and `a` is present; apply `+a` then
//! `-a` and it is absent. The replica therefore converges on
//! *last-applied-wins*, not last-written-wins, unlike the relay list one
//! module over. The product test fixtures encode this behavior; changing
//! it to versioned resolution needs product sign-off first.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use weir_core::{LamportClock, NoteKind, ParsedEvent, PublicKey, Signer, compose};

use crate::config::kv::KvStore;
use crate::error::Result;
use crate::pool::{Filter, PoolError, RelayPool};

/// `d`-tag identifier shared by all pin-list operation events.
pub const PIN_LIST_IDENTIFIER: &str = "pin-list";

/// Subscription id used by [`PinConfig::sync_from_relay`].
const PIN_SYNC_SUB: &str = "pin-list-sync";

/// One replicated operation, serialized (then encrypted) as event content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
enum PinOperation {
    PinConversation { pubkey: String },
    UnpinConversation { pubkey: String },
}

/// Replicated set of pinned conversations.
pub struct PinConfig {
    signer: Arc<dyn Signer>,
    clock: Arc<LamportClock>,
    pool: Arc<dyn RelayPool>,
    pins: RwLock<HashSet<PublicKey>>,
}

impl PinConfig {
    pub fn new(
        signer: Arc<dyn Signer>,
        clock: Arc<LamportClock>,
        pool: Arc<dyn RelayPool>,
    ) -> Self {
        Self {
            signer,
            clock,
            pool,
            pins: RwLock::new(HashSet::new()),
        }
    }

    /// Pin a conversation: mutate local state immediately, then emit the
    /// operation to the relays.
    ///
    /// # Errors
    ///
    /// A send failure leaves the optimistic local state in place and
    /// surfaces so the caller can offer a retry.
    pub async fn add_pin(&self, peer: PublicKey) -> Result<()> {
        self.pins.write().insert(peer);
        self.emit(&PinOperation::PinConversation {
            pubkey: peer.to_hex(),
        })
        .await
    }

    /// Unpin a conversation. Same optimistic-then-emit shape as
    /// [`Self::add_pin`].
    pub async fn remove_pin(&self, peer: PublicKey) -> Result<()> {
        self.pins.write().remove(&peer);
        self.emit(&PinOperation::UnpinConversation {
            pubkey: peer.to_hex(),
        })
        .await
    }

    /// Current pin set.
    pub fn pin_list(&self) -> HashSet<PublicKey> {
        self.pins.read().clone()
    }

    /// Fold one remote event into the set.
    ///
    /// Events that are not our own pin-list operations are ignored.
    /// Malformed or undecryptable payloads are logged and skipped; the
    /// next event is unaffected.
    pub fn add_event(&self, event: &ParsedEvent) {
        let Some(op) = self.operation_of(event) else {
            return;
        };
        match op {
            PinOperation::PinConversation { pubkey } => match PublicKey::from_hex(&pubkey) {
                Ok(peer) => {
                    self.pins.write().insert(peer);
                }
                Err(e) => warn!(id = %event.event.id, error = %e, "pin operation with bad key ignored"),
            },
            PinOperation::UnpinConversation { pubkey } => match PublicKey::from_hex(&pubkey) {
                Ok(peer) => {
                    self.pins.write().remove(&peer);
                }
                Err(e) => warn!(id = %event.event.id, error = %e, "unpin operation with bad key ignored"),
            },
        }
    }

    /// Pull loop: subscribe to our own application-data events and fold
    /// each one as it arrives. Runs until the pool closes the stream;
    /// callers spawn it. Delivery is at-least-once and each operation is
    /// idempotent against the set, so replays are harmless.
    pub async fn sync_from_relay(&self) -> Result<()> {
        let filter = Filter::new()
            .kinds([NoteKind::AppData])
            .authors([self.signer.public_key().to_hex()]);

        let mut rx = match self.pool.subscribe(PIN_SYNC_SUB, filter.clone()).await {
            Ok(rx) => rx,
            Err(PoolError::SubscriptionExists(_)) => {
                // Someone else owns the stream; just refresh its filter
                self.pool.update_subscription(PIN_SYNC_SUB, filter).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(relayed) = rx.recv().await {
            match ParsedEvent::parse(relayed.event) {
                Ok(parsed) => self.add_event(&parsed),
                Err(e) => debug!(error = %e, "skipping unparseable event from relay"),
            }
        }
        Ok(())
    }

    /// Push the full current state as one pin operation per entry, for
    /// seeding a relay that missed the original log.
    pub async fn save_to_relay(&self) -> Result<()> {
        let pins: Vec<PublicKey> = self.pins.read().iter().copied().collect();
        for peer in pins {
            self.emit(&PinOperation::PinConversation {
                pubkey: peer.to_hex(),
            })
            .await?;
        }
        Ok(())
    }

    /// Write the pin cache to the injected slot store.
    pub fn save(&self, kv: &dyn KvStore) -> Result<()> {
        let mut pins: Vec<String> = self.pins.read().iter().map(PublicKey::to_hex).collect();
        pins.sort();
        kv.put(&self.cache_key(), &serde_json::to_string(&pins)?)
    }

    /// Replace local state from the slot store's cached snapshot.
    ///
    /// Panics if a cached key no longer parses: we wrote it, so failure
    /// means the local state is corrupted.
    pub fn load(&self, kv: &dyn KvStore) -> Result<()> {
        let Some(raw) = kv.get(&self.cache_key())? else {
            return Ok(());
        };
        let cached: Vec<String> = serde_json::from_str(&raw)?;
        let pins = cached
            .iter()
            .map(|hex| PublicKey::from_stored_hex(hex))
            .collect();
        *self.pins.write() = pins;
        Ok(())
    }

    fn cache_key(&self) -> String {
        format!("pin-list/{}", self.signer.public_key().to_hex())
    }

    /// Decode an event into a pin operation, or `None` if it isn't one of
    /// ours or its payload doesn't decode.
    fn operation_of(&self, event: &ParsedEvent) -> Option<PinOperation> {
        if event.event.kind != NoteKind::AppData
            || event.tags.identifier.as_deref() != Some(PIN_LIST_IDENTIFIER)
            || event.author != self.signer.public_key()
        {
            return None;
        }

        let plaintext = match &event.decrypted_content {
            Some(plaintext) => plaintext.clone(),
            None => match self.signer.decrypt(&event.author, &event.event.content) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    warn!(id = %event.event.id, error = %e, "undecryptable pin operation skipped");
                    return None;
                }
            },
        };

        match serde_json::from_str(&plaintext) {
            Ok(op) => Some(op),
            Err(e) => {
                warn!(id = %event.event.id, error = %e, "malformed pin operation skipped");
                None
            }
        }
    }

    async fn emit(&self, op: &PinOperation) -> Result<()> {
        let plaintext = serde_json::to_string(op)?;
        let event = compose::app_data(&*self.signer, &self.clock, PIN_LIST_IDENTIFIER, &plaintext)?;
        self.pool.send_event(&event).await?;
        Ok(())
    }
}
