//! Replicated relay list.
//!
//! Each relay URL is a last-writer-wins register: updates carry a per-URL
//! counter (`vc`), and an update whose counter is not strictly greater
//! than the stored one is discarded. Folding the same update set in any
//! order converges on the same membership, which is what multi-relay
//! delivery requires.
//!
//! After folding, [`RelayListConfig::reconcile`] drives the live
//! connection pool to match the computed membership, collecting per-URL
//! failures without aborting the batch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use weir_core::{LamportClock, NoteKind, ParsedEvent, Signer, compose};

use crate::config::kv::KvStore;
use crate::error::Result;
use crate::pool::{PoolError, RelayPool};

/// `d`-tag identifier shared by all relay-list update events.
pub const RELAY_LIST_IDENTIFIER: &str = "relay-list";

/// Desired membership state for one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayAction {
    Added,
    Removed,
}

/// One replicated update, serialized (then encrypted) as event content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayUpdate {
    pub url: String,
    #[serde(rename = "type")]
    pub action: RelayAction,
    pub vc: u64,
}

/// Stored register cell for one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Register {
    action: RelayAction,
    vc: u64,
}

/// Replicated relay membership with vc-disambiguated merge.
pub struct RelayListConfig {
    signer: Arc<dyn Signer>,
    clock: Arc<LamportClock>,
    pool: Arc<dyn RelayPool>,
    entries: RwLock<HashMap<String, Register>>,
}

impl RelayListConfig {
    pub fn new(
        signer: Arc<dyn Signer>,
        clock: Arc<LamportClock>,
        pool: Arc<dyn RelayPool>,
    ) -> Self {
        Self {
            signer,
            clock,
            pool,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Mark a URL as part of the relay set and emit the update.
    pub async fn add_relay(&self, url: &str) -> Result<()> {
        let update = self.bump(url, RelayAction::Added);
        self.emit(&update).await
    }

    /// Mark a URL as removed and emit the update.
    pub async fn remove_relay(&self, url: &str) -> Result<()> {
        let update = self.bump(url, RelayAction::Removed);
        self.emit(&update).await
    }

    /// URLs currently marked [`RelayAction::Added`], sorted.
    pub fn relay_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, register)| register.action == RelayAction::Added)
            .map(|(url, _)| url.clone())
            .collect();
        urls.sort();
        urls
    }

    /// Fold one update into the register map.
    ///
    /// Returns `true` if the update was applied, `false` if it was stale
    /// (its `vc` is not strictly greater than the stored one). Discarding
    /// stale updates is expected merge traffic, not an error.
    pub fn apply_update(&self, update: &RelayUpdate) -> bool {
        let mut entries = self.entries.write();
        match entries.get(&update.url) {
            Some(register) if update.vc <= register.vc => {
                debug!(url = %update.url, vc = update.vc, stored = register.vc, "stale relay update discarded");
                false
            }
            _ => {
                entries.insert(
                    update.url.clone(),
                    Register {
                        action: update.action,
                        vc: update.vc,
                    },
                );
                true
            }
        }
    }

    /// Fold one remote event.
    ///
    /// Events that are not our own relay-list updates are ignored;
    /// malformed or undecryptable payloads are logged and skipped.
    pub fn add_event(&self, event: &ParsedEvent) {
        if let Some(update) = self.update_of(event) {
            self.apply_update(&update);
        }
    }

    /// Fold a batch of remote events.
    pub fn add_events<'a>(&self, events: impl IntoIterator<Item = &'a ParsedEvent>) {
        for event in events {
            self.add_event(event);
        }
    }

    /// Write the register snapshot to this account's slot.
    pub fn save(&self, kv: &dyn KvStore) -> Result<()> {
        let snapshot = serde_json::to_string(&*self.entries.read())?;
        kv.put(&self.snapshot_key(), &snapshot)
    }

    /// Merge the account's stored snapshot into the register map.
    ///
    /// Loading goes through the same vc merge as remote updates, so a
    /// snapshot and a live stream can be combined in either order.
    pub fn load(&self, kv: &dyn KvStore) -> Result<()> {
        let Some(raw) = kv.get(&self.snapshot_key())? else {
            return Ok(());
        };
        let snapshot: HashMap<String, Register> = serde_json::from_str(&raw)?;
        for (url, register) in snapshot {
            self.apply_update(&RelayUpdate {
                url,
                action: register.action,
                vc: register.vc,
            });
        }
        Ok(())
    }

    /// Drive the live pool to match the computed membership.
    ///
    /// Every URL is attempted; failures are reported per URL and never
    /// abort the rest of the batch.
    pub async fn reconcile(&self) -> Vec<(String, PoolError)> {
        let entries: Vec<(String, Register)> = self
            .entries
            .read()
            .iter()
            .map(|(url, register)| (url.clone(), *register))
            .collect();

        let mut failures = Vec::new();
        for (url, register) in entries {
            let outcome = match register.action {
                RelayAction::Added => self.pool.add_relay(&url).await,
                RelayAction::Removed => self.pool.remove_relay(&url).await,
            };
            if let Err(e) = outcome {
                warn!(url = %url, error = %e, "relay reconciliation failed");
                failures.push((url, e));
            }
        }
        failures
    }

    fn snapshot_key(&self) -> String {
        format!("relay-list/{}", self.signer.public_key().to_hex())
    }

    /// Next update for a URL: per-URL counter bumped past the stored one.
    fn bump(&self, url: &str, action: RelayAction) -> RelayUpdate {
        let mut entries = self.entries.write();
        let vc = entries.get(url).map(|r| r.vc).unwrap_or(0) + 1;
        entries.insert(url.to_string(), Register { action, vc });
        RelayUpdate {
            url: url.to_string(),
            action,
            vc,
        }
    }

    fn update_of(&self, event: &ParsedEvent) -> Option<RelayUpdate> {
        if event.event.kind != NoteKind::AppData
            || event.tags.identifier.as_deref() != Some(RELAY_LIST_IDENTIFIER)
            || event.author != self.signer.public_key()
        {
            return None;
        }

        let plaintext = match &event.decrypted_content {
            Some(plaintext) => plaintext.clone(),
            None => match self.signer.decrypt(&event.author, &event.event.content) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    warn!(id = %event.event.id, error = %e, "undecryptable relay update skipped");
                    return None;
                }
            },
        };

        match serde_json::from_str(&plaintext) {
            Ok(update) => Some(update),
            Err(e) => {
                warn!(id = %event.event.id, error = %e, "malformed relay update skipped");
                None
            }
        }
    }

    async fn emit(&self, update: &RelayUpdate) -> Result<()> {
        let plaintext = serde_json::to_string(update)?;
        let event =
            compose::app_data(&*self.signer, &self.clock, RELAY_LIST_IDENTIFIER, &plaintext)?;
        self.pool.send_event(&event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::kv::MemoryKv;
    use crate::pool::MemoryPool;
    use weir_core::MemorySigner;

    fn relay_config() -> (Arc<MemoryPool>, RelayListConfig) {
        let pool = Arc::new(MemoryPool::new());
        let config = RelayListConfig::new(
            Arc::new(MemorySigner::from_seed(1)),
            Arc::new(LamportClock::new()),
            pool.clone(),
        );
        (pool, config)
    }

    fn update(url: &str, action: RelayAction, vc: u64) -> RelayUpdate {
        RelayUpdate {
            url: url.to_string(),
            action,
            vc,
        }
    }

    #[tokio::test]
    async fn test_add_remove_and_emit() {
        let (pool, config) = relay_config();

        config.add_relay("wss://relay.damus.io").await.unwrap();
        config.add_relay("wss://nos.lol").await.unwrap();
        config.remove_relay("wss://nos.lol").await.unwrap();

        assert_eq!(config.relay_urls(), vec!["wss://relay.damus.io".to_string()]);

        let sent = pool.sent_events();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|e| e.kind == NoteKind::AppData));
        assert!(sent.iter().all(|e| e.tag_value("d") == Some(RELAY_LIST_IDENTIFIER)));
    }

    #[test]
    fn test_stale_vc_is_discarded() {
        let (_, config) = relay_config();

        assert!(config.apply_update(&update("wss://a", RelayAction::Added, 2)));
        // Equal vc: discarded
        assert!(!config.apply_update(&update("wss://a", RelayAction::Removed, 2)));
        // Lower vc: discarded
        assert!(!config.apply_update(&update("wss://a", RelayAction::Removed, 1)));
        assert_eq!(config.relay_urls(), vec!["wss://a".to_string()]);

        // Strictly greater: applied
        assert!(config.apply_update(&update("wss://a", RelayAction::Removed, 3)));
        assert!(config.relay_urls().is_empty());
    }

    #[test]
    fn test_merge_is_order_independent() {
        let updates = vec![
            update("wss://a", RelayAction::Added, 1),
            update("wss://a", RelayAction::Removed, 2),
            update("wss://b", RelayAction::Added, 1),
            update("wss://c", RelayAction::Added, 3),
            update("wss://c", RelayAction::Removed, 1),
        ];

        // Fold every permutation; all must converge on the same membership
        let mut orders: Vec<Vec<usize>> = Vec::new();
        permute(&mut (0..updates.len()).collect::<Vec<_>>(), 0, &mut orders);

        for order in orders {
            let (_, config) = relay_config();
            for index in order {
                config.apply_update(&updates[index]);
            }
            assert_eq!(
                config.relay_urls(),
                vec!["wss://b".to_string(), "wss://c".to_string()]
            );
        }
    }

    fn permute(items: &mut Vec<usize>, k: usize, out: &mut Vec<Vec<usize>>) {
        if k == items.len() {
            out.push(items.clone());
            return;
        }
        for i in k..items.len() {
            items.swap(k, i);
            permute(items, k + 1, out);
            items.swap(k, i);
        }
    }

    #[tokio::test]
    async fn test_event_round_trip_through_fold() {
        let (pool, sender) = relay_config();
        sender.add_relay("wss://relay.damus.io").await.unwrap();

        let (_, replica) = relay_config();
        let sent = pool.sent_events();
        replica.add_events(
            sent.iter()
                .map(|e| ParsedEvent::parse(e.clone()).unwrap())
                .collect::<Vec<_>>()
                .iter(),
        );
        assert_eq!(replica.relay_urls(), vec!["wss://relay.damus.io".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let (_, config) = relay_config();
        config.add_relay("wss://relay.damus.io").await.unwrap();
        config.add_relay("wss://nos.lol").await.unwrap();
        config.remove_relay("wss://nos.lol").await.unwrap();

        let kv = MemoryKv::new();
        config.save(&kv).unwrap();

        let (_, restored) = relay_config();
        restored.load(&kv).unwrap();
        assert_eq!(restored.relay_urls(), vec!["wss://relay.damus.io".to_string()]);

        // Removed entries keep their registers so stale re-adds stay dead
        assert!(!restored.apply_update(&update("wss://nos.lol", RelayAction::Added, 1)));
    }

    #[tokio::test]
    async fn test_reconcile_collects_per_url_failures() {
        let (pool, config) = relay_config();
        config.add_relay("wss://good.example").await.unwrap();
        config.add_relay("wss://bad.example").await.unwrap();
        config.add_relay("wss://also-good.example").await.unwrap();
        pool.fail_url("wss://bad.example");

        let failures = config.reconcile().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "wss://bad.example");

        // The rest of the batch still went through
        let relays = pool.relays().await;
        assert!(relays.contains(&"wss://good.example".to_string()));
        assert!(relays.contains(&"wss://also-good.example".to_string()));
    }
}
