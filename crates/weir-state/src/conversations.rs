//! Conversation folding engine.
//!
//! Consumes the event stream and incrementally maintains one summary per
//! peer: the newest message in each direction plus the peer's latest
//! profile. The fold is a max-by-`created_at` merge, so reprocessing any
//! permutation of the same events converges on the same summaries, and
//! duplicate delivery cannot corrupt the result.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use weir_core::{NoteKind, ParsedEvent, PublicKey};

/// Which list a peer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationGroup {
    /// Traffic in both directions.
    Contacts,
    /// Traffic in exactly one direction (or no known peer at all).
    Strangers,
}

/// Profile metadata carried by a kind-0 event's JSON content.
///
/// Unknown fields are preserved so a newer client's profile survives a
/// round-trip through this one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Derived per-peer summary. Never stored; rebuilt by folding.
#[derive(Debug, Clone, Default)]
pub struct ConversationSummary {
    /// Most recent direct message sent by the local account to this peer.
    pub newest_sent: Option<ParsedEvent>,
    /// Most recent direct message received from this peer.
    pub newest_received: Option<ParsedEvent>,
    /// The peer's latest profile, with the `created_at` it was folded at.
    pub profile: Option<(u64, Profile)>,
}

impl ConversationSummary {
    fn group(&self) -> ConversationGroup {
        if self.newest_sent.is_some() && self.newest_received.is_some() {
            ConversationGroup::Contacts
        } else {
            ConversationGroup::Strangers
        }
    }

    /// Exactly one direction populated. A profile-only summary has neither
    /// and belongs to no list.
    fn is_one_sided(&self) -> bool {
        self.newest_sent.is_some() != self.newest_received.is_some()
    }
}

/// Folds the event stream into per-peer conversation summaries.
pub struct ConversationLists {
    me: PublicKey,
    summaries: HashMap<PublicKey, ConversationSummary>,
}

impl ConversationLists {
    pub fn new(me: PublicKey) -> Self {
        Self {
            me,
            summaries: HashMap::new(),
        }
    }

    /// Fold a batch of events.
    ///
    /// Safe to re-run over events already folded: the merge keeps the
    /// newer of the stored and incoming message per direction, so replays
    /// are no-ops. De-duplication is the event store's job, not ours.
    pub fn add_events<'a>(&mut self, events: impl IntoIterator<Item = &'a ParsedEvent>) {
        for event in events {
            self.add_event(event);
        }
    }

    fn add_event(&mut self, event: &ParsedEvent) {
        match event.event.kind {
            NoteKind::DirectMessage => self.fold_direct_message(event),
            NoteKind::Metadata => self.fold_profile(event),
            _ => {}
        }
    }

    /// Three mutually exclusive cases: talking to self, sender, receiver.
    fn fold_direct_message(&mut self, event: &ParsedEvent) {
        let recipient = event
            .tags
            .peers
            .first()
            .and_then(|hex| PublicKey::from_hex(hex).ok());

        if event.author == self.me {
            let Some(recipient) = recipient else {
                debug!(id = %event.event.id, "direct message without recipient ignored");
                return;
            };
            let summary = self.summaries.entry(recipient).or_default();
            if recipient == self.me {
                // Talking to ourselves: both directions move together
                merge_newest(&mut summary.newest_sent, event);
                merge_newest(&mut summary.newest_received, event);
            } else {
                merge_newest(&mut summary.newest_sent, event);
            }
        } else if recipient == Some(self.me) {
            let summary = self.summaries.entry(event.author).or_default();
            merge_newest(&mut summary.newest_received, event);
        } else {
            // Neither ours to send nor ours to receive: stale traffic from
            // another account on a shared device
            debug!(id = %event.event.id, "unrelated direct message ignored");
        }
    }

    fn fold_profile(&mut self, event: &ParsedEvent) {
        let profile: Profile = match serde_json::from_str(event.content()) {
            Ok(profile) => profile,
            Err(e) => {
                debug!(id = %event.event.id, error = %e, "malformed profile content ignored");
                return;
            }
        };

        let summary = self.summaries.entry(event.author).or_default();
        let newer = summary
            .profile
            .as_ref()
            .is_none_or(|(stored_at, _)| event.event.created_at > *stored_at);
        if newer {
            summary.profile = Some((event.event.created_at, profile));
        }
    }

    /// Peers with traffic in both directions.
    pub fn contacts(&self) -> Vec<PublicKey> {
        self.peers_where(|s| s.group() == ConversationGroup::Contacts)
    }

    /// Peers with traffic in exactly one direction.
    ///
    /// A peer with no message traffic never appears here, even if a
    /// profile for them has been folded.
    pub fn strangers(&self) -> Vec<PublicKey> {
        self.peers_where(ConversationSummary::is_one_sided)
    }

    fn peers_where(&self, include: impl Fn(&ConversationSummary) -> bool) -> Vec<PublicKey> {
        let mut peers: Vec<PublicKey> = self
            .summaries
            .iter()
            .filter(|(_, s)| include(s))
            .map(|(peer, _)| *peer)
            .collect();
        peers.sort();
        peers
    }

    /// Single-peer classification. Unknown peers are strangers.
    pub fn group_of(&self, peer: &PublicKey) -> ConversationGroup {
        self.summaries
            .get(peer)
            .map(ConversationSummary::group)
            .unwrap_or(ConversationGroup::Strangers)
    }

    /// The folded summary for one peer, if any traffic or profile exists.
    pub fn summary(&self, peer: &PublicKey) -> Option<&ConversationSummary> {
        self.summaries.get(peer)
    }

    /// The peer's latest folded profile.
    pub fn profile(&self, peer: &PublicKey) -> Option<&Profile> {
        self.summaries
            .get(peer)
            .and_then(|s| s.profile.as_ref())
            .map(|(_, profile)| profile)
    }
}

/// Keep the newer of the stored and incoming event. Strictly newer:
/// equal `created_at` keeps the stored value (first seen wins), an
/// accepted imprecision given sender-controlled timestamps.
fn merge_newest(slot: &mut Option<ParsedEvent>, incoming: &ParsedEvent) {
    let newer = slot
        .as_ref()
        .is_none_or(|stored| incoming.event.created_at > stored.event.created_at);
    if newer {
        *slot = Some(incoming.clone());
    }
}
