//! The event record and local event composition.
//!
//! An event is the only durable object in the protocol: an immutable,
//! content-addressed, signed record. This module provides:
//! - The wire-shaped [`Event`] record (hex ids and keys, string tag arrays)
//! - [`NoteKind`], the integer discriminant selecting an event's semantics
//! - [`EventTemplate`] for composing events locally before signing
//! - Canonical id computation (SHA-256 over `[0, pubkey, created_at, kind,
//!   tags, content]`)
//!
//! Signature *verification* is the transport collaborator's job; events
//! handed to this crate are assumed already verified.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::keys::PublicKey;

/// Tag name carrying the logical clock value alongside each event.
///
/// A non-standard extension tag: `["lamport", "<integer>"]`.
pub const LAMPORT_TAG: &str = "lamport";

/// Semantic type of an event.
///
/// Unknown discriminants are preserved rather than rejected so the store
/// can cache events it does not understand yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum NoteKind {
    /// Profile metadata (JSON content).
    Metadata,
    /// Plaintext note.
    TextNote,
    /// Relay recommendation.
    RecommendServer,
    /// Contact list.
    Contacts,
    /// Encrypted direct message.
    DirectMessage,
    /// Deletion request referencing earlier events by `e` tag.
    Deletion,
    /// Encrypted application data, disambiguated by a `d` tag.
    AppData,
    /// Any other kind number.
    Other(u32),
}

impl From<u32> for NoteKind {
    fn from(kind: u32) -> Self {
        match kind {
            0 => Self::Metadata,
            1 => Self::TextNote,
            2 => Self::RecommendServer,
            3 => Self::Contacts,
            4 => Self::DirectMessage,
            5 => Self::Deletion,
            30078 => Self::AppData,
            other => Self::Other(other),
        }
    }
}

impl From<NoteKind> for u32 {
    fn from(kind: NoteKind) -> u32 {
        match kind {
            NoteKind::Metadata => 0,
            NoteKind::TextNote => 1,
            NoteKind::RecommendServer => 2,
            NoteKind::Contacts => 3,
            NoteKind::DirectMessage => 4,
            NoteKind::Deletion => 5,
            NoteKind::AppData => 30078,
            NoteKind::Other(other) => other,
        }
    }
}

impl NoteKind {
    /// Whether this kind carries ciphertext that the holder of the account
    /// capability can decrypt.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::DirectMessage | Self::AppData)
    }
}

/// An immutable signed event as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-byte SHA-256 of the canonical serialization, hex encoded.
    pub id: String,
    /// Author public key, hex encoded.
    pub pubkey: String,
    /// Unix seconds. Sender-supplied; coarse and untrusted.
    pub created_at: u64,
    /// Semantic discriminant.
    pub kind: NoteKind,
    /// Ordered list of string arrays carrying semi-structured metadata.
    pub tags: Vec<Vec<String>>,
    /// Opaque ciphertext for private kinds, plain text or JSON otherwise.
    pub content: String,
    /// 64-byte Schnorr signature, hex encoded. Verified upstream.
    pub sig: String,
}

impl Event {
    /// First value of the first tag with the given name, if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// The `lamport` tag value, if present and well-formed.
    pub fn lamport_timestamp(&self) -> Option<u64> {
        self.tag_value(LAMPORT_TAG).and_then(|v| v.parse().ok())
    }
}

/// An unsigned event under composition.
///
/// Fill in the fields, then hand the template to a
/// [`Signer`](crate::signer::Signer) to obtain a signed [`Event`].
#[derive(Debug, Clone)]
pub struct EventTemplate {
    pub pubkey: PublicKey,
    pub created_at: u64,
    pub kind: NoteKind,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl EventTemplate {
    /// Start a template for the given author and kind, stamped with the
    /// current wall clock.
    pub fn new(pubkey: PublicKey, kind: NoteKind, content: impl Into<String>) -> Self {
        Self {
            pubkey,
            created_at: unix_now(),
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    /// Append a `p` tag referencing a peer.
    pub fn tag_peer(mut self, peer: &PublicKey) -> Self {
        self.tags.push(vec!["p".to_string(), peer.to_hex()]);
        self
    }

    /// Append a `d` tag carrying an application identifier.
    pub fn tag_identifier(mut self, d: &str) -> Self {
        self.tags.push(vec!["d".to_string(), d.to_string()]);
        self
    }

    /// Append a `lamport` tag carrying a logical clock value.
    pub fn tag_lamport(mut self, time: u64) -> Self {
        self.tags
            .push(vec![LAMPORT_TAG.to_string(), time.to_string()]);
        self
    }
}

/// Compute the content-addressed id of a template.
///
/// The canonical serialization is the JSON array
/// `[0, pubkey, created_at, kind, tags, content]` with no whitespace,
/// hashed with SHA-256 and hex encoded.
pub fn compute_event_id(template: &EventTemplate) -> String {
    let canonical = serde_json::json!([
        0,
        template.pubkey.to_hex(),
        template.created_at,
        u32::from(template.kind),
        template.tags,
        template.content,
    ]);
    // serde_json writes arrays compactly; this matches the wire canonical form
    let bytes = serde_json::to_vec(&canonical).expect("canonical event form serializes");
    hex::encode(Sha256::digest(&bytes))
}

/// Current wall clock as unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for raw in [0u32, 1, 2, 3, 4, 5, 30078, 77] {
            let kind = NoteKind::from(raw);
            assert_eq!(u32::from(kind), raw);
        }
        assert_eq!(NoteKind::from(4), NoteKind::DirectMessage);
        assert_eq!(NoteKind::from(77), NoteKind::Other(77));
    }

    #[test]
    fn test_kind_serde_as_integer() {
        let json = serde_json::to_string(&NoteKind::AppData).unwrap();
        assert_eq!(json, "30078");
        let back: NoteKind = serde_json::from_str("4").unwrap();
        assert_eq!(back, NoteKind::DirectMessage);
    }

    #[test]
    fn test_event_wire_shape() {
        let raw = r#"{"id":"00","pubkey":"ab","created_at":1673002822,"kind":1,
            "tags":[["p","cd"],["lamport","17"]],"content":"hi","sig":"ff"}"#;
        let event: Event = serde_json::from_str(raw).unwrap();
        assert_eq!(event.kind, NoteKind::TextNote);
        assert_eq!(event.tag_value("p"), Some("cd"));
        assert_eq!(event.lamport_timestamp(), Some(17));
    }

    #[test]
    fn test_lamport_tag_malformed_is_none() {
        let event = Event {
            id: String::new(),
            pubkey: String::new(),
            created_at: 0,
            kind: NoteKind::TextNote,
            tags: vec![vec![LAMPORT_TAG.to_string(), "not-a-number".to_string()]],
            content: String::new(),
            sig: String::new(),
        };
        assert_eq!(event.lamport_timestamp(), None);
    }

    #[test]
    fn test_compute_event_id_is_deterministic() {
        let author = PublicKey::from_bytes([9u8; 32]);
        let mut template = EventTemplate::new(author, NoteKind::TextNote, "hello");
        template.created_at = 1_700_000_000;

        let id1 = compute_event_id(&template);
        let id2 = compute_event_id(&template);
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 64);

        // Any field change produces a different id
        template.content = "hello!".to_string();
        assert_ne!(compute_event_id(&template), id1);
    }

    #[test]
    fn test_template_tag_builders() {
        let author = PublicKey::from_bytes([1u8; 32]);
        let peer = PublicKey::from_bytes([2u8; 32]);
        let template = EventTemplate::new(author, NoteKind::DirectMessage, "x")
            .tag_peer(&peer)
            .tag_lamport(42)
            .tag_identifier("pin-list");

        assert_eq!(template.tags[0], vec!["p".to_string(), peer.to_hex()]);
        assert_eq!(template.tags[1][1], "42");
        assert_eq!(template.tags[2], vec!["d".to_string(), "pin-list".to_string()]);
    }
}
