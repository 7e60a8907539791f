//! Typed views over an event's tags and content.
//!
//! Raw tags are ordered string arrays; consumers want them grouped and
//! typed. [`ParsedTags`] performs that grouping once, and [`ParsedEvent`]
//! bundles it with the validated author key and the memoized plaintext of
//! private kinds. Parsing never mutates the underlying event.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::{Event, LAMPORT_TAG};
use crate::keys::PublicKey;

/// A reference to another event, as carried by a marked `e` tag:
/// `["e", <id>, <relay-url>, "reply" | "root"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    /// Referenced event id, hex.
    pub id: String,
    /// Relay hint, empty string normalized to `None`.
    pub relay_url: Option<String>,
}

/// One fragment of a chunked binary payload:
/// `["image", <group>, <chunk-count>, <chunk-index>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageChunk {
    /// Identifier shared by all fragments of one payload.
    pub group: String,
    /// Total number of fragments in the payload.
    pub count: u32,
    /// Zero-based index of this fragment.
    pub index: u32,
}

/// Tags grouped and typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTags {
    /// Referenced peer keys (`p` tags), in tag order. Kept as hex strings:
    /// a foreign event may reference keys this process cannot parse, and
    /// that must not invalidate the event itself.
    pub peers: Vec<String>,
    /// Referenced event ids (`e` tags), in tag order.
    pub events: Vec<String>,
    /// The `e` tag marked `reply`, if any.
    pub reply: Option<EventRef>,
    /// The `e` tag marked `root`, if any.
    pub root: Option<EventRef>,
    /// Logical clock value from the `lamport` tag.
    pub lamport: Option<u64>,
    /// Chunked payload fragment marker.
    pub image: Option<ImageChunk>,
    /// Application identifier (`d` tag).
    pub identifier: Option<String>,
}

impl ParsedTags {
    /// Group and type a raw tag list. Unknown tag names are skipped;
    /// malformed instances of known tags are skipped individually.
    pub fn from_tags(tags: &[Vec<String>]) -> Self {
        let mut parsed = Self::default();

        for tag in tags {
            match tag.first().map(String::as_str) {
                Some("p") => {
                    if let Some(key) = tag.get(1) {
                        parsed.peers.push(key.clone());
                    }
                }
                Some("e") => {
                    let Some(id) = tag.get(1) else { continue };
                    parsed.events.push(id.clone());

                    let relay_url = tag.get(2).filter(|u| !u.is_empty()).cloned();
                    let event_ref = EventRef {
                        id: id.clone(),
                        relay_url,
                    };
                    match tag.get(3).map(String::as_str) {
                        Some("reply") => parsed.reply = Some(event_ref),
                        Some("root") => parsed.root = Some(event_ref),
                        _ => {}
                    }
                }
                Some(LAMPORT_TAG) => {
                    parsed.lamport = tag.get(1).and_then(|v| v.parse().ok());
                }
                Some("image") => {
                    if let (Some(group), Some(count), Some(index)) =
                        (tag.get(1), tag.get(2), tag.get(3))
                        && let (Ok(count), Ok(index)) = (count.parse(), index.parse())
                    {
                        parsed.image = Some(ImageChunk {
                            group: group.clone(),
                            count,
                            index,
                        });
                    }
                }
                Some("d") => {
                    parsed.identifier = tag.get(1).cloned();
                }
                _ => {}
            }
        }

        parsed
    }
}

/// A stored event augmented with its typed tag view, validated author key,
/// and, for private kinds, the decrypted plaintext.
///
/// Decryption is performed once by the event store when the event is
/// inserted and memoized here; the original ciphertext in `event.content`
/// is never touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub event: Event,
    pub author: PublicKey,
    pub tags: ParsedTags,
    /// Plaintext of a private-kind event, if the store held the capability.
    pub decrypted_content: Option<String>,
}

impl ParsedEvent {
    /// Parse an event's author and tags. Does not decrypt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the author key does not parse.
    /// Incoming events with garbage keys are a validation failure to be
    /// skipped, not an invariant violation.
    pub fn parse(event: Event) -> Result<Self> {
        let author = PublicKey::from_hex(&event.pubkey).map_err(|_| Error::InvalidKey {
            value: event.pubkey.clone(),
            reason: "event author is not a valid key".to_string(),
        })?;
        let tags = ParsedTags::from_tags(&event.tags);
        Ok(Self {
            event,
            author,
            tags,
            decrypted_content: None,
        })
    }

    /// The usable content: decrypted plaintext when present, the raw
    /// content field otherwise.
    pub fn content(&self) -> &str {
        self.decrypted_content
            .as_deref()
            .unwrap_or(&self.event.content)
    }
}
