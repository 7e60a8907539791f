//! Protocol data model and shared primitives for the weir state layer.
//!
//! This crate provides:
//! - The wire-shaped event record and kind discriminants
//! - Typed tag/content views over stored events
//! - Public key handling
//! - The Lamport logical clock used to order events across relays
//! - The signing/encryption capability trait bound to one local identity

mod clock;
pub mod compose;
mod error;
mod event;
mod keys;
mod parsed;
mod signer;

pub use clock::LamportClock;
pub use error::{Error, Result};
pub use event::{Event, EventTemplate, LAMPORT_TAG, NoteKind, compute_event_id, unix_now};
pub use keys::PublicKey;
pub use parsed::{EventRef, ImageChunk, ParsedEvent, ParsedTags};
pub use signer::{MemorySigner, Signer};
