//! Composing signed events locally.
//!
//! Locally produced events are stamped from the shared logical clock so
//! receivers can order them against traffic from other relays, then signed
//! by the account capability.

use crate::clock::LamportClock;
use crate::error::Result;
use crate::event::{Event, EventTemplate, NoteKind};
use crate::keys::PublicKey;
use crate::signer::Signer;

/// Compose and sign a plaintext note.
pub fn text_note(signer: &dyn Signer, clock: &LamportClock, text: &str) -> Result<Event> {
    let template = EventTemplate::new(signer.public_key(), NoteKind::TextNote, text)
        .tag_lamport(clock.now());
    signer.sign(template)
}

/// Compose and sign an encrypted direct message to `peer`.
///
/// The recipient rides in the `p` tag; the content is ciphertext only the
/// two endpoints can read.
pub fn direct_message(
    signer: &dyn Signer,
    clock: &LamportClock,
    peer: &PublicKey,
    text: &str,
) -> Result<Event> {
    let ciphertext = signer.encrypt(peer, text)?;
    let template = EventTemplate::new(signer.public_key(), NoteKind::DirectMessage, ciphertext)
        .tag_peer(peer)
        .tag_lamport(clock.now());
    signer.sign(template)
}

/// Compose and sign an encrypted application-data event carrying
/// `plaintext`, self-encrypted and tagged with the given `d` identifier.
pub fn app_data(
    signer: &dyn Signer,
    clock: &LamportClock,
    identifier: &str,
    plaintext: &str,
) -> Result<Event> {
    let me = signer.public_key();
    let ciphertext = signer.encrypt(&me, plaintext)?;
    let template = EventTemplate::new(me, NoteKind::AppData, ciphertext)
        .tag_identifier(identifier)
        .tag_lamport(clock.now());
    signer.sign(template)
}
