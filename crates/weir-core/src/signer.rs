//! Account capability: signing and peer-wise encryption.
//!
//! All components that touch private-kind events depend on a capability
//! object bound to one local identity. The real implementation wraps the
//! platform key store and is injected by the embedding application; this
//! crate defines the trait and ships an in-memory stand-in for tests.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::event::{Event, EventTemplate, compute_event_id};
use crate::keys::PublicKey;

/// Capability object bound to one local identity.
///
/// Encryption and decryption are peer-wise: the same `peer` key must be
/// passed to `decrypt` that the sender passed to `encrypt`.
pub trait Signer: Send + Sync {
    /// The identity this capability is bound to.
    fn public_key(&self) -> PublicKey;

    /// Compute the template's id and produce a signed event.
    fn sign(&self, template: EventTemplate) -> Result<Event>;

    /// Encrypt plaintext for a peer.
    fn encrypt(&self, peer: &PublicKey, plaintext: &str) -> Result<String>;

    /// Decrypt ciphertext from a peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decrypt`] when the ciphertext is malformed or was
    /// not produced for this identity.
    fn decrypt(&self, peer: &PublicKey, ciphertext: &str) -> Result<String>;
}

/// Ciphertext prefix produced by [`MemorySigner`].
const MEMORY_CIPHER_PREFIX: &str = "v0:";

/// In-memory signer for tests.
///
/// Ids are real SHA-256 content hashes; signatures and the reversible
/// marker+hex "cipher" are stand-ins with no cryptographic value. The
/// decrypt path does fail on ciphertext it did not produce, which is what
/// the store's error handling needs exercised.
#[derive(Debug, Clone)]
pub struct MemorySigner {
    key: PublicKey,
}

impl MemorySigner {
    /// A signer bound to a deterministic identity derived from `seed`.
    pub fn from_seed(seed: u8) -> Self {
        let mut bytes = [seed; 32];
        // Avoid the all-zero key so hex round-trips are visibly distinct
        bytes[31] = seed.wrapping_add(1);
        Self {
            key: PublicKey::from_bytes(bytes),
        }
    }
}

impl Signer for MemorySigner {
    fn public_key(&self) -> PublicKey {
        self.key
    }

    fn sign(&self, template: EventTemplate) -> Result<Event> {
        let id = compute_event_id(&template);
        // 64 bytes of deterministic filler standing in for a signature
        let mut hasher = Sha256::new();
        hasher.update(id.as_bytes());
        hasher.update(self.key.as_bytes());
        let half = hex::encode(hasher.finalize());
        let sig = format!("{half}{half}");

        Ok(Event {
            id,
            pubkey: template.pubkey.to_hex(),
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            content: template.content,
            sig,
        })
    }

    fn encrypt(&self, _peer: &PublicKey, plaintext: &str) -> Result<String> {
        Ok(format!(
            "{}{}",
            MEMORY_CIPHER_PREFIX,
            hex::encode(plaintext.as_bytes())
        ))
    }

    fn decrypt(&self, _peer: &PublicKey, ciphertext: &str) -> Result<String> {
        let payload = ciphertext
            .strip_prefix(MEMORY_CIPHER_PREFIX)
            .ok_or_else(|| Error::Decrypt("unrecognized ciphertext format".to_string()))?;
        let bytes =
            hex::decode(payload).map_err(|e| Error::Decrypt(format!("bad payload: {e}")))?;
        String::from_utf8(bytes).map_err(|e| Error::Decrypt(format!("not utf-8: {e}")))
    }
}
