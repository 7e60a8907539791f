//! Public key newtype.
//!
//! Keys are carried on the wire as 64-character lowercase hex strings but
//! handled internally as raw 32-byte arrays, which makes them `Copy` and
//! cheap to use as map keys.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A 32-byte public key identifying one account.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the string is not exactly 32 bytes
    /// of hex.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidKey {
            value: s.to_string(),
            reason: e.to_string(),
        })?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| Error::InvalidKey {
            value: s.to_string(),
            reason: "expected 32 bytes".to_string(),
        })?;
        Ok(Self(bytes))
    }

    /// Parse a key string that this process wrote itself.
    ///
    /// Panics on failure: a locally persisted key that no longer parses
    /// means the local state is corrupted, and continuing would fold events
    /// into views keyed by garbage.
    pub fn from_stored_hex(s: &str) -> Self {
        Self::from_hex(s).expect("stored public key must be 32 bytes of hex")
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(D::Error::custom)
    }
}
