//! Error types shared across the protocol data model.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing or producing protocol records.
#[derive(Error, Debug)]
pub enum Error {
    /// A public key string is not 32 bytes of hex.
    #[error("invalid public key '{value}': {reason}")]
    InvalidKey {
        /// The offending key string (possibly truncated by the caller).
        value: String,
        /// Description of what's wrong.
        reason: String,
    },

    /// Ciphertext could not be decrypted with the held capability.
    ///
    /// This is the local-recoverable failure of the error taxonomy: callers
    /// drop the one affected event and continue.
    #[error("decrypt failed: {0}")]
    Decrypt(String),

    /// Plaintext could not be encrypted for the given peer.
    #[error("encrypt failed: {0}")]
    Encrypt(String),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
