//! Error types for the state layer.

use thiserror::Error;

use crate::pool::PoolError;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconciling state.
///
/// Only store-level failures are fatal to a call; decrypt and payload
/// errors are resolved at the component that hit them (drop the one event,
/// keep going) and normally never reach a caller.
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying persistence failure. Propagated, never papered over.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error from the persistence layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the protocol data model (key parsing, decryption).
    #[error(transparent)]
    Core(#[from] weir_core::Error),

    /// Error from the relay pool collaborator.
    #[error("relay pool error: {0}")]
    Pool(#[from] PoolError),
}
