//! Replicated configuration stores.
//!
//! Two replication disciplines live side by side:
//!
//! - [`pins::PinConfig`]: a set folded from an operation log in delivery
//!   order (last-applied-wins).
//! - [`relays::RelayListConfig`]: per-URL last-writer-wins registers with
//!   counter-disambiguated, order-independent merge.
//!
//! Both persist account-scoped snapshots through the injected
//! [`kv::KvStore`] port and replicate as encrypted application-data events
//! distinguished by their `d` identifier.

pub mod kv;
pub mod pins;
pub mod relays;

pub use kv::{KvStore, MemoryKv, SqliteKv};
pub use pins::{PIN_LIST_IDENTIFIER, PinConfig};
pub use relays::{RELAY_LIST_IDENTIFIER, RelayAction, RelayListConfig, RelayUpdate};
