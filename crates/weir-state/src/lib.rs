//! Event-sourced chat state reconciliation.
//!
//! This crate folds a partially-ordered stream of signed events, arriving
//! from multiple relays with no shared clock, into consistent local views:
//! conversation lists, pinned conversations, and relay membership.
//!
//! # Modules
//!
//! - [`store`] - Deduplicating event store with a multicast change stream
//! - [`conversations`] - Per-peer summary folding (contacts vs strangers)
//! - [`config`] - Replicated pin list and relay list
//! - [`pool`] - Relay transport port (consumed, not implemented)
//! - [`sync`] - On-demand profile/event syncers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  relay transport │  (external collaborator, see pool::RelayPool)
//! └────────┬─────────┘
//!          │ add_event
//!          ▼
//! ┌──────────────────┐
//! │    EventStore    │  dedupe by id, classify, decrypt once
//! └────────┬─────────┘
//!          │ multicast (every subscriber sees every event)
//!          ├────────────────────┬─────────────────────┐
//!          ▼                    ▼                     ▼
//! ┌──────────────────┐ ┌─────────────────┐ ┌──────────────────┐
//! │ConversationLists │ │    PinConfig    │ │ RelayListConfig  │
//! │ (max-by-time)    │ │ (last-applied)  │ │ (vc-based LWW)   │
//! └──────────────────┘ └─────────────────┘ └──────────────────┘
//! ```
//!
//! Consumers are order-independent where the transport is unordered: the
//! conversation fold and relay-list merge converge for any arrival order.
//! The pin list is the documented exception (delivery-order semantics).

pub mod config;
pub mod conversations;
pub mod error;
pub mod pool;
pub mod store;
pub mod sync;

pub use error::{Error, Result};

pub use config::{
    KvStore, MemoryKv, PIN_LIST_IDENTIFIER, PinConfig, RELAY_LIST_IDENTIFIER, RelayAction,
    RelayListConfig, RelayUpdate, SqliteKv,
};
pub use conversations::{ConversationGroup, ConversationLists, ConversationSummary, Profile};
pub use pool::{Filter, MemoryPool, PoolError, RelayPool, RelayedEvent};
pub use store::{DEBOUNCE_WINDOW, EventDb, EventStore, Multicast, Subscription};
pub use sync::{EventSyncer, ProfileSyncer};
