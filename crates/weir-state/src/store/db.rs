//! Durable event table backed by SQLite.
//!
//! One row per event, keyed by id, with the secondary fields the rest of
//! the layer filters on (`pubkey`, `created_at`, `kind`) as real columns.
//! Tags ride along as JSON.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use weir_core::{Event, NoteKind};

use crate::error::Result;

/// Current schema version. Increment when making breaking changes.
const SCHEMA_VERSION: i32 = 1;

/// SQLite-backed append-only event table.
///
/// The connection is protected by a mutex; all access goes through this
/// type, so single-connection WAL mode is sufficient.
pub struct EventDb {
    conn: Mutex<Connection>,
}

impl EventDb {
    /// Open or create an event database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("opening event database at {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert an event if its id is not already present.
    ///
    /// Returns `true` if the row was inserted, `false` if the id was
    /// already stored. Storage failures are fatal to the call and
    /// propagated unchanged.
    pub fn insert(&self, event: &Event) -> Result<bool> {
        let tags = serde_json::to_string(&event.tags)?;
        let changed = self.conn.lock().execute(
            "INSERT OR IGNORE INTO events (id, pubkey, created_at, kind, tags, content, sig)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                event.id,
                event.pubkey,
                event.created_at as i64,
                u32::from(event.kind),
                tags,
                event.content,
                event.sig,
            ],
        )?;
        Ok(changed == 1)
    }

    /// Point lookup by event id.
    pub fn get(&self, id: &str) -> Result<Option<Event>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, pubkey, created_at, kind, tags, content, sig
                 FROM events WHERE id = ?",
                params![id],
                row_to_event,
            )
            .optional()?;

        row.map(finish_event).transpose()
    }

    /// Remove an event. Returns `true` if a row was deleted.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .execute("DELETE FROM events WHERE id = ?", params![id])?;
        Ok(changed == 1)
    }

    /// Load every stored event, oldest `created_at` first.
    ///
    /// Used to rebuild the in-memory cache and reseed the logical clock on
    /// startup.
    pub fn load_all(&self) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, pubkey, created_at, kind, tags, content, sig
             FROM events ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], row_to_event)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(finish_event(row?)?);
        }
        Ok(events)
    }

    /// Number of stored events.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Row with tags still serialized.
struct RawRow {
    id: String,
    pubkey: String,
    created_at: i64,
    kind: u32,
    tags: String,
    content: String,
    sig: String,
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        pubkey: row.get(1)?,
        created_at: row.get(2)?,
        kind: row.get(3)?,
        tags: row.get(4)?,
        content: row.get(5)?,
        sig: row.get(6)?,
    })
}

fn finish_event(raw: RawRow) -> Result<Event> {
    Ok(Event {
        id: raw.id,
        pubkey: raw.pubkey,
        created_at: raw.created_at as u64,
        kind: NoteKind::from(raw.kind),
        tags: serde_json::from_str(&raw.tags)?,
        content: raw.content,
        sig: raw.sig,
    })
}

/// Initialize the schema, creating tables on a fresh database.
fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    if version.is_none() {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                pubkey TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                kind INTEGER NOT NULL,
                tags TEXT NOT NULL,
                content TEXT NOT NULL,
                sig TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_pubkey ON events(pubkey);
            CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
            CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);
            "#,
        )?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            params![SCHEMA_VERSION],
        )?;
    }

    Ok(())
}
