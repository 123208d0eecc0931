//! The embedded relational store: single-writer, typed repositories over a
//! bundled SQLite file (`store.db`).
//!
//! Mirrors the teacher's `Arc<Mutex<...>>`-guarded-connection pattern for
//! shared mutable state, except here the guarded value is a `rusqlite`
//! connection rather than an in-memory map. Repository methods are plain
//! synchronous calls (`node.rs` holds the lock only as long as one query
//! takes) rather than routed through `spawn_blocking` — see DESIGN.md.

pub mod envelopes;
pub mod files;
pub mod messages;
pub mod peers;
pub mod profile;
pub mod stickers;
pub mod theme;
pub mod types;

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::CoreResult;

pub struct Store {
    pub(crate) conn: Mutex<Connection>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS peers (
    peer_id TEXT PRIMARY KEY,
    display_handle TEXT NOT NULL,
    added_at INTEGER NOT NULL,
    pinned INTEGER NOT NULL DEFAULT 0,
    order_index INTEGER NOT NULL DEFAULT 0,
    envelope_id TEXT
);

CREATE TABLE IF NOT EXISTS envelopes (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    icon TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    msg_id TEXT PRIMARY KEY,
    chat_id TEXT NOT NULL,
    direction TEXT NOT NULL,
    sender_peer_id TEXT NOT NULL,
    content_type TEXT NOT NULL,
    text TEXT,
    file_hash TEXT,
    file_name TEXT,
    created_at INTEGER NOT NULL,
    status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, msg_id);

CREATE TABLE IF NOT EXISTS chat_latest_times (
    chat_id TEXT PRIMARY KEY,
    last_message_unix INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    hash TEXT PRIMARY KEY,
    size_bytes INTEGER NOT NULL,
    mime_hint TEXT NOT NULL,
    local_path TEXT NOT NULL,
    first_seen INTEGER NOT NULL,
    origin TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stickers (
    file_hash TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    size_bytes INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS profile (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    alias TEXT,
    avatar_ref TEXT
);

CREATE TABLE IF NOT EXISTS theme (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    config_json TEXT NOT NULL,
    selected_preset TEXT
);

-- Supplement (SPEC_FULL.md §C.3): durable mirror of the in-memory outbox so
-- a restart can be observed to forget queued pending sends, consistent with
-- "sessions do not span restarts".
CREATE TABLE IF NOT EXISTS outbox_frames (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    peer_id TEXT NOT NULL,
    msg_id TEXT NOT NULL,
    frame_bytes BLOB NOT NULL,
    enqueued_at INTEGER NOT NULL
);
"#;

impl Store {
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Wipes every identity-dependent table, used by `Vault::reset`'s
    /// caller (`Node::reset_vault`). The vault record itself is untouched
    /// here — that's the vault's own responsibility.
    pub fn wipe_all(&self) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "DELETE FROM peers; DELETE FROM envelopes; DELETE FROM messages;
             DELETE FROM chat_latest_times; DELETE FROM files; DELETE FROM stickers;
             DELETE FROM profile; DELETE FROM theme; DELETE FROM outbox_frames;",
        )?;
        Ok(())
    }
}
