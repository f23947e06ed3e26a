//! The `meta` relation: a string key/value table holding the schema
//! version, the device identity, and per-device sync cursors.

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};

pub const SCHEMA_VERSION_KEY: &str = "schema_version";
pub const DEVICE_ID_KEY: &str = "device_id";

/// High-water mark (local oplog rowid) for entries already pushed.
pub fn push_rowid_key(device_id: &str) -> String {
    format!("push_rowid_{device_id}")
}

/// Opaque resume token from the last successful pull.
pub fn pull_cursor_key(device_id: &str) -> String {
    format!("pull_cursor_{device_id}")
}

pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM meta WHERE key = ?1", [key], |r| r.get(0))
        .optional()?;
    Ok(value)
}

pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}
