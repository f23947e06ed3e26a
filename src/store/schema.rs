//! Schema migrations. Each step runs in its own transaction together with
//! the `schema_version` bump, so a failure rolls back to the previous
//! version with nothing half-applied.

use crate::error::{Result, SaddlebagError};
use rusqlite::{Connection, Transaction};

/// Version the rest of the crate assumes. The oplog and sync cursors
/// arrived in v2.
pub const SCHEMA_VERSION: u32 = 2;

const CREATE_META: &str = "CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";

fn migrate_v1(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE TABLE tasks (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'todo',
            priority TEXT NOT NULL DEFAULT 'medium',
            owner TEXT,
            due_at TEXT,
            blocked_by TEXT NOT NULL DEFAULT '[]',
            labels TEXT NOT NULL DEFAULT '[]',
            notes TEXT NOT NULL DEFAULT '[]',
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        );
        CREATE INDEX idx_tasks_status ON tasks(status);",
    )
}

fn migrate_v2(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE TABLE oplog (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            device_id TEXT NOT NULL,
            op_type TEXT NOT NULL,
            field TEXT,
            value TEXT,
            timestamp TEXT NOT NULL
        );
        CREATE INDEX idx_oplog_task ON oplog(task_id);
        CREATE INDEX idx_oplog_device ON oplog(device_id);",
    )
}

const MIGRATIONS: &[(u32, fn(&Transaction<'_>) -> rusqlite::Result<()>)] =
    &[(1, migrate_v1), (2, migrate_v2)];

pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(CREATE_META, [])?;
    let current = version(conn)?;
    for (version, step) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        let tx = conn.transaction()?;
        step(&tx).map_err(|e| SaddlebagError::Migration {
            version: *version,
            reason: e.to_string(),
        })?;
        super::meta::set(&tx, super::meta::SCHEMA_VERSION_KEY, &version.to_string())?;
        tx.commit()?;
        tracing::info!(version = *version, "applied schema migration");
    }
    Ok(())
}

pub fn version(conn: &Connection) -> Result<u32> {
    let raw = super::meta::get(conn, super::meta::SCHEMA_VERSION_KEY)?;
    Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
}
