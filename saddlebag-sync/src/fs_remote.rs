use crate::error::{Result, SyncError};
use crate::remote::{PullBatch, RemoteBackend};
use rusqlite::{params, Connection};
use saddlebag::OplogEntry;
use std::path::Path;

const DEFAULT_BATCH_SIZE: usize = 500;

const CREATE_OPLOG: &str = "CREATE TABLE IF NOT EXISTS oplog (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    device_id TEXT NOT NULL,
    op_type TEXT NOT NULL,
    field TEXT,
    value TEXT,
    timestamp TEXT NOT NULL
)";

/// A remote backed by a SQLite file at a shared path: the same `oplog`
/// schema as the local store, with the table's rowid as the resumable
/// cursor. Two processes pointing at one path share a log; locking comes
/// from SQLite itself.
pub struct FilesystemRemote {
    conn: Option<Connection>,
    batch_size: usize,
}

impl FilesystemRemote {
    /// Open (or create) the shared log at `path`, creating parent
    /// directories as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_batch_size(path, DEFAULT_BATCH_SIZE)
    }

    pub fn open_with_batch_size<P: AsRef<Path>>(path: P, batch_size: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SyncError::Remote(format!("create {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))?;
        conn.execute(CREATE_OPLOG, [])?;
        tracing::debug!(path = %path.display(), "opened filesystem remote");
        Ok(FilesystemRemote {
            conn: Some(conn),
            batch_size,
        })
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| SyncError::Remote("remote is closed".into()))
    }

    fn conn_mut(&mut self) -> Result<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| SyncError::Remote("remote is closed".into()))
    }
}

impl RemoteBackend for FilesystemRemote {
    // The whole batch lands in one transaction: a reader at the same
    // path never observes half a push.
    fn push(&mut self, entries: &[OplogEntry]) -> Result<()> {
        let tx = self.conn_mut()?.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO oplog (id, task_id, device_id, op_type, field, value, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.id,
                    entry.task_id,
                    entry.device_id,
                    entry.op.op_type(),
                    entry.op.field(),
                    entry.op.value(),
                    entry.timestamp,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn pull(&mut self, cursor: Option<&str>) -> Result<PullBatch> {
        let after: i64 = match cursor {
            None => 0,
            Some(raw) => raw
                .parse()
                .map_err(|_| SyncError::Remote(format!("bad cursor '{raw}'")))?,
        };
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT rowid, id, task_id, device_id, op_type, field, value, timestamp
             FROM oplog WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
        )?;
        let rows: Vec<(i64, saddlebag::Result<OplogEntry>)> = stmt
            .query_map(params![after, self.batch_size as i64], |row| {
                let rowid: i64 = row.get(0)?;
                let op_type: String = row.get(4)?;
                let entry = OplogEntry::from_parts(
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    &op_type,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                );
                Ok((rowid, entry))
            })?
            .collect::<rusqlite::Result<_>>()?;

        if rows.is_empty() {
            return Ok(PullBatch {
                entries: Vec::new(),
                cursor: cursor.map(str::to_owned),
            });
        }

        let max_rowid = rows.last().map(|(rowid, _)| *rowid).unwrap_or(after);
        let mut entries = Vec::with_capacity(rows.len());
        for (rowid, decoded) in rows {
            match decoded {
                Ok(entry) => entries.push(entry),
                // The cursor still advances past rows nobody can read;
                // they would otherwise wedge every future pull.
                Err(e) => tracing::warn!(rowid, error = %e, "skipping undecodable remote row"),
            }
        }
        Ok(PullBatch {
            entries,
            cursor: Some(max_rowid.to_string()),
        })
    }

    fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .map_err(|(_, e)| SyncError::Storage(e.to_string()))?;
        }
        Ok(())
    }
}
