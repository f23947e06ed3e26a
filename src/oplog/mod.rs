//! The append-only operation log.
//!
//! Every mutation is recorded as one or more immutable entries; the
//! materialized `tasks` rows are rebuilt from them by [`replay`]. Entries
//! are never rewritten or deleted, and the log grows monotonically per
//! device in rowid order.

pub mod replay;

use crate::error::{Result, SaddlebagError};
use crate::id::IdGenerator;
use crate::time;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// The operation an entry describes, as held in memory. The flat
/// `op_type`/`field`/`value` shape only exists at the storage and wire
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Full JSON of the initial task state.
    Create { value: String },
    /// One field-level change; `value` is `None` to clear a nullable
    /// scalar (SQL NULL, never the string "null").
    Update {
        field: String,
        value: Option<String>,
    },
    Delete,
}

impl Op {
    pub fn op_type(&self) -> &'static str {
        match self {
            Op::Create { .. } => "create",
            Op::Update { .. } => "update",
            Op::Delete => "delete",
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Op::Update { field, .. } => Some(field),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Op::Create { value } => Some(value),
            Op::Update { value, .. } => value.as_deref(),
            Op::Delete => None,
        }
    }
}

/// One immutable oplog record. Serializes to the flat wire object with
/// keys `id, task_id, device_id, op_type, field, value, timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireEntry", into = "WireEntry")]
pub struct OplogEntry {
    pub id: String,
    pub task_id: String,
    pub device_id: String,
    pub op: Op,
    /// Wall-clock ISO-8601 (millisecond, `Z`) of the write on the origin
    /// device. Compared lexically everywhere.
    pub timestamp: String,
}

impl OplogEntry {
    /// Assemble an entry from the flat column values, rejecting shapes
    /// that replay could not interpret.
    pub fn from_parts(
        id: String,
        task_id: String,
        device_id: String,
        op_type: &str,
        field: Option<String>,
        value: Option<String>,
        timestamp: String,
    ) -> Result<Self> {
        let op = match op_type {
            "create" => Op::Create {
                value: value.ok_or_else(|| SaddlebagError::MalformedEntry {
                    id: id.clone(),
                    reason: "create without value".into(),
                })?,
            },
            "update" => Op::Update {
                field: field.ok_or_else(|| SaddlebagError::MalformedEntry {
                    id: id.clone(),
                    reason: "update without field".into(),
                })?,
                value,
            },
            "delete" => Op::Delete,
            other => {
                return Err(SaddlebagError::MalformedEntry {
                    id,
                    reason: format!("unknown op_type '{other}'"),
                })
            }
        };
        Ok(OplogEntry {
            id,
            task_id,
            device_id,
            op,
            timestamp,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct WireEntry {
    id: String,
    task_id: String,
    device_id: String,
    op_type: String,
    field: Option<String>,
    value: Option<String>,
    timestamp: String,
}

impl From<OplogEntry> for WireEntry {
    fn from(e: OplogEntry) -> Self {
        WireEntry {
            id: e.id,
            task_id: e.task_id,
            device_id: e.device_id,
            op_type: e.op.op_type().to_string(),
            field: e.op.field().map(str::to_owned),
            value: e.op.value().map(str::to_owned),
            timestamp: e.timestamp,
        }
    }
}

impl TryFrom<WireEntry> for OplogEntry {
    type Error = SaddlebagError;

    fn try_from(w: WireEntry) -> Result<Self> {
        OplogEntry::from_parts(
            w.id,
            w.task_id,
            w.device_id,
            &w.op_type,
            w.field,
            w.value,
            w.timestamp,
        )
    }
}

/// Stamps and appends entries for one device. Holds the id generator, so
/// entry ids (and task ids minted through it) stay strictly increasing
/// for this writer.
pub struct OplogWriter {
    device_id: String,
    ids: IdGenerator,
}

impl OplogWriter {
    pub fn new(device_id: impl Into<String>) -> Self {
        OplogWriter {
            device_id: device_id.into(),
            ids: IdGenerator::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn mint_task_id(&self) -> String {
        self.ids.mint()
    }

    /// Append one entry. The timestamp defaults to now; passing one in
    /// keeps a multi-entry intent on a single instant and lets tests pin
    /// the clock. Existing rows are never touched.
    pub fn append(
        &self,
        conn: &Connection,
        task_id: &str,
        op: Op,
        timestamp: Option<String>,
    ) -> Result<OplogEntry> {
        let entry = OplogEntry {
            id: self.ids.mint(),
            task_id: task_id.to_string(),
            device_id: self.device_id.clone(),
            op,
            timestamp: timestamp.unwrap_or_else(time::now_utc),
        };
        insert(conn, &entry)?;
        tracing::debug!(
            entry_id = %entry.id,
            task_id,
            op_type = entry.op.op_type(),
            "oplog entry written"
        );
        Ok(entry)
    }
}

pub(crate) fn insert(conn: &Connection, entry: &OplogEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO oplog (id, task_id, device_id, op_type, field, value, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.id,
            entry.task_id,
            entry.device_id,
            entry.op.op_type(),
            entry.op.field(),
            entry.op.value(),
            entry.timestamp,
        ],
    )?;
    Ok(())
}

/// Insert unless an entry with the same id is already persisted. Returns
/// whether a row was written; this is what makes replay idempotent.
pub fn insert_ignore(conn: &Connection, entry: &OplogEntry) -> Result<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO oplog (id, task_id, device_id, op_type, field, value, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.id,
            entry.task_id,
            entry.device_id,
            entry.op.op_type(),
            entry.op.field(),
            entry.op.value(),
            entry.timestamp,
        ],
    )?;
    Ok(n > 0)
}

/// Read entries with rowid strictly above `after`, in rowid order,
/// optionally restricted to one origin device. Returns each entry with
/// its rowid so callers can advance a high-water mark.
pub fn entries_after(
    conn: &Connection,
    after: i64,
    device_id: Option<&str>,
) -> Result<Vec<(i64, OplogEntry)>> {
    let sql = match device_id {
        Some(_) => {
            "SELECT rowid, id, task_id, device_id, op_type, field, value, timestamp
             FROM oplog WHERE rowid > ?1 AND device_id = ?2 ORDER BY rowid"
        }
        None => {
            "SELECT rowid, id, task_id, device_id, op_type, field, value, timestamp
             FROM oplog WHERE rowid > ?1 ORDER BY rowid"
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let rows: Vec<(i64, Result<OplogEntry>)> = match device_id {
        Some(dev) => stmt
            .query_map(params![after, dev], decode_row)?
            .collect::<rusqlite::Result<_>>()?,
        None => stmt
            .query_map(params![after], decode_row)?
            .collect::<rusqlite::Result<_>>()?,
    };

    let mut entries = Vec::with_capacity(rows.len());
    for (rowid, decoded) in rows {
        match decoded {
            Ok(entry) => entries.push((rowid, entry)),
            Err(e) => tracing::warn!(rowid, error = %e, "skipping undecodable oplog row"),
        }
    }
    Ok(entries)
}

fn decode_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, Result<OplogEntry>)> {
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
}

pub fn count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT count(*) FROM oplog", [], |r| r.get(0))?)
}
