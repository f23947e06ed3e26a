//! Materialized-view operations over the `tasks` relation.
//!
//! This layer has no oplog awareness: reads are public, but mutations are
//! crate-private so they can only happen through the task service, which
//! pairs every repository write with its oplog entries in one transaction.

use crate::error::{Result, SaddlebagError};
use crate::time;
use crate::types::{dedup_preserving_order, ListFilter, SortKey, Task, TaskPatch, TaskStatus};
use indexmap::IndexMap;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

const TASK_COLUMNS: &str =
    "id, title, status, priority, owner, due_at, blocked_by, labels, notes, metadata, \
     created_at, updated_at, deleted_at";

/// Length of a full task id; anything shorter is treated as a prefix.
const FULL_ID_LEN: usize = 36;

/// Outcome of resolving an id-or-prefix against live tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixMatch {
    None,
    One(String),
    Many(Vec<String>),
}

/// Resolve `input` to a task id. An exact match wins outright, even when
/// the same string also prefixes other ids; only shorter inputs fall
/// through to the prefix scan. Soft-deleted tasks never match.
pub fn resolve(conn: &Connection, input: &str) -> Result<PrefixMatch> {
    let exact: Option<String> = conn
        .query_row(
            "SELECT id FROM tasks WHERE id = ?1 AND deleted_at IS NULL",
            [input],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = exact {
        return Ok(PrefixMatch::One(id));
    }
    if input.is_empty() || input.len() >= FULL_ID_LEN {
        return Ok(PrefixMatch::None);
    }

    let mut stmt = conn.prepare(
        "SELECT id FROM tasks WHERE deleted_at IS NULL AND substr(id, 1, ?1) = ?2 ORDER BY id",
    )?;
    let matches: Vec<String> = stmt
        .query_map(params![input.len() as i64, input], |r| r.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    Ok(match matches.len() {
        0 => PrefixMatch::None,
        1 => PrefixMatch::One(matches.into_iter().next().unwrap()),
        _ => PrefixMatch::Many(matches),
    })
}

/// Resolve to exactly one id, or `Err(AmbiguousPrefix)` on 2+ matches.
pub(crate) fn require_one(conn: &Connection, input: &str) -> Result<Option<String>> {
    match resolve(conn, input)? {
        PrefixMatch::None => Ok(None),
        PrefixMatch::One(id) => Ok(Some(id)),
        PrefixMatch::Many(matches) => Err(SaddlebagError::AmbiguousPrefix {
            prefix: input.to_string(),
            matches,
        }),
    }
}

pub(crate) fn create(conn: &Connection, task: &Task) -> Result<()> {
    let insert = format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)");
    let result = conn.execute(
        &insert,
        params![
            task.id,
            task.title,
            task.status.as_str(),
            task.priority.as_str(),
            task.owner,
            task.due_at.as_ref().map(time::format_naive),
            serde_json::to_string(&task.blocked_by)?,
            serde_json::to_string(&task.labels)?,
            serde_json::to_string(&task.notes)?,
            serde_json::to_string(&task.metadata)?,
            time::format_utc(&task.created_at),
            time::format_utc(&task.updated_at),
            task.deleted_at.as_ref().map(time::format_utc),
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(SaddlebagError::DuplicateTaskId(task.id.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Fetch by id or unique prefix. Absent and soft-deleted tasks read as
/// `None`.
pub fn get(conn: &Connection, id_or_prefix: &str) -> Result<Option<Task>> {
    match require_one(conn, id_or_prefix)? {
        Some(id) => load(conn, &id),
        None => Ok(None),
    }
}

/// Fetch by exact id, including soft-deleted rows. Used for idempotent
/// create checks; normal reads go through [`get`].
pub(crate) fn load_raw(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
    let task = conn
        .query_row(&sql, [id], |row| task_from_row(row))
        .optional()?;
    Ok(task)
}

fn load(conn: &Connection, id: &str) -> Result<Option<Task>> {
    Ok(load_raw(conn, id)?.filter(|t| !t.is_deleted()))
}

pub(crate) fn update(
    conn: &Connection,
    id_or_prefix: &str,
    patch: &TaskPatch,
    now: &str,
) -> Result<Option<Task>> {
    let Some(id) = require_one(conn, id_or_prefix)? else {
        return Ok(None);
    };
    let Some(mut task) = load(conn, &id)? else {
        return Ok(None);
    };
    if patch.is_empty() {
        return Ok(Some(task));
    }

    if let Some(title) = &patch.title {
        task.title = title.clone();
    }
    if let Some(status) = patch.status {
        task.status = status;
    }
    if let Some(priority) = patch.priority {
        task.priority = priority;
    }
    if let Some(owner) = &patch.owner {
        task.owner = owner.clone();
    }
    if let Some(due_at) = &patch.due_at {
        task.due_at = *due_at;
    }
    if let Some(labels) = &patch.labels {
        task.labels = dedup_preserving_order(labels.clone());
    }
    if let Some(blocked_by) = &patch.blocked_by {
        task.blocked_by = blocked_by.clone();
    }
    if let Some(metadata) = &patch.metadata {
        task.metadata = metadata.clone();
    }
    task.updated_at = time::parse_utc_lenient(now);

    conn.execute(
        "UPDATE tasks SET title = ?2, status = ?3, priority = ?4, owner = ?5, due_at = ?6, \
         blocked_by = ?7, labels = ?8, metadata = ?9, updated_at = ?10 WHERE id = ?1",
        params![
            id,
            task.title,
            task.status.as_str(),
            task.priority.as_str(),
            task.owner,
            task.due_at.as_ref().map(time::format_naive),
            serde_json::to_string(&task.blocked_by)?,
            serde_json::to_string(&task.labels)?,
            serde_json::to_string(&task.metadata)?,
            now,
        ],
    )?;
    Ok(Some(task))
}

/// Append one note. A note equal to one already present is silently
/// discarded and the row is left untouched.
pub(crate) fn append_note(
    conn: &Connection,
    id_or_prefix: &str,
    note: &str,
    now: &str,
) -> Result<Option<Task>> {
    let Some(id) = require_one(conn, id_or_prefix)? else {
        return Ok(None);
    };
    let Some(mut task) = load(conn, &id)? else {
        return Ok(None);
    };
    if task.notes.iter().any(|n| n == note) {
        return Ok(Some(task));
    }
    task.notes.push(note.to_string());
    task.updated_at = time::parse_utc_lenient(now);
    conn.execute(
        "UPDATE tasks SET notes = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, serde_json::to_string(&task.notes)?, now],
    )?;
    Ok(Some(task))
}

/// Replace the whole notes sequence. Takes a full id; the service resolves
/// prefixes before composing the oplog batch.
pub(crate) fn set_notes(
    conn: &Connection,
    id: &str,
    notes: &[String],
    now: &str,
) -> Result<Option<Task>> {
    let Some(mut task) = load(conn, id)? else {
        return Ok(None);
    };
    task.notes = notes.to_vec();
    task.updated_at = time::parse_utc_lenient(now);
    conn.execute(
        "UPDATE tasks SET notes = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, serde_json::to_string(&task.notes)?, now],
    )?;
    Ok(Some(task))
}

/// Soft delete: stamps `deleted_at`, keeping the row so later updates can
/// restore it. Returns whether a live task was present.
pub(crate) fn delete_task(conn: &Connection, id_or_prefix: &str, now: &str) -> Result<bool> {
    let Some(id) = require_one(conn, id_or_prefix)? else {
        return Ok(false);
    };
    conn.execute(
        "UPDATE tasks SET deleted_at = ?2, updated_at = ?2 WHERE id = ?1",
        params![id, now],
    )?;
    Ok(true)
}

/// List live tasks with filters, sorting and pagination.
pub fn list(conn: &Connection, filter: &ListFilter) -> Result<Vec<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE deleted_at IS NULL");
    let mut stmt = conn.prepare(&sql)?;
    let all: Vec<Task> = stmt
        .query_map([], |row| task_from_row(row))?
        .collect::<rusqlite::Result<_>>()?;

    // Blocker statuses come from the live set itself: an unknown or
    // deleted blocker id does not block.
    let status_by_id: HashMap<&str, TaskStatus> = all
        .iter()
        .map(|t| (t.id.as_str(), t.status))
        .collect();

    let search = filter.search.as_ref().map(|s| s.to_lowercase());
    let mut tasks: Vec<Task> = all
        .iter()
        .filter(|t| filter.status.map_or(true, |s| t.status == s))
        .filter(|t| filter.priority.map_or(true, |p| t.priority == p))
        .filter(|t| {
            filter
                .owner
                .as_ref()
                .map_or(true, |o| t.owner.as_deref() == Some(o.as_str()))
        })
        .filter(|t| {
            filter
                .label
                .as_ref()
                .map_or(true, |l| t.labels.iter().any(|x| x == l))
        })
        .filter(|t| {
            search
                .as_ref()
                .map_or(true, |q| t.title.to_lowercase().contains(q))
        })
        .filter(|t| {
            !filter.actionable
                || !t.blocked_by.iter().any(|b| {
                    status_by_id
                        .get(b.as_str())
                        .is_some_and(|s| !s.is_done())
                })
        })
        .cloned()
        .collect();

    match filter.sort {
        SortKey::Priority => {
            tasks.sort_by(|a, b| {
                (a.priority.rank(), a.created_at, &a.id)
                    .cmp(&(b.priority.rank(), b.created_at, &b.id))
            });
        }
        SortKey::Due => {
            tasks.sort_by(|a, b| match (&a.due_at, &b.due_at) {
                (Some(x), Some(y)) => (x, a.created_at, &a.id).cmp(&(y, b.created_at, &b.id)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => (a.created_at, &a.id).cmp(&(b.created_at, &b.id)),
            });
        }
        SortKey::Title => {
            tasks.sort_by(|a, b| {
                (a.title.to_lowercase(), a.created_at, &a.id)
                    .cmp(&(b.title.to_lowercase(), b.created_at, &b.id))
            });
        }
        SortKey::Created => {
            tasks.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        }
    }

    Ok(tasks
        .into_iter()
        .skip(filter.offset)
        .take(filter.limit.unwrap_or(usize::MAX))
        .collect())
}

/// Decode a row. Corrupt JSON in a collection column recovers as the
/// empty default rather than failing the read.
fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let blocked_by: String = row.get(6)?;
    let labels: String = row.get(7)?;
    let notes: String = row.get(8)?;
    let metadata: String = row.get(9)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;
    let status: String = row.get(2)?;
    let priority: String = row.get(3)?;

    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        status: TaskStatus::parse(&status).unwrap_or_default(),
        priority: crate::types::TaskPriority::parse(&priority).unwrap_or_default(),
        owner: row.get(4)?,
        due_at: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| time::parse_naive(&s)),
        blocked_by: serde_json::from_str(&blocked_by).unwrap_or_default(),
        labels: serde_json::from_str(&labels).unwrap_or_default(),
        notes: serde_json::from_str(&notes).unwrap_or_default(),
        metadata: serde_json::from_str::<IndexMap<String, String>>(&metadata)
            .unwrap_or_default(),
        created_at: time::parse_utc_lenient(&created_at),
        updated_at: time::parse_utc_lenient(&updated_at),
        deleted_at: row
            .get::<_, Option<String>>(12)?
            .map(|s| time::parse_utc_lenient(&s)),
    })
}
