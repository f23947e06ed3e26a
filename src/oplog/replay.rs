//! Deterministic rebuild of materialized tasks from oplog history.
//!
//! [`apply`] takes a batch that may contain duplicates, arrive out of
//! timestamp order, or reference tasks whose `create` has not been seen
//! yet. It persists whatever is new, then rebuilds every touched task
//! from its complete history. The result depends only on the multiset of
//! entries ever seen: applying the same batch twice, or the same entries
//! in any order, converges on identical rows.

use super::{insert_ignore, Op, OplogEntry};
use crate::error::Result;
use crate::time;
use crate::types::{dedup_preserving_order, TaskPriority, TaskStatus};
use indexmap::IndexMap;
use rusqlite::{params, Connection};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Entries newly persisted (duplicates of already-seen ids excluded).
    pub inserted: usize,
    /// Tasks whose materialized row was rewritten. Tasks still missing
    /// their `create` are left for a later batch.
    pub rebuilt: usize,
}

/// Persist a batch and rebuild every task it touches, inside one
/// transaction: either all of it lands or none of it does.
pub fn apply(conn: &mut Connection, entries: &[OplogEntry]) -> Result<ReplayOutcome> {
    let tx = conn.transaction()?;

    let mut inserted = 0;
    let mut touched: BTreeSet<&str> = BTreeSet::new();
    for entry in entries {
        if insert_ignore(&tx, entry)? {
            inserted += 1;
        }
        touched.insert(entry.task_id.as_str());
    }

    let mut rebuilt = 0;
    for task_id in touched {
        if rebuild_task(&tx, task_id)? {
            rebuilt += 1;
        }
    }

    tx.commit()?;
    tracing::debug!(batch = entries.len(), inserted, rebuilt, "replayed oplog batch");
    Ok(ReplayOutcome { inserted, rebuilt })
}

/// Working state while folding one task's history. Timestamps stay as the
/// raw entry strings so the upserted row is byte-identical on every
/// device that has the same entries.
struct TaskState {
    title: String,
    status: TaskStatus,
    priority: TaskPriority,
    owner: Option<String>,
    due_at: Option<String>,
    labels: Vec<String>,
    blocked_by: Vec<String>,
    notes: Vec<String>,
    metadata: IndexMap<String, String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl TaskState {
    /// Initialize from a `create` payload. Each field recovers
    /// independently: an unusable value falls back to its default without
    /// taking the rest of the task down.
    fn from_create(obj: &serde_json::Map<String, serde_json::Value>, timestamp: &str) -> Self {
        TaskState {
            title: obj
                .get("title")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or("Untitled")
                .to_string(),
            status: obj
                .get("status")
                .and_then(|v| v.as_str())
                .and_then(TaskStatus::parse)
                .unwrap_or_default(),
            priority: obj
                .get("priority")
                .and_then(|v| v.as_str())
                .and_then(TaskPriority::parse)
                .unwrap_or_default(),
            owner: obj
                .get("owner")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
            due_at: obj
                .get("due_at")
                .and_then(|v| v.as_str())
                .and_then(time::parse_naive)
                .map(|d| time::format_naive(&d)),
            labels: dedup_preserving_order(json_string_vec(obj.get("labels"))),
            blocked_by: json_string_vec(obj.get("blocked_by")),
            notes: dedup_preserving_order(json_string_vec(obj.get("notes"))),
            metadata: obj
                .get("metadata")
                .and_then(|v| {
                    serde_json::from_value::<IndexMap<String, String>>(v.clone()).ok()
                })
                .unwrap_or_default(),
            created_at: timestamp.to_string(),
            updated_at: timestamp.to_string(),
            deleted_at: None,
        }
    }

    fn bump_updated(&mut self, timestamp: &str) {
        if timestamp > self.updated_at.as_str() {
            self.updated_at = timestamp.to_string();
        }
    }

    /// An applied update at or after the delete restores the task.
    fn resurrect(&mut self, timestamp: &str) {
        if self
            .deleted_at
            .as_deref()
            .is_some_and(|deleted| timestamp >= deleted)
        {
            self.deleted_at = None;
        }
    }
}

fn json_string_vec(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
        .unwrap_or_default()
}

/// Rebuild one task from its complete persisted history. Returns whether
/// a row was materialized; a task with no (or an unreadable) `create`
/// entry is legal during sync and is simply left for later.
fn rebuild_task(conn: &Connection, task_id: &str) -> Result<bool> {
    let entries = entries_for_task(conn, task_id)?;

    let Some(create_idx) = entries
        .iter()
        .position(|e| matches!(e.op, Op::Create { .. }))
    else {
        return Ok(false);
    };
    let create = &entries[create_idx];
    let Op::Create { value } = &create.op else {
        unreachable!()
    };
    let parsed: Option<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_str::<serde_json::Value>(value)
            .ok()
            .and_then(|v| match v {
                serde_json::Value::Object(obj) => Some(obj),
                _ => None,
            });
    let Some(obj) = parsed else {
        tracing::warn!(task_id, entry_id = %create.id, "unreadable create payload, task not rebuilt");
        return Ok(false);
    };

    let mut state = TaskState::from_create(&obj, &create.timestamp);

    // Makes delete suppression O(1) per delete entry: a delete loses to
    // any update at or after its timestamp, wherever that update sits in
    // the walk.
    let latest_update: Option<&str> = entries
        .iter()
        .filter_map(|e| match e.op {
            Op::Update { .. } => Some(e.timestamp.as_str()),
            _ => None,
        })
        .max();

    // Per-field last-writer record: (timestamp, entry id). Only valid
    // values claim the slot, so a bogus enum value cannot shadow an
    // earlier good write.
    let mut winners: HashMap<&str, (&str, &str)> = HashMap::new();

    for entry in &entries[create_idx + 1..] {
        match &entry.op {
            // A second create for the same task id (distinct entry id) is
            // ignored; the first in total order is authoritative.
            Op::Create { .. } => {}
            Op::Delete => {
                let applies = latest_update.is_none_or(|u| u < entry.timestamp.as_str());
                if applies {
                    state.deleted_at = Some(entry.timestamp.clone());
                    state.bump_updated(&entry.timestamp);
                }
            }
            Op::Update { field, value } => {
                apply_update(
                    &mut state,
                    &mut winners,
                    field,
                    value.as_deref(),
                    &entry.timestamp,
                    &entry.id,
                );
            }
        }
    }

    upsert(conn, task_id, &state)?;
    Ok(true)
}

fn apply_update<'e>(
    state: &mut TaskState,
    winners: &mut HashMap<&'e str, (&'e str, &'e str)>,
    field: &'e str,
    value: Option<&str>,
    timestamp: &'e str,
    entry_id: &'e str,
) {
    // Notes accumulate: every distinct note survives, no LWW. The clear
    // sentinel is the only way notes shrink.
    if field == "notes" {
        let Some(note) = value else { return };
        state.bump_updated(timestamp);
        state.resurrect(timestamp);
        if !state.notes.iter().any(|n| n == note) {
            state.notes.push(note.to_string());
        }
        return;
    }

    let wins = |winners: &HashMap<&str, (&str, &str)>| {
        winners
            .get(field)
            .is_none_or(|(ts, id)| (timestamp, entry_id) > (*ts, *id))
    };
    let claim = |winners: &mut HashMap<&'e str, (&'e str, &'e str)>| {
        winners.insert(field, (timestamp, entry_id));
    };

    match field {
        "notes_clear" => {
            if !wins(winners) {
                return;
            }
            claim(winners);
            state.notes.clear();
        }
        "title" => {
            let Some(title) = value else { return };
            if !wins(winners) {
                return;
            }
            claim(winners);
            state.title = title.to_string();
        }
        "status" => {
            let Some(status) = value.and_then(TaskStatus::parse) else {
                return;
            };
            if !wins(winners) {
                return;
            }
            claim(winners);
            state.status = status;
        }
        "priority" => {
            let Some(priority) = value.and_then(TaskPriority::parse) else {
                return;
            };
            if !wins(winners) {
                return;
            }
            claim(winners);
            state.priority = priority;
        }
        "owner" => {
            if !wins(winners) {
                return;
            }
            claim(winners);
            state.owner = value.map(str::to_owned);
        }
        "due_at" => {
            let parsed = match value {
                None => None,
                Some(raw) => match time::parse_naive(raw) {
                    Some(d) => Some(time::format_naive(&d)),
                    // Unparseable date: not a valid write, no claim.
                    None => return,
                },
            };
            if !wins(winners) {
                return;
            }
            claim(winners);
            state.due_at = parsed;
        }
        "labels" => {
            let Some(items) = value.and_then(parse_string_vec) else {
                return;
            };
            if !wins(winners) {
                return;
            }
            claim(winners);
            state.labels = dedup_preserving_order(items);
        }
        "blocked_by" => {
            let Some(items) = value.and_then(parse_string_vec) else {
                return;
            };
            if !wins(winners) {
                return;
            }
            claim(winners);
            state.blocked_by = items;
        }
        "metadata" => {
            let Some(map) = value
                .and_then(|v| serde_json::from_str::<IndexMap<String, String>>(v).ok())
            else {
                return;
            };
            if !wins(winners) {
                return;
            }
            claim(winners);
            state.metadata = map;
        }
        // Unknown fields (from newer writers) are dropped entirely.
        _ => return,
    }

    state.bump_updated(timestamp);
    state.resurrect(timestamp);
}

fn parse_string_vec(raw: &str) -> Option<Vec<String>> {
    serde_json::from_str::<Vec<String>>(raw).ok()
}

/// All persisted entries for one task in replay order. Both keys matter:
/// the id tiebreak keeps the order total when two entries share a
/// millisecond. Rows that cannot be interpreted are skipped.
fn entries_for_task(conn: &Connection, task_id: &str) -> Result<Vec<OplogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, task_id, device_id, op_type, field, value, timestamp
         FROM oplog WHERE task_id = ?1 ORDER BY timestamp ASC, id ASC",
    )?;
    let rows: Vec<Result<OplogEntry>> = stmt
        .query_map([task_id], |row| {
            let op_type: String = row.get(3)?;
            Ok(OplogEntry::from_parts(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                &op_type,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?
        .collect::<rusqlite::Result<_>>()?;

    let mut entries = Vec::with_capacity(rows.len());
    for decoded in rows {
        match decoded {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!(task_id, error = %e, "skipping malformed oplog entry"),
        }
    }
    Ok(entries)
}

fn upsert(conn: &Connection, task_id: &str, state: &TaskState) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO tasks
         (id, title, status, priority, owner, due_at, blocked_by, labels, notes, metadata,
          created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            task_id,
            state.title,
            state.status.as_str(),
            state.priority.as_str(),
            state.owner,
            state.due_at,
            serde_json::to_string(&state.blocked_by)?,
            serde_json::to_string(&state.labels)?,
            serde_json::to_string(&state.notes)?,
            serde_json::to_string(&state.metadata)?,
            state.created_at,
            state.updated_at,
            state.deleted_at,
        ],
    )?;
    Ok(())
}
