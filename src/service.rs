//! The task service: the only public surface for mutation.
//!
//! Every intent is compiled to a declarative list of oplog operations,
//! then a single transactional step writes those entries and applies the
//! matching repository change. A committed oplog entry without its
//! materialized counterpart (or vice versa) would desynchronize replay,
//! so the two never commit separately.

use crate::error::Result;
use crate::oplog::{Op, OplogWriter};
use crate::store::{repository, Store};
use crate::time;
use crate::types::{dedup_preserving_order, ListFilter, NewTask, Task, TaskPatch};
use rusqlite::Transaction;
use std::path::Path;

pub struct TaskService {
    store: Store,
    writer: OplogWriter,
}

impl TaskService {
    /// Open the store at `path` and wire a writer to its device identity.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Store::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Store::open_in_memory()?))
    }

    pub fn new(store: Store) -> Self {
        let writer = OplogWriter::new(store.device_id());
        TaskService { store, writer }
    }

    pub fn device_id(&self) -> &str {
        self.writer.device_id()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Mutable store access, e.g. to hand the handle to a sync engine.
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn into_store(self) -> Store {
        self.store
    }

    /// Create a task. When the caller supplies an id that already exists
    /// (replayed request, retried import), the existing task is returned
    /// untouched: no oplog write, no repository write.
    pub fn add(&mut self, input: NewTask) -> Result<Task> {
        let id = match &input.id {
            Some(id) => id.clone(),
            None => self.writer.mint_task_id(),
        };
        if let Some(existing) = repository::load_raw(self.store.conn(), &id)? {
            tracing::debug!(task_id = %id, "add with existing id, returning current state");
            return Ok(existing);
        }

        let now = time::now_utc();
        let task = Task::materialize(id.clone(), input, &now);
        let ops = vec![Op::Create {
            value: serde_json::to_string(&task)?,
        }];

        let tx = self.store.transaction()?;
        write_ops(&self.writer, &tx, &id, ops, &now)?;
        repository::create(&tx, &task)?;
        tx.commit()?;
        tracing::debug!(task_id = %id, "task created");
        Ok(task)
    }

    /// Fetch by id or unique prefix. `Err(AmbiguousPrefix)` on 2+ matches.
    pub fn get(&self, id_or_prefix: &str) -> Result<Option<Task>> {
        repository::get(self.store.conn(), id_or_prefix)
    }

    pub fn list(&self, filter: &ListFilter) -> Result<Vec<Task>> {
        repository::list(self.store.conn(), filter)
    }

    /// Apply a partial update: one oplog entry per changed field, all on
    /// one timestamp.
    pub fn update(&mut self, id_or_prefix: &str, patch: TaskPatch) -> Result<Option<Task>> {
        self.update_with_note(id_or_prefix, patch, None)
    }

    /// Partial update plus an optional note in the same atomic intent.
    /// The note entry is appended after the field entries and is subject
    /// to the usual dedup rule.
    pub fn update_with_note(
        &mut self,
        id_or_prefix: &str,
        patch: TaskPatch,
        note: Option<&str>,
    ) -> Result<Option<Task>> {
        let Some(task_id) = repository::require_one(self.store.conn(), id_or_prefix)? else {
            return Ok(None);
        };
        let Some(current) = repository::get(self.store.conn(), &task_id)? else {
            return Ok(None);
        };

        let note = note
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .filter(|n| !current.notes.iter().any(|existing| existing == n));

        let mut ops = field_ops(&patch);
        if let Some(n) = note {
            ops.push(Op::Update {
                field: "notes".into(),
                value: Some(n.to_string()),
            });
        }
        if ops.is_empty() {
            return Ok(Some(current));
        }

        let now = time::now_utc();
        let tx = self.store.transaction()?;
        write_ops(&self.writer, &tx, &task_id, ops, &now)?;
        let mut updated = match repository::update(&tx, &task_id, &patch, &now)? {
            Some(task) => task,
            None => return Ok(None),
        };
        if let Some(n) = note {
            if let Some(task) = repository::append_note(&tx, &task_id, n, &now)? {
                updated = task;
            }
        }
        tx.commit()?;
        tracing::debug!(task_id = %task_id, "task updated");
        Ok(Some(updated))
    }

    /// Append one note iff it is non-empty after trimming and not already
    /// present. A duplicate or empty note writes nothing at all.
    pub fn add_note(&mut self, id_or_prefix: &str, note: &str) -> Result<Option<Task>> {
        self.update_with_note(id_or_prefix, TaskPatch::default(), Some(note))
    }

    /// Drop every note. This is the only operation that shrinks the notes
    /// sequence.
    pub fn clear_notes(&mut self, id_or_prefix: &str) -> Result<Option<Task>> {
        let Some(task_id) = repository::require_one(self.store.conn(), id_or_prefix)? else {
            return Ok(None);
        };
        let now = time::now_utc();
        let tx = self.store.transaction()?;
        write_ops(&self.writer, &tx, &task_id, vec![notes_clear_op()], &now)?;
        let updated = repository::set_notes(&tx, &task_id, &[], &now)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Replace the notes sequence wholesale: a clear entry followed by one
    /// add per distinct new note, all on one timestamp. The clear is
    /// emitted first so replay sees it before the adds.
    pub fn replace_notes(&mut self, id_or_prefix: &str, notes: Vec<String>) -> Result<Option<Task>> {
        let Some(task_id) = repository::require_one(self.store.conn(), id_or_prefix)? else {
            return Ok(None);
        };
        let notes = dedup_preserving_order(
            notes
                .iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
        );
        let mut ops = vec![notes_clear_op()];
        ops.extend(notes.iter().map(|n| Op::Update {
            field: "notes".into(),
            value: Some(n.clone()),
        }));

        let now = time::now_utc();
        let tx = self.store.transaction()?;
        write_ops(&self.writer, &tx, &task_id, ops, &now)?;
        let updated = repository::set_notes(&tx, &task_id, &notes, &now)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Soft delete. Returns whether a live task was present; deleting an
    /// absent (or already deleted) task writes nothing.
    pub fn delete(&mut self, id_or_prefix: &str) -> Result<bool> {
        let Some(task_id) = repository::require_one(self.store.conn(), id_or_prefix)? else {
            return Ok(false);
        };
        let now = time::now_utc();
        let tx = self.store.transaction()?;
        write_ops(&self.writer, &tx, &task_id, vec![Op::Delete], &now)?;
        let deleted = repository::delete_task(&tx, &task_id, &now)?;
        tx.commit()?;
        tracing::debug!(task_id = %task_id, "task deleted");
        Ok(deleted)
    }
}

/// Write an intent's entries in order, all stamped with the intent's
/// timestamp. Entry ids are minted in sequence, so within the shared
/// instant replay preserves this ordering.
fn write_ops(
    writer: &OplogWriter,
    tx: &Transaction<'_>,
    task_id: &str,
    ops: Vec<Op>,
    now: &str,
) -> Result<()> {
    for op in ops {
        writer.append(tx, task_id, op, Some(now.to_string()))?;
    }
    Ok(())
}

fn notes_clear_op() -> Op {
    Op::Update {
        field: "notes_clear".into(),
        value: Some(String::new()),
    }
}

/// Compile a patch into per-field update operations. Only real task
/// fields can appear here; there is no `note` field, and the nullable
/// scalars encode "clear" as a SQL NULL value.
fn field_ops(patch: &TaskPatch) -> Vec<Op> {
    let mut ops = Vec::new();
    let mut push = |field: &str, value: Option<String>| {
        ops.push(Op::Update {
            field: field.to_string(),
            value,
        });
    };

    if let Some(title) = &patch.title {
        push("title", Some(title.clone()));
    }
    if let Some(status) = patch.status {
        push("status", Some(status.as_str().to_string()));
    }
    if let Some(priority) = patch.priority {
        push("priority", Some(priority.as_str().to_string()));
    }
    if let Some(owner) = &patch.owner {
        push("owner", owner.clone());
    }
    if let Some(due_at) = &patch.due_at {
        push("due_at", due_at.as_ref().map(time::format_naive));
    }
    if let Some(labels) = &patch.labels {
        let labels = dedup_preserving_order(labels.clone());
        push("labels", serde_json::to_string(&labels).ok());
    }
    if let Some(blocked_by) = &patch.blocked_by {
        push("blocked_by", serde_json::to_string(blocked_by).ok());
    }
    if let Some(metadata) = &patch.metadata {
        push("metadata", serde_json::to_string(metadata).ok());
    }
    ops
}
