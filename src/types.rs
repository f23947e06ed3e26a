use chrono::{DateTime, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Task identifier — a UUIDv7 string, so lexical order approximates
/// creation order.
pub type TaskId = String;

/// Workflow state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    InReview,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::InReview => "in_review",
            TaskStatus::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(TaskStatus::Todo),
            "in_progress" => Some(TaskStatus::InProgress),
            "in_review" => Some(TaskStatus::InReview),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, TaskStatus::Done)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority. `rank` gives the sort position (urgent first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(TaskPriority::Low),
            "medium" => Some(TaskPriority::Medium),
            "high" => Some(TaskPriority::High),
            "urgent" => Some(TaskPriority::Urgent),
            _ => None,
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Urgent => 0,
            TaskPriority::High => 1,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 3,
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The materialized, current state of a task.
///
/// Rows in the `tasks` table are a pure function of the task's oplog
/// history; this struct is what they decode to. Collections are typed in
/// memory and JSON-encoded only at the storage boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default, with = "crate::time::naive_opt")]
    pub due_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub blocked_by: Vec<TaskId>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub metadata: IndexMap<String, String>,
    #[serde(with = "crate::time::utc_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::time::utc_millis")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "crate::time::utc_millis_opt")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build the initial state for a fresh task. Missing status/priority
    /// take their defaults; labels and notes are de-duplicated in order.
    pub fn materialize(id: TaskId, input: NewTask, now: &str) -> Self {
        let created = crate::time::parse_utc_lenient(now);
        Task {
            id,
            title: input.title,
            status: input.status.unwrap_or_default(),
            priority: input.priority.unwrap_or_default(),
            owner: input.owner,
            due_at: input.due_at,
            blocked_by: input.blocked_by,
            labels: dedup_preserving_order(input.labels),
            notes: dedup_preserving_order(input.notes),
            metadata: input.metadata,
            created_at: created,
            updated_at: created,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Initial field values for [`crate::TaskService::add`]. Everything except
/// `title` is optional; `id` is minted when absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewTask {
    pub id: Option<TaskId>,
    pub title: String,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub owner: Option<String>,
    pub due_at: Option<NaiveDateTime>,
    pub blocked_by: Vec<TaskId>,
    pub labels: Vec<String>,
    pub notes: Vec<String>,
    pub metadata: IndexMap<String, String>,
}

/// A partial update. `None` means "leave unchanged"; for the nullable
/// scalars (`owner`, `due_at`) the inner option distinguishes "set" from
/// "clear". Unknown keys in caller payloads (notably `note`) are dropped
/// on deserialization and never turn into oplog entries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(deserialize_with = "double_option")]
    pub owner: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub due_at: Option<Option<NaiveDateTime>>,
    pub labels: Option<Vec<String>>,
    pub blocked_by: Option<Vec<TaskId>>,
    pub metadata: Option<IndexMap<String, String>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.owner.is_none()
            && self.due_at.is_none()
            && self.labels.is_none()
            && self.blocked_by.is_none()
            && self.metadata.is_none()
    }
}

/// Distinguishes an absent key from an explicit `null` when a patch comes
/// in as JSON: this runs only when the key is present, so `null` decodes
/// to `Some(None)` (clear) while a missing key stays `None` (unchanged).
fn double_option<'de, T, D>(de: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

/// Sort order for [`crate::store::repository::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Priority rank, then creation time.
    #[default]
    Priority,
    /// Due date ascending, tasks without one last.
    Due,
    /// Title, case-insensitive.
    Title,
    /// Creation time ascending.
    Created,
}

/// Filters and pagination for listing tasks. The zero value lists
/// everything in the default order.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub label: Option<String>,
    pub owner: Option<String>,
    /// Case-insensitive substring match on the title.
    pub search: Option<String>,
    /// Drop tasks blocked by a live, not-done task.
    pub actionable: bool,
    pub sort: SortKey,
    pub limit: Option<usize>,
    pub offset: usize,
}

pub(crate) fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
