//! # Saddlebag
//!
//! Offline-first task manager core. Every mutation is recorded in an
//! append-only operation log (oplog) alongside the materialized `tasks`
//! table, both in one SQLite file; a deterministic replay function
//! rebuilds tasks from any mix of local and remote entries, so devices
//! that exchange their logs converge on identical state with no server
//! in charge. The companion `saddlebag-sync` crate drives that exchange.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use saddlebag::{NewTask, TaskPatch, TaskService, TaskStatus};
//!
//! # fn main() -> saddlebag::Result<()> {
//! let mut service = TaskService::open("./tasks.db")?;
//!
//! let task = service.add(NewTask {
//!     title: "Ship the release".into(),
//!     labels: vec!["work".into()],
//!     ..Default::default()
//! })?;
//!
//! // Any unique id prefix works where an id is expected.
//! service.update(
//!     &task.id[..8],
//!     TaskPatch {
//!         status: Some(TaskStatus::InProgress),
//!         ..Default::default()
//!     },
//! )?;
//! service.add_note(&task.id, "waiting on CI")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Conflict resolution
//!
//! Replay applies field-level last-writer-wins with an entry-id tiebreak,
//! with two exceptions: notes accumulate append-only (exact duplicates
//! are dropped), and an update at or after a delete restores the task.
//! See [`oplog::replay`].

pub mod error;
pub mod id;
pub mod oplog;
pub mod service;
pub mod store;
pub mod types;

mod time;

pub use error::{Result, SaddlebagError};
pub use id::IdGenerator;
pub use oplog::{Op, OplogEntry, OplogWriter};
pub use service::TaskService;
pub use store::Store;
pub use types::{
    ListFilter, NewTask, SortKey, Task, TaskId, TaskPatch, TaskPriority, TaskStatus,
};
