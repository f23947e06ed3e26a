//! # saddlebag-sync
//!
//! Push/pull synchronization for the saddlebag task core. A
//! [`SyncEngine`] moves oplog entries between the local [`saddlebag::Store`]
//! and any [`RemoteBackend`], keeping per-device high-water marks in the
//! store's `meta` table and replaying pulled entries into the task table.
//!
//! ```rust,no_run
//! use saddlebag::Store;
//! use saddlebag_sync::{FilesystemRemote, SyncEngine};
//!
//! # fn main() -> saddlebag_sync::Result<()> {
//! let mut store = Store::open("./tasks.db")?;
//! let remote = FilesystemRemote::open("./shared/oplog.db")?;
//! let mut engine = SyncEngine::new(&mut store, Box::new(remote));
//!
//! let report = engine.sync()?;
//! println!("pushed {}, pulled {}", report.pushed, report.pulled);
//! # Ok(())
//! # }
//! ```
//!
//! Both directions are idempotent: pushing twice with no new local writes
//! pushes nothing, and re-pulling a batch is absorbed by replay's
//! insert-ignore. A crash between the remote write and the local cursor
//! update just causes a harmless re-push on the next round.

pub mod engine;
pub mod error;
pub mod fs_remote;
pub mod remote;

pub use engine::{SyncEngine, SyncReport};
pub use error::{Result, SyncError};
pub use fs_remote::FilesystemRemote;
pub use remote::{MemoryRemote, PullBatch, RemoteBackend};
