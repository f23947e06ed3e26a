use crate::error::Result;
use crate::remote::RemoteBackend;
use saddlebag::oplog::{self, replay};
use saddlebag::store::meta;
use saddlebag::Store;

/// Counts from one [`SyncEngine::sync`] round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Local entries sent to the remote.
    pub pushed: usize,
    /// Entries received that originated on other devices (echoes of our
    /// own writes are absorbed, not counted).
    pub pulled: usize,
}

/// Drives push/pull between one local store and one remote.
///
/// Progress is tracked in the store's `meta` table: a rowid high-water
/// mark for push and the remote's opaque cursor for pull. Both advance
/// only after a successful remote round-trip, so an interrupted sync
/// resumes from the last good state and duplicates are absorbed by
/// insert-ignore on either side. Not re-entrant; one engine instance
/// syncs at a time.
pub struct SyncEngine<'a> {
    store: &'a mut Store,
    remote: Box<dyn RemoteBackend>,
    device_id: String,
}

impl<'a> SyncEngine<'a> {
    pub fn new(store: &'a mut Store, remote: Box<dyn RemoteBackend>) -> Self {
        let device_id = store.device_id().to_string();
        SyncEngine {
            store,
            remote,
            device_id,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Send local entries the remote has not seen. Returns how many went
    /// out; 0 when the high-water mark is already at the tail.
    pub fn push(&mut self) -> Result<usize> {
        let key = meta::push_rowid_key(&self.device_id);
        let mark: i64 = self
            .store
            .meta_get(&key)?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);

        let rows = oplog::entries_after(self.store.conn(), mark, Some(&self.device_id))?;
        if rows.is_empty() {
            return Ok(0);
        }

        let entries: Vec<_> = rows.iter().map(|(_, entry)| entry.clone()).collect();
        self.remote.push(&entries)?;

        // Only now that the remote holds the batch; a crash before this
        // line re-pushes, which the remote's insert-ignore absorbs.
        let max_rowid = rows.last().map(|(rowid, _)| *rowid).unwrap_or(mark);
        self.store.meta_set(&key, &max_rowid.to_string())?;

        tracing::info!(count = entries.len(), device_id = %self.device_id, "pushed oplog entries");
        Ok(entries.len())
    }

    /// Fetch the remote tail, replay it, advance the cursor. Returns the
    /// number of entries that originated on other devices.
    pub fn pull(&mut self) -> Result<usize> {
        let key = meta::pull_cursor_key(&self.device_id);
        let cursor = self.store.meta_get(&key)?;

        let batch = self.remote.pull(cursor.as_deref())?;
        if batch.entries.is_empty() {
            return Ok(0);
        }

        // Our own echoed entries ride along harmlessly: replay's
        // insert-ignore drops them before rebuild.
        replay::apply(self.store.conn_mut(), &batch.entries)?;

        if let Some(next) = &batch.cursor {
            self.store.meta_set(&key, next)?;
        }

        let foreign = batch
            .entries
            .iter()
            .filter(|entry| entry.device_id != self.device_id)
            .count();
        tracing::info!(
            count = batch.entries.len(),
            foreign,
            device_id = %self.device_id,
            "pulled oplog entries"
        );
        Ok(foreign)
    }

    /// One full round: push, then pull.
    pub fn sync(&mut self) -> Result<SyncReport> {
        let pushed = self.push()?;
        let pulled = self.pull()?;
        Ok(SyncReport { pushed, pulled })
    }

    /// Release the remote's resources.
    pub fn close(mut self) -> Result<()> {
        self.remote.close()
    }
}
