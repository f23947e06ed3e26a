use crate::error::Result;
use saddlebag::OplogEntry;

/// A batch of pulled entries plus the token to resume from next time.
#[derive(Debug, Clone)]
pub struct PullBatch {
    pub entries: Vec<OplogEntry>,
    /// Opaque resume token. Pass it back verbatim on the next pull;
    /// `None` only when the remote returned nothing and had no prior
    /// cursor to echo.
    pub cursor: Option<String>,
}

/// The boundary between the sync engine and any external log store.
///
/// Implementations must persist pushed entries under their own ids with
/// insert-ignore semantics, and surface them on pull in a stable,
/// resumable order: pulling twice with the same cursor returns the same
/// entries.
pub trait RemoteBackend {
    /// Accept a batch of entries. Duplicates of already-stored ids are
    /// absorbed silently.
    fn push(&mut self, entries: &[OplogEntry]) -> Result<()>;

    /// Return everything strictly after `cursor` (up to the backend's
    /// batch size), `None` meaning "from the beginning".
    fn pull(&mut self, cursor: Option<&str>) -> Result<PullBatch>;

    /// Release any resources. Subsequent calls fail.
    fn close(&mut self) -> Result<()>;
}

/// In-process backend holding the log in a `Vec`, in arrival order. The
/// cursor is the count of entries already seen. Exists for engine tests
/// and for downstream suites that need a remote without touching disk.
#[derive(Debug)]
pub struct MemoryRemote {
    entries: Vec<OplogEntry>,
    seen: std::collections::HashSet<String>,
    batch_size: usize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        MemoryRemote {
            entries: Vec::new(),
            seen: std::collections::HashSet::new(),
            batch_size: usize::MAX,
        }
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        MemoryRemote {
            batch_size,
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteBackend for MemoryRemote {
    fn push(&mut self, entries: &[OplogEntry]) -> Result<()> {
        for entry in entries {
            if self.seen.insert(entry.id.clone()) {
                self.entries.push(entry.clone());
            }
        }
        Ok(())
    }

    fn pull(&mut self, cursor: Option<&str>) -> Result<PullBatch> {
        let from: usize = match cursor {
            None => 0,
            Some(raw) => raw
                .parse()
                .map_err(|_| crate::SyncError::Remote(format!("bad cursor '{raw}'")))?,
        };
        let end = self.entries.len().min(from.saturating_add(self.batch_size));
        let entries = self
            .entries
            .get(from..end)
            .unwrap_or_default()
            .to_vec();
        let cursor = if entries.is_empty() {
            cursor.map(str::to_owned)
        } else {
            Some(end.to_string())
        };
        Ok(PullBatch { entries, cursor })
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
