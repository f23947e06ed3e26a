use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Failure in the local store; surfaced unchanged.
    #[error(transparent)]
    Local(#[from] saddlebag::SaddlebagError),

    /// Failure of a remote push or pull. Recoverable: cursors only move
    /// after success, so the next sync retries from the last good state.
    #[error("remote error: {0}")]
    Remote(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}
