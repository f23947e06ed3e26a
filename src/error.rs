use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SaddlebagError {
    #[error("ambiguous task id prefix '{prefix}': {} matches", matches.len())]
    AmbiguousPrefix {
        prefix: String,
        matches: Vec<String>,
    },

    #[error("duplicate task id: {0}")]
    DuplicateTaskId(String),

    #[error("malformed oplog entry {id}: {reason}")]
    MalformedEntry { id: String, reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    #[error("JSON error: {0}")]
    Json(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, SaddlebagError>;

impl From<rusqlite::Error> for SaddlebagError {
    fn from(e: rusqlite::Error) -> Self {
        SaddlebagError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for SaddlebagError {
    fn from(e: serde_json::Error) -> Self {
        SaddlebagError::Json(e.to_string())
    }
}

impl From<std::io::Error> for SaddlebagError {
    fn from(e: std::io::Error) -> Self {
        SaddlebagError::Io(e.to_string())
    }
}
