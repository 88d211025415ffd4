use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DraftError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("draft {draft_id} not found")]
    NotFound { draft_id: String },
    #[error("invalid draft id: {0}")]
    InvalidId(String),
    #[error("duplicate material name: {0}")]
    DuplicateMaterialName(String),
    #[error("draft store path not configured")]
    MissingStore,
    #[error("failed to open database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
}

pub type DraftResult<T> = std::result::Result<T, DraftError>;
