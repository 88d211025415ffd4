use std::path::PathBuf;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::draft::DraftError;
use crate::fetch::FetchError;
use crate::objectstore::ObjectStoreError;
use crate::task::TaskError;
use crate::template::TemplateError;

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("invalid draft id: {0}")]
    InvalidId(String),
    #[error("draft {draft_id} not found")]
    DraftNotFound { draft_id: String },
    #[error("finalize already running for draft {draft_id}")]
    AlreadyRunning { draft_id: String },
    #[error("upload mode requires an object store")]
    MissingObjectStore,
    #[error("working directory unusable at {path}: {source}")]
    Workdir {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("upload failed: {0}")]
    Upload(#[from] ObjectStoreError),
}

pub type MaterializeResult<T> = Result<T, MaterializeError>;
