//! Poll-able finalize job state, persisted so progress survives restarts.
//! The materializer is the only writer for a given draft; pollers read.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use crate::sqlite::configure_connection;

const TASK_SCHEMA: &str = include_str!("../../sql/tasks.sql");

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("failed to open task database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on task database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("task store path not configured")]
    MissingStore,
    #[error("invalid task phase: {0}")]
    InvalidPhase(String),
}

pub type TaskResult<T> = Result<T, TaskError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Initialized,
    Processing,
    Completed,
    Failed,
    NotFound,
}

impl TaskPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPhase::Initialized => "initialized",
            TaskPhase::Processing => "processing",
            TaskPhase::Completed => "completed",
            TaskPhase::Failed => "failed",
            TaskPhase::NotFound => "not_found",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Completed | TaskPhase::Failed)
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskPhase {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(Self::Initialized),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "not_found" => Ok(Self::NotFound),
            other => Err(TaskError::InvalidPhase(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskState {
    pub draft_id: String,
    pub phase: TaskPhase,
    pub percent: u8,
    pub message: String,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TaskStateStoreBuilder {
    path: Option<PathBuf>,
}

impl Default for TaskStateStoreBuilder {
    fn default() -> Self {
        Self { path: None }
    }
}

impl TaskStateStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn build(self) -> TaskResult<TaskStateStore> {
        let path = self.path.ok_or(TaskError::MissingStore)?;
        Ok(TaskStateStore {
            path,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TaskStateStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl TaskStateStore {
    pub fn builder() -> TaskStateStoreBuilder {
        TaskStateStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> TaskResult<Self> {
        TaskStateStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> TaskResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            TaskError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| TaskError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> TaskResult<()> {
        let conn = self.open()?;
        conn.execute_batch(TASK_SCHEMA)?;
        Ok(())
    }

    /// One row per draft; a new finalize request overwrites the previous
    /// state wholesale.
    pub fn update(
        &self,
        draft_id: &str,
        phase: TaskPhase,
        percent: u8,
        message: &str,
    ) -> TaskResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO task_states (draft_id, phase, percent, message, last_modified)
             VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)
             ON CONFLICT(draft_id) DO UPDATE SET
                 phase = excluded.phase,
                 percent = excluded.percent,
                 message = excluded.message,
                 last_modified = CURRENT_TIMESTAMP",
            params![draft_id, phase.as_str(), percent.min(100) as i64, message],
        )?;
        Ok(())
    }

    pub fn query(&self, draft_id: &str) -> TaskResult<TaskState> {
        let conn = self.open()?;
        let state = conn
            .query_row(
                "SELECT draft_id, phase, percent, message, last_modified
                 FROM task_states WHERE draft_id = ?1",
                [draft_id],
                |row| {
                    let phase_raw: String = row.get(1)?;
                    let percent: i64 = row.get(2)?;
                    let last_modified: Option<chrono::NaiveDateTime> = row.get(4)?;
                    Ok(TaskState {
                        draft_id: row.get(0)?,
                        phase: phase_raw.parse().unwrap_or(TaskPhase::NotFound),
                        percent: percent.clamp(0, 100) as u8,
                        message: row.get(3)?,
                        last_modified: last_modified.map(|dt| Utc.from_utc_datetime(&dt)),
                    })
                },
            )
            .optional()?;
        Ok(state.unwrap_or_else(|| TaskState {
            draft_id: draft_id.to_string(),
            phase: TaskPhase::NotFound,
            percent: 0,
            message: String::new(),
            last_modified: None,
        }))
    }
}
