//! Draft persistence: a bounded LRU cache of deserialized documents in
//! front of a durable SQLite table. The serialized row is the source of
//! truth; the cache exclusively owns the deserialized copies.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use lru::LruCache;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tokio::sync::Mutex as AsyncMutex;

use crate::sqlite::configure_connection;

use super::document::{is_valid_draft_id, DraftDocument};
use super::error::{DraftError, DraftResult};

const DRAFT_SCHEMA: &str = include_str!("../../../sql/drafts.sql");

pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct DraftRecord {
    pub draft_id: String,
    pub document: String,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SqliteDraftStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteDraftStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteDraftStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> DraftResult<SqliteDraftStore> {
        let path = self.path.ok_or(DraftError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteDraftStore { path, flags })
    }
}

/// Durable layer. Cheap to clone; a connection is opened per call.
#[derive(Debug, Clone)]
pub struct SqliteDraftStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteDraftStore {
    pub fn builder() -> SqliteDraftStoreBuilder {
        SqliteDraftStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> DraftResult<Self> {
        SqliteDraftStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> DraftResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            DraftError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| DraftError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> DraftResult<()> {
        let conn = self.open()?;
        conn.execute_batch(DRAFT_SCHEMA)?;
        Ok(())
    }

    pub fn upsert(&self, record: &DraftRecord) -> DraftResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO drafts (draft_id, document, canvas_width, canvas_height)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(draft_id) DO UPDATE SET
                 document = excluded.document,
                 canvas_width = excluded.canvas_width,
                 canvas_height = excluded.canvas_height,
                 last_modified = CURRENT_TIMESTAMP",
            params![
                &record.draft_id,
                &record.document,
                record.canvas_width,
                record.canvas_height,
            ],
        )?;
        Ok(())
    }

    pub fn fetch(&self, draft_id: &str) -> DraftResult<Option<DraftRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT draft_id, document, canvas_width, canvas_height, created_at, last_modified
             FROM drafts WHERE draft_id = ?1",
        )?;
        let record = stmt
            .query_row([draft_id], |row| {
                let created_at: Option<chrono::NaiveDateTime> = row.get(4)?;
                let last_modified: Option<chrono::NaiveDateTime> = row.get(5)?;
                Ok(DraftRecord {
                    draft_id: row.get(0)?,
                    document: row.get(1)?,
                    canvas_width: row.get(2)?,
                    canvas_height: row.get(3)?,
                    created_at: created_at.map(|dt| Utc.from_utc_datetime(&dt)),
                    last_modified: last_modified.map(|dt| Utc.from_utc_datetime(&dt)),
                })
            })
            .optional()?;
        Ok(record)
    }

    pub fn exists(&self, draft_id: &str) -> DraftResult<bool> {
        let conn = self.open()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM drafts WHERE draft_id = ?1",
                [draft_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list(&self, limit: usize) -> DraftResult<Vec<DraftRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT draft_id, document, canvas_width, canvas_height, created_at, last_modified
             FROM drafts ORDER BY last_modified DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                let created_at: Option<chrono::NaiveDateTime> = row.get(4)?;
                let last_modified: Option<chrono::NaiveDateTime> = row.get(5)?;
                Ok(DraftRecord {
                    draft_id: row.get(0)?,
                    document: row.get(1)?,
                    canvas_width: row.get(2)?,
                    canvas_height: row.get(3)?,
                    created_at: created_at.map(|dt| Utc.from_utc_datetime(&dt)),
                    last_modified: last_modified.map(|dt| Utc.from_utc_datetime(&dt)),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

struct CachedDraft {
    document: DraftDocument,
    canvas_width: u32,
    canvas_height: u32,
}

/// Write-through store. `get` promotes to most-recently-used; `put`
/// serializes, upserts the durable row and refreshes the cache, evicting
/// the least-recently-used entry when over capacity.
#[derive(Clone)]
pub struct DraftStore {
    durable: SqliteDraftStore,
    cache: Arc<Mutex<LruCache<String, CachedDraft>>>,
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl DraftStore {
    pub fn new(durable: SqliteDraftStore) -> Self {
        Self::with_capacity(durable, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(durable: SqliteDraftStore, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            durable,
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn durable(&self) -> &SqliteDraftStore {
        &self.durable
    }

    /// Per-draft mutex. Finalize jobs and `with_draft` both hold it so a
    /// draft is never mutated while it is being materialized.
    pub fn lock_for(&self, draft_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(draft_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub fn get(&self, draft_id: &str) -> DraftResult<Option<DraftDocument>> {
        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = cache.get(draft_id) {
                return Ok(Some(cached.document.clone()));
            }
        }
        let record = match self.durable.fetch(draft_id)? {
            Some(record) => record,
            None => return Ok(None),
        };
        let document = DraftDocument::deserialize(&record.document)?;
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(
            draft_id.to_string(),
            CachedDraft {
                document: document.clone(),
                canvas_width: record.canvas_width,
                canvas_height: record.canvas_height,
            },
        );
        Ok(Some(document))
    }

    pub fn put(
        &self,
        draft_id: &str,
        document: &DraftDocument,
        canvas_width: u32,
        canvas_height: u32,
    ) -> DraftResult<()> {
        if !is_valid_draft_id(draft_id) {
            return Err(DraftError::InvalidId(draft_id.to_string()));
        }
        document.ensure_unique_material_names()?;
        let record = DraftRecord {
            draft_id: draft_id.to_string(),
            document: document.serialize()?,
            canvas_width,
            canvas_height,
            created_at: None,
            last_modified: None,
        };
        self.durable.upsert(&record)?;
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(
            draft_id.to_string(),
            CachedDraft {
                document: document.clone(),
                canvas_width,
                canvas_height,
            },
        );
        Ok(())
    }

    pub fn exists(&self, draft_id: &str) -> DraftResult<bool> {
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if cache.contains(draft_id) {
                return Ok(true);
            }
        }
        self.durable.exists(draft_id)
    }

    /// Whether the cache currently holds the draft. Only meaningful for
    /// observing eviction behavior.
    pub fn is_cached(&self, draft_id: &str) -> bool {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.contains(draft_id)
    }

    /// Takes the per-draft mutex, hands the document to `apply` and writes
    /// it through on success, preserving the stored canvas dimensions.
    pub async fn with_draft<T, F>(&self, draft_id: &str, apply: F) -> DraftResult<T>
    where
        F: FnOnce(&mut DraftDocument) -> DraftResult<T>,
    {
        let lock = self.lock_for(draft_id);
        let _guard = lock.lock().await;
        let mut document = self.get(draft_id)?.ok_or_else(|| DraftError::NotFound {
            draft_id: draft_id.to_string(),
        })?;
        let (width, height) = {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache
                .get(draft_id)
                .map(|c| (c.canvas_width, c.canvas_height))
                .unwrap_or((0, 0))
        };
        let value = apply(&mut document)?;
        self.put(draft_id, &document, width, height)?;
        Ok(value)
    }
}
