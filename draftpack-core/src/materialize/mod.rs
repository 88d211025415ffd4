//! Draft finalization: turns a stored draft document into a packaged,
//! openable draft folder.
//!
//! A finalize job walks a fixed sequence: load the document, refresh
//! media metadata, clone the editor template, download every remote
//! asset in parallel, rewrite asset references for the client layout,
//! save the document, zip the folder and either upload the archive or
//! copy the folder to a local destination. Progress is written to the
//! task state store at every stage so clients can poll while the job
//! runs in the background.

mod error;

pub use error::{MaterializeError, MaterializeResult};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::archive;
use crate::config::DraftpackConfig;
use crate::draft::{is_valid_draft_id, DraftStore};
use crate::fetch::{AssetFetcher, DownloadPool, FetcherConfig, MaterialFetchJob};
use crate::objectstore::ObjectStore;
use crate::paths::{self, TargetOs};
use crate::probe::MetadataRefresher;
use crate::task::{TaskPhase, TaskStateStore};
use crate::template::TemplateCopier;

/// Percent milestones: 5 after load, 10 when downloads start, 70 at
/// document save, 80 at zip, 90 at upload, 100 terminal.
const PCT_LOADED: u8 = 5;
const PCT_DOWNLOADING: u8 = 10;
const PCT_SAVING: u8 = 70;
const PCT_ZIPPING: u8 = 80;
const PCT_UPLOADING: u8 = 90;

#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub draft_id: String,
    /// Defaults to the configured client OS.
    pub target_os: Option<TargetOs>,
    /// A caller-supplied folder. When it exists on this host the draft is
    /// copied there instead of uploaded.
    pub base_folder: Option<String>,
}

impl FinalizeRequest {
    pub fn new(draft_id: impl Into<String>) -> Self {
        Self {
            draft_id: draft_id.into(),
            target_os: None,
            base_folder: None,
        }
    }

    pub fn target_os(mut self, os: TargetOs) -> Self {
        self.target_os = Some(os);
        self
    }

    pub fn base_folder(mut self, base: impl Into<String>) -> Self {
        self.base_folder = Some(base.into());
        self
    }
}

#[derive(Debug)]
pub struct FinalizeOutput {
    pub draft_id: String,
    pub archive_path: PathBuf,
    pub signed_url: Option<String>,
    pub local_copy: Option<PathBuf>,
    pub fetched: usize,
    pub failed: usize,
}

impl FinalizeOutput {
    /// The string surfaced through the task message on completion: the
    /// signed URL after an upload, otherwise the zip's filesystem path.
    /// Local deliveries also report the zip; `local_copy` is carried
    /// separately for callers that want the copied folder.
    pub fn completion_message(&self) -> String {
        match &self.signed_url {
            Some(url) => url.clone(),
            None => self.archive_path.display().to_string(),
        }
    }
}

pub struct Materializer {
    config: Arc<DraftpackConfig>,
    drafts: DraftStore,
    tasks: TaskStateStore,
    refresher: MetadataRefresher,
    pool: DownloadPool,
    template: TemplateCopier,
    object_store: Option<Arc<dyn ObjectStore>>,
    running: Arc<Mutex<HashSet<String>>>,
}

impl Materializer {
    pub fn new(
        config: Arc<DraftpackConfig>,
        drafts: DraftStore,
        tasks: TaskStateStore,
        object_store: Option<Arc<dyn ObjectStore>>,
    ) -> MaterializeResult<Self> {
        let fetcher = AssetFetcher::new(FetcherConfig::from(&config.download))?;
        let pool = DownloadPool::new(fetcher, config.download.max_parallel);
        let template = TemplateCopier::new(config.template_dir());
        Ok(Self {
            config,
            drafts,
            tasks,
            refresher: MetadataRefresher::default(),
            pool,
            template,
            object_store,
            running: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Swaps the download pool; tests use this to shorten retry backoff.
    pub fn with_pool(mut self, pool: DownloadPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_refresher(mut self, refresher: MetadataRefresher) -> Self {
        self.refresher = refresher;
        self
    }

    /// Enqueues a finalize job and returns immediately with the task id
    /// (the draft id). A second submission for a draft that is still
    /// running is rejected rather than queued; callers poll and resubmit.
    pub fn submit_finalize(self: &Arc<Self>, request: FinalizeRequest) -> MaterializeResult<String> {
        if !is_valid_draft_id(&request.draft_id) {
            return Err(MaterializeError::InvalidId(request.draft_id.clone()));
        }
        let guard = self.acquire_slot(&request.draft_id)?;
        self.tasks
            .update(&request.draft_id, TaskPhase::Initialized, 0, "queued")?;
        let draft_id = request.draft_id.clone();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _slot = guard;
            if let Err(err) = engine.run_with_status(&request).await {
                warn!(draft_id = %request.draft_id, error = %err, "finalize job failed");
            }
        });
        Ok(draft_id)
    }

    /// Runs a finalize job to completion on the calling task. Same
    /// single-flight rule as [`submit_finalize`].
    pub async fn finalize(&self, request: &FinalizeRequest) -> MaterializeResult<FinalizeOutput> {
        if !is_valid_draft_id(&request.draft_id) {
            return Err(MaterializeError::InvalidId(request.draft_id.clone()));
        }
        let _slot = self.acquire_slot(&request.draft_id)?;
        self.run_with_status(request).await
    }

    fn acquire_slot(&self, draft_id: &str) -> MaterializeResult<RunningSlot> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(draft_id.to_string()) {
            return Err(MaterializeError::AlreadyRunning {
                draft_id: draft_id.to_string(),
            });
        }
        Ok(RunningSlot {
            running: Arc::clone(&self.running),
            draft_id: draft_id.to_string(),
        })
    }

    async fn run_with_status(&self, request: &FinalizeRequest) -> MaterializeResult<FinalizeOutput> {
        let progress = Progress {
            tasks: self.tasks.clone(),
            draft_id: request.draft_id.clone(),
            last: AtomicU8::new(0),
        };
        match self.run_pipeline(request, &progress).await {
            Ok(output) => {
                progress.terminal(TaskPhase::Completed, 100, &output.completion_message());
                Ok(output)
            }
            Err(err) => {
                progress.terminal(TaskPhase::Failed, progress.last(), &err.to_string());
                Err(err)
            }
        }
    }

    async fn run_pipeline(
        &self,
        request: &FinalizeRequest,
        progress: &Progress,
    ) -> MaterializeResult<FinalizeOutput> {
        let draft_id = request.draft_id.as_str();
        let os = request.target_os.unwrap_or(self.config.client.default_os);
        let base = request
            .base_folder
            .clone()
            .unwrap_or_else(|| self.config.client.default_base(os).to_string());

        // Holding the per-draft lock for the whole job keeps concurrent
        // document edits from racing the serialization below.
        let lock = self.drafts.lock_for(draft_id);
        let _document_guard = lock.lock().await;

        progress.processing(0, "starting");
        let record = self
            .drafts
            .durable()
            .fetch(draft_id)?
            .ok_or_else(|| MaterializeError::DraftNotFound {
                draft_id: draft_id.to_string(),
            })?;
        let mut document = self
            .drafts
            .get(draft_id)?
            .ok_or_else(|| MaterializeError::DraftNotFound {
                draft_id: draft_id.to_string(),
            })?;
        progress.processing(PCT_LOADED, "refreshing media metadata");
        self.refresher.refresh(&mut document).await;

        let work_dir = self.config.work_dir();
        let stale = work_dir.join(draft_id);
        if stale.exists() {
            std::fs::remove_dir_all(&stale).map_err(|source| MaterializeError::Workdir {
                source,
                path: stale.clone(),
            })?;
        }
        let draft_dir = self.template.materialize_into(&work_dir, draft_id)?;

        // Rewrite references before downloading so even a partially
        // fetched draft serializes with client-side paths.
        let mut jobs = Vec::new();
        for material in document.materials_mut() {
            let url = match material.remote_url.as_deref() {
                Some(url) if !url.is_empty() => url.to_string(),
                _ => continue,
            };
            let kind = material.media_type;
            let relative = format!("assets/{}/{}", kind.asset_dir(), material.material_name);
            let replace = paths::rewrite(&relative, draft_id, &base, os);
            material.path = replace.clone();
            jobs.push(MaterialFetchJob {
                material_id: material.material_id.clone(),
                remote_url: url,
                local_target_path: draft_dir
                    .join("assets")
                    .join(kind.asset_dir())
                    .join(&material.material_name),
                replace_path: replace,
                kind,
            });
        }

        let total = jobs.len();
        progress.processing(PCT_DOWNLOADING, &format!("downloading 0/{total}"));
        let cancel = Arc::new(AtomicBool::new(false));
        let outcomes = self
            .pool
            .run(jobs, cancel, |p, _err| {
                let pct = PCT_DOWNLOADING + ((60 * p.done) / p.total.max(1)) as u8;
                progress.processing(pct, &format!("downloading {}/{}", p.done, p.total));
            })
            .await;

        let mut fetched = 0usize;
        let mut failed = 0usize;
        for outcome in &outcomes {
            match &outcome.result {
                Ok(()) => {
                    fetched += 1;
                    // Only a confirmed fetch drops the remote reference;
                    // failed materials stay re-downloadable.
                    if let Some(material) = document.material_by_id_mut(&outcome.job.material_id) {
                        material.remote_url = None;
                    }
                }
                Err(err) => {
                    failed += 1;
                    warn!(
                        draft_id,
                        material = %outcome.job.material_id,
                        error = %err,
                        "asset fetch failed, continuing without it"
                    );
                }
            }
        }

        progress.processing(PCT_SAVING, "saving draft document");
        let serialized = document.serialize()?;
        let document_path = draft_dir.join("draft_info.json");
        std::fs::write(&document_path, serialized.as_bytes()).map_err(|source| {
            MaterializeError::Workdir {
                source,
                path: document_path,
            }
        })?;
        self.drafts
            .put(draft_id, &document, record.canvas_width, record.canvas_height)?;

        progress.processing(PCT_ZIPPING, "packaging archive");
        let zip_path = work_dir.join(format!("{draft_id}.zip"));
        archive::zip_directory(&draft_dir, &zip_path)?;

        let custom_local = request
            .base_folder
            .as_deref()
            .map(|base| Path::new(base).is_dir())
            .unwrap_or(false);

        let mut output = FinalizeOutput {
            draft_id: draft_id.to_string(),
            archive_path: zip_path.clone(),
            signed_url: None,
            local_copy: None,
            fetched,
            failed,
        };

        if self.config.system.upload_mode && !custom_local {
            let store = self
                .object_store
                .as_ref()
                .ok_or(MaterializeError::MissingObjectStore)?;
            progress.processing(PCT_UPLOADING, "uploading archive");
            let object_name = format!("{draft_id}.zip");
            store.put(&object_name, &zip_path).await?;
            let ttl = self
                .config
                .object_store
                .as_ref()
                .map(|s| Duration::from_secs(s.signed_url_ttl_seconds))
                .unwrap_or(Duration::from_secs(24 * 3600));
            output.signed_url = Some(store.sign(&object_name, ttl).await?);
            // The packaged folder is reproducible from the archive.
            if let Err(err) = std::fs::remove_dir_all(&draft_dir) {
                warn!(path = %draft_dir.display(), error = %err, "working directory cleanup failed");
            }
        } else if custom_local {
            if let Some(base) = request.base_folder.as_deref() {
                let destination = Path::new(base).join(draft_id);
                copy_tree(&draft_dir, &destination)?;
                output.local_copy = Some(destination);
            }
        }

        info!(
            draft_id,
            fetched,
            failed,
            uploaded = output.signed_url.is_some(),
            "finalize complete"
        );
        Ok(output)
    }
}

/// Marks a draft id as having a job in flight; dropping it releases the
/// slot even when the job panics.
struct RunningSlot {
    running: Arc<Mutex<HashSet<String>>>,
    draft_id: String,
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.draft_id);
    }
}

/// Task-store progress writer. Percentages only move forward; stage
/// writes that would regress are pinned to the high-water mark. Write
/// failures are logged and swallowed so a status hiccup never kills a
/// running job.
struct Progress {
    tasks: TaskStateStore,
    draft_id: String,
    last: AtomicU8,
}

impl Progress {
    fn processing(&self, percent: u8, message: &str) {
        let pct = self.bump(percent);
        if let Err(err) = self
            .tasks
            .update(&self.draft_id, TaskPhase::Processing, pct, message)
        {
            warn!(draft_id = %self.draft_id, error = %err, "task progress write failed");
        }
    }

    fn terminal(&self, phase: TaskPhase, percent: u8, message: &str) {
        let pct = self.bump(percent);
        if let Err(err) = self.tasks.update(&self.draft_id, phase, pct, message) {
            warn!(draft_id = %self.draft_id, error = %err, "task completion write failed");
        }
    }

    fn bump(&self, percent: u8) -> u8 {
        self.last.fetch_max(percent, Ordering::SeqCst).max(percent)
    }

    fn last(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }
}

fn copy_tree(src: &Path, dst: &Path) -> MaterializeResult<()> {
    if dst.exists() {
        std::fs::remove_dir_all(dst).map_err(|source| MaterializeError::Workdir {
            source,
            path: dst.to_path_buf(),
        })?;
    }
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|source| MaterializeError::Workdir {
            source: source.into(),
            path: src.to_path_buf(),
        })?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|source| MaterializeError::Workdir {
                source,
                path: target.clone(),
            })?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|source| MaterializeError::Workdir {
                    source,
                    path: parent.to_path_buf(),
                })?;
            }
            std::fs::copy(entry.path(), &target).map_err(|source| MaterializeError::Workdir {
                source,
                path: target.clone(),
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn progress_writes_are_pinned_to_the_high_water_mark() {
        let dir = tempdir().unwrap();
        let tasks = TaskStateStore::new(dir.path().join("tasks.db")).unwrap();
        tasks.initialize().unwrap();
        let progress = Progress {
            tasks: tasks.clone(),
            draft_id: "dft_a".to_string(),
            last: AtomicU8::new(0),
        };

        // Completion callbacks can arrive out of order; the stored
        // percent must never move backwards.
        for (reported, stored) in [(10, 10), (40, 40), (25, 40), (70, 70), (55, 70)] {
            progress.processing(reported, "working");
            assert_eq!(tasks.query("dft_a").unwrap().percent, stored);
        }

        progress.terminal(TaskPhase::Completed, 100, "done");
        let state = tasks.query("dft_a").unwrap();
        assert_eq!(state.percent, 100);
        assert_eq!(state.phase, TaskPhase::Completed);
    }
}
