//! Operation surface for the engine.
//!
//! Everything an outer transport (HTTP handler, CLI) exposes goes through
//! [`DraftService`]. Responses use a uniform envelope so callers never
//! have to distinguish transport failures from domain failures.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use crate::catalog::{self, CatalogEntry};
use crate::config::DraftpackConfig;
use crate::error::ConfigError;
use crate::customize::CustomizedArchiveService;
use crate::draft::{DraftDocument, DraftError, DraftStore, SqliteDraftStore};
use crate::materialize::{FinalizeRequest, MaterializeResult, Materializer};
use crate::objectstore::{ObjectStore, ObjectStoreError, S3ObjectStore};
use crate::paths::TargetOs;
use crate::task::{TaskError, TaskStateStore};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error(transparent)]
    Materialize(#[from] crate::materialize::MaterializeError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: std::path::PathBuf,
    },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Boundary envelope. Exactly one of `output` and `error` is present.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(message.into()),
        }
    }

    fn from_result<T: Serialize, E: std::fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(output) => Self::ok(output),
                Err(err) => Self::failure(err.to_string()),
            },
            Err(err) => Self::failure(err.to_string()),
        }
    }
}

pub struct DraftService {
    config: Arc<DraftpackConfig>,
    drafts: DraftStore,
    tasks: TaskStateStore,
    materializer: Arc<Materializer>,
    object_store: Option<Arc<dyn ObjectStore>>,
    customizer: Option<CustomizedArchiveService>,
}

impl DraftService {
    /// Opens stores under the configured data dir and wires the pipeline.
    pub fn open(config: DraftpackConfig) -> ServiceResult<Self> {
        let data_dir = config.resolve_path(&config.paths.data_dir);
        std::fs::create_dir_all(&data_dir).map_err(|source| ServiceError::Io {
            source,
            path: data_dir.clone(),
        })?;
        let durable = SqliteDraftStore::builder()
            .path(data_dir.join("drafts.db"))
            .build()?;
        durable.initialize()?;
        let drafts = DraftStore::new(durable);
        let tasks = TaskStateStore::new(data_dir.join("tasks.db"))?;
        tasks.initialize()?;

        let object_store: Option<Arc<dyn ObjectStore>> = match &config.object_store {
            Some(section) => Some(Arc::new(S3ObjectStore::new(section)?)),
            None => None,
        };
        Self::new(config, drafts, tasks, object_store)
    }

    /// Same wiring with caller-provided stores; tests inject fakes here.
    pub fn new(
        config: DraftpackConfig,
        drafts: DraftStore,
        tasks: TaskStateStore,
        object_store: Option<Arc<dyn ObjectStore>>,
    ) -> ServiceResult<Self> {
        let config = Arc::new(config);
        let materializer = Arc::new(Materializer::new(
            Arc::clone(&config),
            drafts.clone(),
            tasks.clone(),
            object_store.clone(),
        )?);
        let customizer = object_store
            .clone()
            .map(|store| CustomizedArchiveService::new(store, signed_url_ttl(&config)));
        Ok(Self {
            config,
            drafts,
            tasks,
            materializer,
            object_store,
            customizer,
        })
    }

    pub fn config(&self) -> &DraftpackConfig {
        &self.config
    }

    pub fn drafts(&self) -> &DraftStore {
        &self.drafts
    }

    pub fn materializer(&self) -> &Arc<Materializer> {
        &self.materializer
    }

    /// Enqueues a finalize job; the returned task id equals the draft id.
    pub fn submit_finalize(&self, request: FinalizeRequest) -> ApiResponse {
        let draft_id = request.draft_id.clone();
        let result: MaterializeResult<Value> = self
            .materializer
            .submit_finalize(request)
            .map(|task_id| json!({ "task_id": task_id }));
        info!(draft_id = %draft_id, accepted = result.is_ok(), "finalize submitted");
        ApiResponse::from_result(result)
    }

    /// Polls task state. Unknown ids report the `not_found` phase inside a
    /// successful envelope; the query itself did not fail.
    pub fn query_task(&self, draft_id: &str) -> ApiResponse {
        ApiResponse::from_result(self.tasks.query(draft_id))
    }

    /// Signed URL for the finalized archive exactly as uploaded.
    pub async fn sign_base(&self, draft_id: &str) -> ApiResponse {
        let store = match &self.object_store {
            Some(store) => store,
            None => return ApiResponse::failure("object store is not configured"),
        };
        let object_name = format!("{draft_id}.zip");
        match store.exists(&object_name).await {
            Ok(true) => {}
            Ok(false) => {
                return ApiResponse::failure(format!("no finalized archive for draft {draft_id}"))
            }
            Err(err) => return ApiResponse::failure(err.to_string()),
        }
        ApiResponse::from_result(
            store
                .sign(&object_name, signed_url_ttl(&self.config))
                .await
                .map(|url| json!({ "url": url })),
        )
    }

    /// Signed URL for an archive rewritten for the requested client
    /// layout, deriving and storing it on first request.
    pub async fn sign_customized(
        &self,
        draft_id: &str,
        os: Option<TargetOs>,
        base_folder: Option<&str>,
    ) -> ApiResponse {
        let customizer = match &self.customizer {
            Some(customizer) => customizer,
            None => return ApiResponse::failure("object store is not configured"),
        };
        let os = os.unwrap_or(self.config.client.default_os);
        let base = base_folder.unwrap_or_else(|| self.config.client.default_base(os));
        ApiResponse::from_result(
            customizer
                .signed_customized_url(draft_id, os, base)
                .await
                .map(|url| json!({ "url": url })),
        )
    }

    /// Capability names available under the configured editor variant.
    pub fn capabilities(&self) -> ApiResponse {
        let catalog = catalog::catalog(self.config.system.editor_variant);
        ApiResponse::ok(json!({
            "editor_variant": self.config.system.editor_variant.as_str(),
            "animations": sorted_keys(&catalog.animations),
            "effects": sorted_keys(&catalog.effects),
            "masks": sorted_keys(&catalog.masks),
            "fonts": sorted_keys(&catalog.fonts),
        }))
    }

    pub fn get_draft(&self, draft_id: &str) -> ApiResponse {
        match self.drafts.get(draft_id) {
            Ok(Some(document)) => ApiResponse::from_result::<_, DraftError>(Ok(document)),
            Ok(None) => ApiResponse::failure(format!("draft {draft_id} not found")),
            Err(err) => ApiResponse::failure(err.to_string()),
        }
    }

    pub fn put_draft(
        &self,
        draft_id: &str,
        document: &DraftDocument,
        canvas_width: u32,
        canvas_height: u32,
    ) -> ApiResponse {
        ApiResponse::from_result(
            self.drafts
                .put(draft_id, document, canvas_width, canvas_height)
                .map(|_| json!({ "draft_id": draft_id })),
        )
    }
}

fn sorted_keys(set: &std::collections::HashMap<String, CatalogEntry>) -> Vec<String> {
    let mut keys: Vec<String> = set.keys().cloned().collect();
    keys.sort();
    keys
}

fn signed_url_ttl(config: &DraftpackConfig) -> Duration {
    config
        .object_store
        .as_ref()
        .map(|section| Duration::from_secs(section.signed_url_ttl_seconds))
        .unwrap_or(Duration::from_secs(24 * 3600))
}

/// Health probe used by the CLI: checks that both stores answer.
pub fn health_check(config: &DraftpackConfig) -> ApiResponse {
    let data_dir = config.resolve_path(&config.paths.data_dir);
    let drafts = SqliteDraftStore::new(data_dir.join("drafts.db"))
        .and_then(|store| store.exists("__health__"));
    let tasks = TaskStateStore::new(data_dir.join("tasks.db"))
        .and_then(|store| store.query("__health__"));
    match (drafts, tasks) {
        (Ok(_), Ok(_)) => ApiResponse::ok(json!({ "status": "ok" })),
        (Err(err), _) => ApiResponse::failure(format!("draft store: {err}")),
        (_, Err(err)) => ApiResponse::failure(format!("task store: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_exactly_one_side() {
        let ok = ApiResponse::ok(json!({"x": 1}));
        assert!(ok.success && ok.output.is_some() && ok.error.is_none());
        let err = ApiResponse::failure("boom");
        assert!(!err.success && err.output.is_none() && err.error.is_some());

        let raw = serde_json::to_string(&err).unwrap();
        assert!(!raw.contains("output"));
    }
}
