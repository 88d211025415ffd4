pub mod archive;
pub mod catalog;
pub mod config;
pub mod customize;
pub mod draft;
pub mod error;
pub mod fetch;
pub mod materialize;
pub mod objectstore;
pub mod paths;
pub mod probe;
pub mod service;
pub mod sqlite;
pub mod task;
pub mod template;

pub use config::{
    load_config, ClientSection, DownloadSection, DraftpackConfig, EditorVariant,
    ObjectStoreSection, PathsSection, SystemSection,
};
pub use customize::{derived_object_name, CustomizeError, CustomizedArchiveService};
pub use draft::{
    is_valid_draft_id, DraftDocument, DraftError, DraftRecord, DraftResult, DraftStore, Material,
    MediaKind, Segment, SqliteDraftStore, SqliteDraftStoreBuilder, Track,
};
pub use error::{ConfigError, Result};
pub use fetch::{
    AssetFetcher, DownloadPool, FetchError, FetchOutcome, FetcherConfig, MaterialFetchJob,
    PoolProgress,
};
pub use materialize::{
    FinalizeOutput, FinalizeRequest, MaterializeError, MaterializeResult, Materializer,
};
pub use objectstore::{ObjectStore, ObjectStoreError, ObjectStoreResult, S3ObjectStore};
pub use paths::TargetOs;
pub use probe::{MediaProbe, MetadataRefresher, ProbeError};
pub use service::{health_check, ApiResponse, DraftService, ServiceError, ServiceResult};
pub use task::{TaskError, TaskPhase, TaskState, TaskStateStore, TaskStateStoreBuilder};
pub use template::{TemplateCopier, TemplateError};
