//! Shared fixtures: a directory-backed object store and config/document
//! builders for pipeline tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use draftpack_core::objectstore::{ObjectStore, ObjectStoreError, ObjectStoreResult};
use draftpack_core::{
    ClientSection, DownloadSection, DraftDocument, DraftpackConfig, EditorVariant, Material,
    MediaKind, PathsSection, SystemSection, TargetOs,
};

/// Object store backed by a plain directory. Counts writes so tests can
/// assert reuse.
pub struct DirStore {
    root: PathBuf,
    pub puts: AtomicUsize,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            puts: AtomicUsize::new(0),
        }
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn object_path(&self, object_name: &str) -> PathBuf {
        self.root.join(object_name)
    }

    /// Seeds an object directly, bypassing the trait.
    pub fn seed(&self, object_name: &str, bytes: &[u8]) {
        let path = self.object_path(object_name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, bytes).unwrap();
    }
}

#[async_trait]
impl ObjectStore for DirStore {
    async fn put(&self, object_name: &str, local_path: &Path) -> ObjectStoreResult<()> {
        let target = self.object_path(object_name);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| ObjectStoreError::Other(err.to_string()))?;
        }
        std::fs::copy(local_path, &target)
            .map_err(|err| ObjectStoreError::Other(err.to_string()))?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, object_name: &str) -> ObjectStoreResult<bool> {
        Ok(self.object_path(object_name).is_file())
    }

    async fn get(&self, object_name: &str) -> ObjectStoreResult<Vec<u8>> {
        let path = self.object_path(object_name);
        if !path.is_file() {
            return Err(ObjectStoreError::NotFound(object_name.to_string()));
        }
        std::fs::read(path).map_err(|err| ObjectStoreError::Other(err.to_string()))
    }

    async fn sign(&self, object_name: &str, ttl: Duration) -> ObjectStoreResult<String> {
        Ok(format!(
            "https://signed.test/{object_name}?expires={}",
            ttl.as_secs()
        ))
    }
}

/// Config rooted at a temp directory with uploads off and fast retries.
pub fn test_config(root: &Path) -> DraftpackConfig {
    let template_dir = root.join("templates").join("classic");
    std::fs::create_dir_all(&template_dir).unwrap();
    std::fs::write(template_dir.join("draft_meta_info.json"), b"{}\n").unwrap();

    DraftpackConfig {
        system: SystemSection {
            editor_variant: EditorVariant::Classic,
            upload_mode: false,
        },
        paths: PathsSection {
            base_dir: root.display().to_string(),
            work_dir: "work".to_string(),
            templates_dir: "templates".to_string(),
            data_dir: "data".to_string(),
            logs_dir: "logs".to_string(),
        },
        download: DownloadSection {
            max_parallel: 4,
            max_retries: 2,
            audio_timeout_seconds: 5,
            file_timeout_seconds: 5,
            public_host: None,
            internal_base: None,
            headers: HashMap::new(),
        },
        client: ClientSection {
            default_os: TargetOs::Windows,
            windows_base: "D:/Drafts".to_string(),
            macos_base: "/Users/Shared/Drafts".to_string(),
            linux_base: "/var/lib/drafts".to_string(),
        },
        object_store: None,
    }
}

/// A document with one audio and one video material pointing at local
/// source files created under `sources`.
pub fn seeded_document(sources: &Path) -> DraftDocument {
    std::fs::create_dir_all(sources).unwrap();
    let audio_src = sources.join("voice.mp3");
    let video_src = sources.join("clip.mp4");
    std::fs::write(&audio_src, b"audio-bytes").unwrap();
    std::fs::write(&video_src, b"video-bytes").unwrap();

    let mut document = DraftDocument::new();
    document
        .push_material(
            Material::new("m_audio", "voice.mp3", MediaKind::Audio)
                .with_remote_url(audio_src.display().to_string()),
        )
        .unwrap();
    document
        .push_material(
            Material::new("m_video", "clip.mp4", MediaKind::Video)
                .with_remote_url(video_src.display().to_string()),
        )
        .unwrap();
    document
}
