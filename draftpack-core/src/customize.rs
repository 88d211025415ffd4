//! Derived archives for clients whose OS or install folder differs from
//! the one a draft was finalized for.
//!
//! A derived archive is the base archive with `draft_info.json` rewritten
//! for the requested layout. Derivations are cached in the object store
//! under a key that encodes the customization, so repeated requests for
//! the same layout reuse the stored object.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::archive::{self, ArchiveError};
use crate::draft::is_valid_draft_id;
use crate::objectstore::{ObjectStore, ObjectStoreError};
use crate::paths::{self, TargetOs};

#[derive(Debug, Error)]
pub enum CustomizeError {
    #[error("invalid draft id: {0}")]
    InvalidId(String),
    #[error("no finalized archive for draft {0}")]
    BaseArchiveMissing(String),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CustomizeResult<T> = Result<T, CustomizeError>;

/// Object key for a derived archive. The trailing hash pins the exact
/// `(os, base_folder)` pair so distinct layouts never collide and repeated
/// requests for the same layout map to the same object.
pub fn derived_object_name(draft_id: &str, os: TargetOs, base_folder: &str) -> String {
    let digest = Sha256::digest(format!("{}|{}", os.as_str(), base_folder).as_bytes());
    let tag = &hex::encode(digest)[..12];
    format!("{draft_id}__{}__{tag}.zip", os.as_str())
}

pub struct CustomizedArchiveService {
    store: Arc<dyn ObjectStore>,
    signed_url_ttl: Duration,
}

impl CustomizedArchiveService {
    pub fn new(store: Arc<dyn ObjectStore>, signed_url_ttl: Duration) -> Self {
        Self {
            store,
            signed_url_ttl,
        }
    }

    /// Returns a signed URL for the draft's archive rewritten for
    /// `(os, base_folder)`. Reuses a previously derived object when one
    /// exists; otherwise derives it from the base archive and stores it.
    pub async fn signed_customized_url(
        &self,
        draft_id: &str,
        os: TargetOs,
        base_folder: &str,
    ) -> CustomizeResult<String> {
        if !is_valid_draft_id(draft_id) {
            return Err(CustomizeError::InvalidId(draft_id.to_string()));
        }
        let derived = derived_object_name(draft_id, os, base_folder);
        if self.store.exists(&derived).await? {
            debug!(object = %derived, "reusing derived archive");
            return Ok(self.store.sign(&derived, self.signed_url_ttl).await?);
        }

        let base_name = format!("{draft_id}.zip");
        let base_bytes = match self.store.get(&base_name).await {
            Ok(bytes) => bytes,
            Err(ObjectStoreError::NotFound(_)) => {
                return Err(CustomizeError::BaseArchiveMissing(draft_id.to_string()))
            }
            Err(err) => return Err(err.into()),
        };

        let rewritten = archive::rewrite_entry(&base_bytes, "draft_info.json", |raw| {
            rewrite_document_bytes(&raw, draft_id, base_folder, os)
        })?;

        let mut staged = tempfile::NamedTempFile::new()?;
        staged.write_all(&rewritten)?;
        staged.flush()?;
        self.store.put(&derived, staged.path()).await?;
        info!(object = %derived, bytes = rewritten.len(), "derived archive stored");

        Ok(self.store.sign(&derived, self.signed_url_ttl).await?)
    }
}

/// Rewrites every asset reference in a serialized draft document. Content
/// that does not parse as JSON passes through unchanged; a malformed
/// document is the client's problem, not a reason to fail the derivation.
fn rewrite_document_bytes(raw: &[u8], draft_id: &str, base_folder: &str, os: TargetOs) -> Vec<u8> {
    let mut value: Value = match serde_json::from_slice(raw) {
        Ok(value) => value,
        Err(_) => return raw.to_vec(),
    };
    rewrite_value(&mut value, draft_id, base_folder, os);
    serde_json::to_vec(&value).unwrap_or_else(|_| raw.to_vec())
}

/// Depth-first walk; only string values that reference the assets tree
/// are touched.
fn rewrite_value(value: &mut Value, draft_id: &str, base_folder: &str, os: TargetOs) {
    match value {
        Value::String(text) => {
            if references_assets(text) {
                *text = paths::rewrite(text, draft_id, base_folder, os);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_value(item, draft_id, base_folder, os);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                rewrite_value(item, draft_id, base_folder, os);
            }
        }
        _ => {}
    }
}

fn references_assets(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("assets/") || lower.contains("assets\\")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derived_names_are_stable_and_distinct() {
        let a = derived_object_name("dft_a", TargetOs::Windows, "D:/Drafts");
        let b = derived_object_name("dft_a", TargetOs::Windows, "D:/Drafts");
        let c = derived_object_name("dft_a", TargetOs::Macos, "D:/Drafts");
        let d = derived_object_name("dft_a", TargetOs::Windows, "E:/Other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.starts_with("dft_a__windows__"));
        assert!(a.ends_with(".zip"));
    }

    #[test]
    fn rewrites_only_asset_references() {
        let raw = serde_json::to_vec(&json!({
            "videos": [{"path": "assets/video/clip.mp4"}],
            "name": "my draft",
            "nested": {"paths": ["assets/audio/a.mp3", "unrelated"]}
        }))
        .unwrap();
        let out = rewrite_document_bytes(&raw, "dft_a", "D:/Drafts", TargetOs::Windows);
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            value["videos"][0]["path"],
            "D:\\Drafts\\dft_a\\assets\\video\\clip.mp4"
        );
        assert_eq!(
            value["nested"]["paths"][0],
            "D:\\Drafts\\dft_a\\assets\\audio\\a.mp3"
        );
        assert_eq!(value["name"], "my draft");
        assert_eq!(value["nested"]["paths"][1], "unrelated");
    }

    #[test]
    fn non_json_content_passes_through() {
        let raw = b"not json at all";
        let out = rewrite_document_bytes(raw, "dft_a", "D:/Drafts", TargetOs::Windows);
        assert_eq!(out, raw);
    }
}
