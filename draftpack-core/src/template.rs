//! Clones a read-only editor template into a per-draft working directory.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

/// Fixed skeleton the consumer editor expects under every draft folder.
pub const ASSET_KIND_DIRS: [&str; 3] = ["audio", "video", "image"];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template directory missing: {0}")]
    MissingTemplate(PathBuf),
    #[error("target already exists: {0}")]
    TargetExists(PathBuf),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type TemplateResult<T> = Result<T, TemplateError>;

#[derive(Debug, Clone)]
pub struct TemplateCopier {
    template_dir: PathBuf,
}

impl TemplateCopier {
    /// `template_dir` is the variant-specific directory selected by the
    /// `editor_variant` config flag.
    pub fn new(template_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_dir: template_dir.into(),
        }
    }

    /// Copies the template tree into `work_dir/draft_id` and ensures the
    /// `assets/{audio,video,image}` skeleton. Refuses to write over an
    /// existing target; the materializer deletes stale directories before
    /// calling in so every job starts clean.
    pub fn materialize_into(&self, work_dir: &Path, draft_id: &str) -> TemplateResult<PathBuf> {
        if !self.template_dir.is_dir() {
            return Err(TemplateError::MissingTemplate(self.template_dir.clone()));
        }
        let target = work_dir.join(draft_id);
        if target.exists() {
            return Err(TemplateError::TargetExists(target));
        }
        fs::create_dir_all(&target).map_err(|source| TemplateError::Io {
            path: target.clone(),
            source,
        })?;

        for entry in WalkDir::new(&self.template_dir).min_depth(1) {
            let entry = entry.map_err(|source| TemplateError::Io {
                path: self.template_dir.clone(),
                source: source.into(),
            })?;
            let relative = entry
                .path()
                .strip_prefix(&self.template_dir)
                .unwrap_or(entry.path());
            let destination = target.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&destination).map_err(|source| TemplateError::Io {
                    path: destination.clone(),
                    source,
                })?;
            } else {
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent).map_err(|source| TemplateError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                fs::copy(entry.path(), &destination).map_err(|source| TemplateError::Io {
                    path: destination.clone(),
                    source,
                })?;
            }
        }

        for kind in ASSET_KIND_DIRS {
            let dir = target.join("assets").join(kind);
            fs::create_dir_all(&dir).map_err(|source| TemplateError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copies_template_and_creates_skeleton() {
        let root = tempdir().unwrap();
        let template = root.path().join("template");
        fs::create_dir_all(&template).unwrap();
        fs::write(template.join("draft_meta_info.json"), b"{}").unwrap();

        let work = root.path().join("work");
        fs::create_dir_all(&work).unwrap();
        let copier = TemplateCopier::new(&template);
        let target = copier.materialize_into(&work, "dft_a").unwrap();

        assert!(target.join("draft_meta_info.json").is_file());
        for kind in ASSET_KIND_DIRS {
            assert!(target.join("assets").join(kind).is_dir());
        }
    }

    #[test]
    fn refuses_existing_target() {
        let root = tempdir().unwrap();
        let template = root.path().join("template");
        fs::create_dir_all(&template).unwrap();
        let work = root.path().join("work");
        fs::create_dir_all(work.join("dft_a")).unwrap();

        let copier = TemplateCopier::new(&template);
        assert!(matches!(
            copier.materialize_into(&work, "dft_a"),
            Err(TemplateError::TargetExists(_))
        ));
    }
}
