//! Zip packaging for finalized drafts.
//!
//! Directory entries are written explicitly so consumers that unpack
//! entry-by-entry always see the `assets/{audio,video,image}` skeleton,
//! even when a draft carries no material of some kind.

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("entry not found in archive: {0}")]
    MissingEntry(String),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        source,
        path: path.to_path_buf(),
    }
}

fn options() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

/// Packs `src_dir` into `dst_zip`. Entry names are relative to `src_dir`
/// with forward slashes; directories get their own entries and files are
/// deflated. Traversal order is sorted so the same tree zips to the same
/// entry sequence.
pub fn zip_directory(src_dir: &Path, dst_zip: &Path) -> ArchiveResult<()> {
    if let Some(parent) = dst_zip.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let file = File::create(dst_zip).map_err(io_err(dst_zip))?;
    let mut writer = ZipWriter::new(file);

    for entry in WalkDir::new(src_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| ArchiveError::Io {
            source: source.into(),
            path: src_dir.to_path_buf(),
        })?;
        let relative = entry.path().strip_prefix(src_dir).unwrap_or(entry.path());
        let name = relative.to_string_lossy().replace('\\', "/");
        if entry.file_type().is_dir() {
            writer.add_directory(name, options())?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, options())?;
            let mut source = File::open(entry.path()).map_err(io_err(entry.path()))?;
            std::io::copy(&mut source, &mut writer).map_err(io_err(entry.path()))?;
        }
    }
    writer.finish()?;
    Ok(())
}

/// Rebuilds a zip with one entry's bytes passed through `rewrite`; every
/// other entry is copied raw, compressed data and all. The entry name is
/// matched case-insensitively and the original casing is kept in the
/// output. Fails if no entry matches so callers never silently produce an
/// unmodified copy.
pub fn rewrite_entry<F>(archive: &[u8], entry_name: &str, rewrite: F) -> ArchiveResult<Vec<u8>>
where
    F: FnOnce(Vec<u8>) -> Vec<u8>,
{
    let mut reader = ZipArchive::new(Cursor::new(archive))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut rewrite = Some(rewrite);

    for index in 0..reader.len() {
        let entry = reader.by_index(index)?;
        if entry.is_dir() {
            writer.add_directory(entry.name().trim_end_matches('/'), options())?;
            continue;
        }
        if entry.name().eq_ignore_ascii_case(entry_name) {
            let mut entry = entry;
            let name = entry.name().to_string();
            let mut raw = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut raw)
                .map_err(io_err(Path::new(entry_name)))?;
            let rewriter = rewrite
                .take()
                .ok_or_else(|| ArchiveError::MissingEntry(entry_name.to_string()))?;
            writer.start_file(name, options())?;
            writer
                .write_all(&rewriter(raw))
                .map_err(io_err(Path::new(entry_name)))?;
        } else {
            writer.raw_copy_file(entry)?;
        }
    }

    if rewrite.is_some() {
        return Err(ArchiveError::MissingEntry(entry_name.to_string()));
    }
    Ok(writer.finish()?.into_inner())
}

/// Lists entry names in archive order; used by tests and diagnostics.
pub fn entry_names(archive: &[u8]) -> ArchiveResult<Vec<String>> {
    let mut reader = ZipArchive::new(Cursor::new(archive))?;
    let mut names = Vec::with_capacity(reader.len());
    for index in 0..reader.len() {
        names.push(reader.by_index(index)?.name().to_string());
    }
    Ok(names)
}

/// Reads one entry fully into memory.
pub fn read_entry(archive: &[u8], entry_name: &str) -> ArchiveResult<Vec<u8>> {
    let mut reader = ZipArchive::new(Cursor::new(archive))?;
    let mut entry = reader
        .by_name(entry_name)
        .map_err(|_| ArchiveError::MissingEntry(entry_name.to_string()))?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut bytes)
        .map_err(io_err(Path::new(entry_name)))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn empty_directories_become_entries() {
        let root = tempdir().unwrap();
        let draft = root.path().join("dft_a");
        for kind in ["audio", "video", "image"] {
            fs::create_dir_all(draft.join("assets").join(kind)).unwrap();
        }
        fs::write(draft.join("draft_info.json"), b"{}").unwrap();

        let zip_path = root.path().join("dft_a.zip");
        zip_directory(&draft, &zip_path).unwrap();

        let bytes = fs::read(&zip_path).unwrap();
        let names = entry_names(&bytes).unwrap();
        for expected in [
            "assets/",
            "assets/audio/",
            "assets/video/",
            "assets/image/",
            "draft_info.json",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn rewrite_entry_touches_only_the_named_entry() {
        let root = tempdir().unwrap();
        let draft = root.path().join("dft_b");
        fs::create_dir_all(&draft).unwrap();
        fs::write(draft.join("draft_info.json"), b"old").unwrap();
        fs::write(draft.join("other.bin"), b"payload").unwrap();
        let zip_path = root.path().join("dft_b.zip");
        zip_directory(&draft, &zip_path).unwrap();

        let bytes = fs::read(&zip_path).unwrap();
        let rewritten = rewrite_entry(&bytes, "draft_info.json", |_| b"new".to_vec()).unwrap();

        assert_eq!(read_entry(&rewritten, "draft_info.json").unwrap(), b"new");
        assert_eq!(read_entry(&rewritten, "other.bin").unwrap(), b"payload");
    }

    #[test]
    fn rewrite_entry_matches_names_case_insensitively() {
        let root = tempdir().unwrap();
        let draft = root.path().join("dft_e");
        fs::create_dir_all(&draft).unwrap();
        fs::write(draft.join("Draft_Info.json"), b"old").unwrap();
        let zip_path = root.path().join("dft_e.zip");
        zip_directory(&draft, &zip_path).unwrap();

        let bytes = fs::read(&zip_path).unwrap();
        let rewritten = rewrite_entry(&bytes, "draft_info.json", |_| b"new".to_vec()).unwrap();

        // The rewrite applies and the archive keeps the original casing.
        assert_eq!(read_entry(&rewritten, "Draft_Info.json").unwrap(), b"new");
        assert!(entry_names(&rewritten)
            .unwrap()
            .contains(&"Draft_Info.json".to_string()));
    }

    #[test]
    fn missing_source_directory_is_an_error() {
        let root = tempdir().unwrap();
        let result = zip_directory(&root.path().join("absent"), &root.path().join("out.zip"));
        assert!(matches!(result, Err(ArchiveError::Io { .. })));
    }

    #[test]
    fn rewrite_entry_requires_the_entry() {
        let root = tempdir().unwrap();
        let draft = root.path().join("dft_c");
        fs::create_dir_all(&draft).unwrap();
        fs::write(draft.join("other.bin"), b"x").unwrap();
        let zip_path = root.path().join("dft_c.zip");
        zip_directory(&draft, &zip_path).unwrap();

        let bytes = fs::read(&zip_path).unwrap();
        assert!(matches!(
            rewrite_entry(&bytes, "draft_info.json", |raw| raw),
            Err(ArchiveError::MissingEntry(_))
        ));
    }
}
