//! Pure path rewriting for client operating systems.
//!
//! A materialized draft references its assets as `assets/<kind>/<file>`.
//! Consumers open the package from an arbitrary base folder on their own
//! machine, so every stored reference must be rewritten to
//! `<base>/<draft_id>/assets/<kind>/<file>` using the separator of the
//! client OS. All rewriting in the engine funnels through this module.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown target os: {0}")]
pub struct UnknownTargetOs(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOs {
    Windows,
    Macos,
    Linux,
}

impl TargetOs {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetOs::Windows => "windows",
            TargetOs::Macos => "macos",
            TargetOs::Linux => "linux",
        }
    }

    pub fn separator(&self) -> char {
        match self {
            TargetOs::Windows => '\\',
            TargetOs::Macos | TargetOs::Linux => '/',
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TargetOs {
    type Err = UnknownTargetOs;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "windows" | "win" => Ok(Self::Windows),
            "macos" | "mac" | "darwin" => Ok(Self::Macos),
            "linux" => Ok(Self::Linux),
            other => Err(UnknownTargetOs(other.to_string())),
        }
    }
}

/// Replaces everything up to the `assets/` segment with `base/draft_id/`,
/// joined with the separator of `os`. The `assets/...` tail keeps its
/// original casing. Inputs without an `assets` segment are returned
/// unchanged; guessing a layout for them would corrupt the document.
pub fn rewrite(path: &str, draft_id: &str, base: &str, os: TargetOs) -> String {
    let tail = match assets_tail(path) {
        Some(tail) => tail,
        None => return path.to_string(),
    };
    let sep = os.separator();
    let mut out = normalize_separators(base, os);
    while out.ends_with(sep) {
        out.pop();
    }
    out.push(sep);
    out.push_str(draft_id);
    out.push(sep);
    out.push_str(&normalize_separators(tail, os));
    out
}

/// Rewrites every separator in `path` to the convention of `os`.
pub fn normalize_separators(path: &str, os: TargetOs) -> String {
    match os.separator() {
        '\\' => path.replace('/', "\\"),
        _ => path.replace('\\', "/"),
    }
}

/// Locates the `assets/` segment case-insensitively and returns the tail
/// starting at it, with the original casing preserved.
fn assets_tail(path: &str) -> Option<&str> {
    let lower = path.to_ascii_lowercase();
    let mut search_from = 0;
    while let Some(found) = lower[search_from..].find("assets") {
        let start = search_from + found;
        let end = start + "assets".len();
        let boundary_before = start == 0
            || matches!(lower.as_bytes()[start - 1], b'/' | b'\\');
        let boundary_after = matches!(lower.as_bytes().get(end), Some(b'/') | Some(b'\\'));
        if boundary_before && boundary_after {
            return Some(&path[start..]);
        }
        search_from = end;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_against_windows_base() {
        let out = rewrite("assets/video/clip.mp4", "dft_a", "F:/drafts", TargetOs::Windows);
        assert_eq!(out, "F:\\drafts\\dft_a\\assets\\video\\clip.mp4");
    }

    #[test]
    fn rewrites_against_posix_base() {
        let out = rewrite(
            "C:\\old\\assets\\audio\\voice.mp3",
            "dft_a",
            "/home/user/drafts",
            TargetOs::Linux,
        );
        assert_eq!(out, "/home/user/drafts/dft_a/assets/audio/voice.mp3");
    }

    #[test]
    fn detection_is_case_insensitive_but_preserves_tail_casing() {
        let out = rewrite("X:\\Assets\\Video\\Clip.MP4", "d1", "/base", TargetOs::Linux);
        assert_eq!(out, "/base/d1/Assets/Video/Clip.MP4");
    }

    #[test]
    fn paths_without_assets_segment_pass_through() {
        assert_eq!(
            rewrite("draft_info.json", "d1", "/base", TargetOs::Linux),
            "draft_info.json"
        );
        // "assets" embedded in a longer component is not the marker.
        assert_eq!(
            rewrite("my_assets_dir/clip.mp4", "d1", "/base", TargetOs::Linux),
            "my_assets_dir/clip.mp4"
        );
    }

    #[test]
    fn rewrite_is_idempotent() {
        let once = rewrite("assets/image/a.png", "d1", "F:/drafts", TargetOs::Windows);
        let twice = rewrite(&once, "d1", "F:/drafts", TargetOs::Windows);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalized_windows_paths_contain_no_forward_slash() {
        let out = normalize_separators("a/b\\c/d", TargetOs::Windows);
        assert!(!out.contains('/'));
        let back = normalize_separators(&out, TargetOs::Macos);
        assert!(!back.contains('\\'));
    }
}
