//! Best-effort media metadata probing and track normalization.
//!
//! Probing failures must never fail a finalize job: a material whose
//! duration cannot be read keeps whatever the document already carried.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};
use url::Url;

use crate::draft::{DraftDocument, MediaKind, Track};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe failed: {0}")]
    Process(String),
    #[error("unreadable probe output: {0}")]
    Parse(String),
    #[error("fetch failed: {0}")]
    Http(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported image data: {0}")]
    Image(String),
}

#[derive(Debug, Clone)]
pub struct MediaProbe {
    pub width: u32,
    pub height: u32,
    /// Microseconds.
    pub duration: i64,
}

#[derive(Clone)]
pub struct MetadataRefresher {
    client: reqwest::Client,
    ffprobe: PathBuf,
}

impl Default for MetadataRefresher {
    fn default() -> Self {
        Self::new(PathBuf::from("ffprobe"))
    }
}

impl MetadataRefresher {
    pub fn new(ffprobe: PathBuf) -> Self {
        Self {
            client: reqwest::Client::new(),
            ffprobe,
        }
    }

    /// Probes every material that still references a remote source, then
    /// normalizes segment ordering per track. Idempotent.
    pub async fn refresh(&self, document: &mut DraftDocument) {
        for material in document.materials_mut() {
            let source = match material.remote_url.as_deref() {
                Some(url) if !url.is_empty() => url.to_string(),
                _ => continue,
            };
            match self.probe(&source, material.media_type).await {
                Ok(probe) => {
                    if probe.duration > 0 {
                        material.duration = probe.duration;
                    }
                    if probe.width > 0 {
                        material.width = probe.width;
                    }
                    if probe.height > 0 {
                        material.height = probe.height;
                    }
                    debug!(
                        material = %material.material_name,
                        duration_us = material.duration,
                        "probed material metadata"
                    );
                }
                Err(err) => {
                    warn!(
                        material = %material.material_name,
                        source = %source,
                        error = %err,
                        "metadata probe failed, keeping existing fields"
                    );
                }
            }
        }
        for track in &mut document.tracks {
            normalize_track(track);
        }
    }

    pub async fn probe(&self, source: &str, kind: MediaKind) -> Result<MediaProbe, ProbeError> {
        match kind {
            MediaKind::Image => self.probe_image(source).await,
            MediaKind::Audio | MediaKind::Video => self.probe_av(source).await,
        }
    }

    /// Runs ffprobe against the source (URL or local path) and reads the
    /// JSON report.
    async fn probe_av(&self, source: &str) -> Result<MediaProbe, ProbeError> {
        let output = Command::new(&self.ffprobe)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(source)
            .output()
            .await?;
        if !output.status.success() {
            return Err(ProbeError::Process(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let report: FfprobeReport = serde_json::from_slice(&output.stdout)
            .map_err(|err| ProbeError::Parse(err.to_string()))?;

        let duration_s = report
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .or_else(|| {
                report
                    .streams
                    .iter()
                    .find_map(|s| s.duration.as_deref())
            })
            .and_then(|raw| raw.parse::<f64>().ok())
            .unwrap_or(0.0);
        let video_stream = report
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"));
        Ok(MediaProbe {
            width: video_stream.and_then(|s| s.width).unwrap_or(0),
            height: video_stream.and_then(|s| s.height).unwrap_or(0),
            duration: (duration_s * 1_000_000.0).round() as i64,
        })
    }

    /// Reads intrinsic dimensions from the encoded image header.
    async fn probe_image(&self, source: &str) -> Result<MediaProbe, ProbeError> {
        let bytes = self.read_source_bytes(source).await?;
        let (width, height) = image::load_from_memory(&bytes)
            .map(|img| (img.width(), img.height()))
            .map_err(|err| ProbeError::Image(err.to_string()))?;
        Ok(MediaProbe {
            width,
            height,
            duration: 0,
        })
    }

    async fn read_source_bytes(&self, source: &str) -> Result<Vec<u8>, ProbeError> {
        if let Some(path) = local_path(source) {
            return Ok(tokio::fs::read(path).await?);
        }
        let response = self
            .client
            .get(source)
            .send()
            .await
            .map_err(|err| ProbeError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ProbeError::Http(format!(
                "status {} for {source}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ProbeError::Http(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn local_path(source: &str) -> Option<PathBuf> {
    if let Ok(url) = Url::parse(source) {
        if url.scheme() == "file" {
            return url.to_file_path().ok();
        }
    }
    let path = Path::new(source);
    path.is_file().then(|| path.to_path_buf())
}

/// Sorts segments by `(start, end)` and drops any segment overlapping its
/// predecessor. Earliest segment wins; on equal starts the shorter one is
/// kept. Running this twice is a no-op.
pub fn normalize_track(track: &mut Track) {
    track
        .segments
        .sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));
    let mut kept = Vec::with_capacity(track.segments.len());
    let mut previous_end = i64::MIN;
    for segment in track.segments.drain(..) {
        if segment.start < previous_end {
            debug!(
                segment = %segment.segment_id,
                start = segment.start,
                previous_end,
                "dropping overlapping segment"
            );
            continue;
        }
        previous_end = segment.end;
        kept.push(segment);
    }
    track.segments = kept;
}

#[derive(Debug, Deserialize)]
struct FfprobeReport {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    duration: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::Segment;

    fn track_with(ranges: &[(i64, i64)]) -> Track {
        let mut track = Track::new("t1", "video");
        for (index, (start, end)) in ranges.iter().enumerate() {
            track
                .segments
                .push(Segment::new(format!("s{index}"), "m1", *start, *end));
        }
        track
    }

    #[test]
    fn overlap_elimination_keeps_earliest() {
        let mut track = track_with(&[(0, 3), (2, 5), (5, 7)]);
        normalize_track(&mut track);
        let ranges: Vec<(i64, i64)> = track.segments.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(ranges, vec![(0, 3), (5, 7)]);
    }

    #[test]
    fn equal_starts_keep_the_shorter_segment() {
        let mut track = track_with(&[(0, 10), (0, 4)]);
        normalize_track(&mut track);
        let ranges: Vec<(i64, i64)> = track.segments.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(ranges, vec![(0, 4)]);
    }

    #[test]
    fn normalization_is_idempotent() {
        let mut track = track_with(&[(4, 6), (0, 3), (2, 5), (6, 9)]);
        normalize_track(&mut track);
        let once: Vec<(i64, i64)> = track.segments.iter().map(|s| (s.start, s.end)).collect();
        normalize_track(&mut track);
        let twice: Vec<(i64, i64)> = track.segments.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(once, twice);
        for pair in track.segments.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }
}
