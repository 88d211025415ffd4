//! The draft document: an editing timeline referencing remote media.
//!
//! The engine only touches the traversal points it needs (materials and
//! track segments). Everything else the editor wrote into the document is
//! carried through untouched via flattened maps, so a round-trip through
//! the store never loses fields this crate does not model.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{DraftError, DraftResult};

/// Draft ids double as filenames and object keys.
pub fn is_valid_draft_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
    Image,
}

impl MediaKind {
    /// Subfolder under `assets/` where this kind of material lands.
    pub fn asset_dir(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub material_id: String,
    /// Unique within the document; used as the on-disk filename.
    pub material_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    /// What the consumer editor will read. Rewritten during finalize.
    #[serde(default)]
    pub path: String,
    pub media_type: MediaKind,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Microseconds.
    #[serde(default)]
    pub duration: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Material {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            material_id: id.into(),
            material_name: name.into(),
            remote_url: None,
            path: String::new(),
            media_type: kind,
            width: 0,
            height: 0,
            duration: 0,
            extra: Map::new(),
        }
    }

    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }
}

/// Half-open occupation `[start, end)` of a track, in microseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub segment_id: String,
    pub material_id: String,
    pub start: i64,
    pub end: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Segment {
    pub fn new(id: impl Into<String>, material_id: impl Into<String>, start: i64, end: i64) -> Self {
        Self {
            segment_id: id.into(),
            material_id: material_id.into(),
            start,
            end,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub track_id: String,
    pub track_type: String,
    pub segments: Vec<Segment>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Track {
    pub fn new(id: impl Into<String>, track_type: impl Into<String>) -> Self {
        Self {
            track_id: id.into(),
            track_type: track_type.into(),
            segments: Vec::new(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DraftDocument {
    #[serde(default)]
    pub audios: Vec<Material>,
    #[serde(default)]
    pub videos: Vec<Material>,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DraftDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// All materials that reference media bytes, audio first. Visual
    /// materials (video and image) share the `videos` collection; the
    /// `media_type` tag distinguishes them.
    pub fn materials(&self) -> impl Iterator<Item = &Material> {
        self.audios.iter().chain(self.videos.iter())
    }

    pub fn materials_mut(&mut self) -> impl Iterator<Item = &mut Material> {
        self.audios.iter_mut().chain(self.videos.iter_mut())
    }

    pub fn material_by_id(&self, material_id: &str) -> Option<&Material> {
        self.materials().find(|m| m.material_id == material_id)
    }

    pub fn material_by_id_mut(&mut self, material_id: &str) -> Option<&mut Material> {
        self.materials_mut().find(|m| m.material_id == material_id)
    }

    /// Material names become on-disk filenames; a collision would make two
    /// materials overwrite each other inside `assets/`.
    pub fn ensure_unique_material_names(&self) -> DraftResult<()> {
        let mut seen = HashSet::new();
        for material in self.materials() {
            if !seen.insert(material.material_name.as_str()) {
                return Err(DraftError::DuplicateMaterialName(
                    material.material_name.clone(),
                ));
            }
        }
        Ok(())
    }

    pub fn push_material(&mut self, material: Material) -> DraftResult<()> {
        if self
            .materials()
            .any(|m| m.material_name == material.material_name)
        {
            return Err(DraftError::DuplicateMaterialName(material.material_name));
        }
        match material.media_type {
            MediaKind::Audio => self.audios.push(material),
            MediaKind::Video | MediaKind::Image => self.videos.push(material),
        }
        Ok(())
    }

    pub fn serialize(&self) -> DraftResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn deserialize(raw: &str) -> DraftResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> DraftDocument {
        let mut doc = DraftDocument::new();
        doc.push_material(
            Material::new("a1", "voice.mp3", MediaKind::Audio)
                .with_remote_url("http://host/voice.mp3"),
        )
        .unwrap();
        doc.push_material(
            Material::new("v1", "clip.mp4", MediaKind::Video)
                .with_remote_url("http://host/clip.mp4"),
        )
        .unwrap();
        let mut track = Track::new("t1", "video");
        track.segments.push(Segment::new("s1", "v1", 0, 5_000_000));
        doc.tracks.push(track);
        doc
    }

    #[test]
    fn document_round_trips() {
        let doc = sample_document();
        let raw = doc.serialize().unwrap();
        let back = DraftDocument::deserialize(&raw).unwrap();
        assert_eq!(doc, back);
    }

    #[test]
    fn unknown_fields_survive_round_trip() {
        let raw = r#"{"audios":[],"videos":[],"tracks":[],"canvas_config":{"ratio":"9:16"}}"#;
        let doc = DraftDocument::deserialize(raw).unwrap();
        assert!(doc.extra.contains_key("canvas_config"));
        let again = DraftDocument::deserialize(&doc.serialize().unwrap()).unwrap();
        assert_eq!(doc, again);
    }

    #[test]
    fn duplicate_material_names_are_rejected() {
        let mut doc = sample_document();
        let dup = Material::new("v2", "clip.mp4", MediaKind::Video);
        assert!(matches!(
            doc.push_material(dup),
            Err(DraftError::DuplicateMaterialName(_))
        ));
    }

    #[test]
    fn draft_id_charset() {
        assert!(is_valid_draft_id("dft_a-01"));
        assert!(!is_valid_draft_id(""));
        assert!(!is_valid_draft_id("../escape"));
        assert!(!is_valid_draft_id("white space"));
    }
}
