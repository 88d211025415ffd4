use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::paths::TargetOs;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DraftpackConfig {
    pub system: SystemSection,
    pub paths: PathsSection,
    pub download: DownloadSection,
    pub client: ClientSection,
    #[serde(default)]
    pub object_store: Option<ObjectStoreSection>,
}

impl DraftpackConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    /// Fail-fast validation at startup. Upload mode without object store
    /// credentials would otherwise only surface on the first sign call.
    pub fn validate(&self) -> Result<()> {
        if self.system.upload_mode && self.object_store.is_none() {
            return Err(ConfigError::Invalid(
                "upload_mode requires an [object_store] section".to_string(),
            ));
        }
        Ok(())
    }

    pub fn work_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.work_dir)
    }

    pub fn template_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.templates_dir)
            .join(self.system.editor_variant.dir_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorVariant {
    Classic,
    Pro,
}

impl EditorVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditorVariant::Classic => "classic",
            EditorVariant::Pro => "pro",
        }
    }

    pub fn dir_name(&self) -> &'static str {
        self.as_str()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub editor_variant: EditorVariant,
    pub upload_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub work_dir: String,
    pub templates_dir: String,
    pub data_dir: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSection {
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_audio_timeout")]
    pub audio_timeout_seconds: u64,
    #[serde(default = "default_file_timeout")]
    pub file_timeout_seconds: u64,
    /// Requests whose URL host equals `public_host` are redirected to
    /// `internal_base` (scheme + host) before connecting.
    #[serde(default)]
    pub public_host: Option<String>,
    #[serde(default)]
    pub internal_base: Option<String>,
    /// Merged over the built-in headers; these values win.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_max_parallel() -> usize {
    16
}

fn default_max_retries() -> u32 {
    3
}

fn default_audio_timeout() -> u64 {
    60
}

fn default_file_timeout() -> u64 {
    180
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSection {
    pub default_os: TargetOs,
    pub windows_base: String,
    pub macos_base: String,
    pub linux_base: String,
}

impl ClientSection {
    pub fn default_base(&self, os: TargetOs) -> &str {
        match os {
            TargetOs::Windows => &self.windows_base,
            TargetOs::Macos => &self.macos_base,
            TargetOs::Linux => &self.linux_base,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreSection {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub access_key_secret: String,
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_seconds: u64,
}

fn default_signed_url_ttl() -> u64 {
    24 * 3600
}

impl ObjectStoreSection {
    /// Environment variables take precedence over file values, so deployed
    /// hosts can keep credentials out of the config file.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var("DRAFTPACK_OS_ENDPOINT") {
            self.endpoint = value;
        }
        if let Ok(value) = std::env::var("DRAFTPACK_OS_REGION") {
            self.region = value;
        }
        if let Ok(value) = std::env::var("DRAFTPACK_OS_BUCKET") {
            self.bucket = value;
        }
        if let Ok(value) = std::env::var("DRAFTPACK_OS_ACCESS_KEY_ID") {
            self.access_key_id = value;
        }
        if let Ok(value) = std::env::var("DRAFTPACK_OS_ACCESS_KEY_SECRET") {
            self.access_key_secret = value;
        }
        self
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DraftpackConfig> {
    let mut config: DraftpackConfig = load_toml(path)?;
    config.object_store = config.object_store.map(ObjectStoreSection::apply_env_overrides);
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/draftpack.toml");
        let config = load_config(path).expect("config should parse");
        assert_eq!(config.system.editor_variant, EditorVariant::Pro);
        assert!(!config.system.upload_mode);
        assert_eq!(config.download.max_parallel, 16);
        assert_eq!(config.download.max_retries, 3);
        assert_eq!(config.client.default_os, TargetOs::Windows);
        assert!(config.client.windows_base.contains(":"));
    }

    #[test]
    fn upload_mode_without_object_store_is_rejected() {
        let raw = r#"
            [system]
            editor_variant = "classic"
            upload_mode = true

            [paths]
            base_dir = "/tmp/draftpack"
            work_dir = "work"
            templates_dir = "templates"
            data_dir = "data"
            logs_dir = "logs"

            [download]

            [client]
            default_os = "windows"
            windows_base = "D:/Drafts"
            macos_base = "/Users/Shared/Drafts"
            linux_base = "/var/lib/drafts"
        "#;
        let config: DraftpackConfig = toml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }
}
