//! Remote asset fetching with retries, streaming and host rewrite.

mod error;
pub mod pool;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, REFERER, USER_AGENT};
use reqwest::Client;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::config::DownloadSection;
use crate::draft::MediaKind;

pub use error::{FetchError, FetchResult};
pub use pool::{fan_out, DownloadPool, FetchOutcome, PoolProgress};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/122.0.0.0 Safari/537.36";

/// One unit of work for the download pool. `replace_path` is the string the
/// serialized document will carry after the fetch succeeds;
/// `local_target_path` is where the bytes land on the materializing host.
#[derive(Debug, Clone)]
pub struct MaterialFetchJob {
    pub material_id: String,
    pub remote_url: String,
    pub local_target_path: PathBuf,
    pub replace_path: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Total attempts, not retries-after-failure.
    pub max_attempts: u32,
    pub audio_timeout: Duration,
    pub file_timeout: Duration,
    pub headers: HashMap<String, String>,
    pub public_host: Option<String>,
    pub internal_base: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            audio_timeout: Duration::from_secs(60),
            file_timeout: Duration::from_secs(180),
            headers: HashMap::new(),
            public_host: None,
            internal_base: None,
        }
    }
}

impl From<&DownloadSection> for FetcherConfig {
    fn from(section: &DownloadSection) -> Self {
        Self {
            max_attempts: section.max_retries.max(1),
            audio_timeout: Duration::from_secs(section.audio_timeout_seconds),
            file_timeout: Duration::from_secs(section.file_timeout_seconds),
            headers: section.headers.clone(),
            public_host: section.public_host.clone(),
            internal_base: section.internal_base.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AssetFetcher {
    client: Client,
    config: Arc<FetcherConfig>,
    retry_sleep_cap: Duration,
}

impl AssetFetcher {
    pub fn new(config: FetcherConfig) -> FetchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            config: Arc::new(config),
            retry_sleep_cap: Duration::from_secs(60),
        })
    }

    /// Shortens backoff sleeps; tests use this to keep retry paths fast.
    pub fn with_retry_sleep_cap(mut self, cap: Duration) -> Self {
        self.retry_sleep_cap = cap;
        self
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Fetches `src` to `dst`. Local existing files are copied; URLs are
    /// streamed with up to `max_attempts` tries and exponential backoff
    /// (`2^attempt` seconds). A destination that already exists with a
    /// non-zero size short-circuits to success so interrupted jobs resume
    /// instead of re-downloading.
    pub async fn fetch(&self, src: &str, dst: &Path, kind: MediaKind) -> FetchResult<()> {
        if let Ok(meta) = fs::metadata(dst).await {
            if meta.is_file() && meta.len() > 0 {
                debug!(dst = %dst.display(), "destination present, skipping fetch");
                return Ok(());
            }
        }

        if let Some(local) = local_source(src) {
            return copy_local(&local, dst).await;
        }

        let mut last_error = FetchError::InvalidUrl(src.to_string());
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                let backoff = Duration::from_secs(1u64 << attempt.min(16));
                sleep(backoff.min(self.retry_sleep_cap)).await;
            }
            match self.fetch_once(src, dst, kind).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(
                        url = src,
                        attempt = attempt + 1,
                        error = %err,
                        "asset fetch attempt failed"
                    );
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    async fn fetch_once(&self, src: &str, dst: &Path, kind: MediaKind) -> FetchResult<()> {
        let url = self.effective_url(src)?;
        let timeout = match kind {
            MediaKind::Audio => self.config.audio_timeout,
            MediaKind::Video | MediaKind::Image => self.config.file_timeout,
        };
        let headers = self.build_headers(&url)?;
        let response = self
            .client
            .get(url.clone())
            .headers(headers)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| FetchError::from_reqwest(src, err))?;
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                status: response.status().as_u16(),
                url: src.to_string(),
            });
        }

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| FetchError::io(parent, source))?;
        }
        // Stream into a sidecar and rename, so a failed attempt never
        // leaves a truncated destination behind.
        let part = PathBuf::from(format!("{}.part", dst.display()));
        let mut file = fs::File::create(&part)
            .await
            .map_err(|source| FetchError::io(&part, source))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let data = chunk.map_err(|err| FetchError::from_reqwest(src, err))?;
            file.write_all(&data)
                .await
                .map_err(|source| FetchError::io(&part, source))?;
        }
        file.flush()
            .await
            .map_err(|source| FetchError::io(&part, source))?;
        drop(file);
        fs::rename(&part, dst)
            .await
            .map_err(|source| FetchError::io(dst, source))?;
        Ok(())
    }

    /// Applies the public-host rewrite: when the URL host matches the
    /// configured public host and an internal base is set, scheme + host
    /// are replaced before connecting.
    fn effective_url(&self, src: &str) -> FetchResult<Url> {
        let url = Url::parse(src).map_err(|_| FetchError::InvalidUrl(src.to_string()))?;
        let (public, internal) = match (&self.config.public_host, &self.config.internal_base) {
            (Some(public), Some(internal)) => (public, internal),
            _ => return Ok(url),
        };
        if url.host_str() != Some(public.as_str()) {
            return Ok(url);
        }
        let base =
            Url::parse(internal).map_err(|_| FetchError::InvalidUrl(internal.to_string()))?;
        let mut rewritten = url.clone();
        rewritten
            .set_scheme(base.scheme())
            .map_err(|_| FetchError::InvalidUrl(internal.to_string()))?;
        rewritten
            .set_host(base.host_str())
            .map_err(|_| FetchError::InvalidUrl(internal.to_string()))?;
        if let Some(port) = base.port() {
            rewritten
                .set_port(Some(port))
                .map_err(|_| FetchError::InvalidUrl(internal.to_string()))?;
        }
        debug!(from = src, to = %rewritten, "rewrote public host to internal base");
        Ok(rewritten)
    }

    fn build_headers(&self, url: &Url) -> FetchResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        if let Ok(origin) = HeaderValue::from_str(&url.origin().ascii_serialization()) {
            headers.insert(REFERER, origin);
        }
        // Configured headers are merged last so callers win.
        for (name, value) in &self.config.headers {
            let name = name
                .parse::<HeaderName>()
                .map_err(|_| FetchError::InvalidUrl(format!("bad header name: {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| FetchError::InvalidUrl(format!("bad header value for {name}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Treats `src` as local when it is an existing file path or a `file://`
/// URL, which lets tests and intra-host jobs bypass HTTP entirely.
fn local_source(src: &str) -> Option<PathBuf> {
    if let Ok(url) = Url::parse(src) {
        if url.scheme() == "file" {
            return url.to_file_path().ok();
        }
    }
    let path = Path::new(src);
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    None
}

async fn copy_local(src: &Path, dst: &Path) -> FetchResult<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| FetchError::io(parent, source))?;
    }
    fs::copy(src, dst)
        .await
        .map(|_| ())
        .map_err(|source| FetchError::io(dst, source))
}
