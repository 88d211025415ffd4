//! Object storage backend for finalized draft archives.
//!
//! The trait is the seam the materializer and archive customizer talk to;
//! the S3 implementation signs requests itself (AWS signature v4) so the
//! crate works against any S3-compatible endpoint without an SDK.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::ObjectStoreSection;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object store error: {0}")]
    Other(String),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Storage operations the materialization pipeline needs. `sign` returns a
/// URL a client can fetch without credentials until the TTL lapses.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, object_name: &str, local_path: &Path) -> ObjectStoreResult<()>;
    async fn exists(&self, object_name: &str) -> ObjectStoreResult<bool>;
    async fn get(&self, object_name: &str) -> ObjectStoreResult<Vec<u8>>;
    async fn sign(&self, object_name: &str, ttl: Duration) -> ObjectStoreResult<String>;
}

pub struct S3ObjectStore {
    client: Client,
    endpoint: Url,
    region: String,
    bucket: String,
    access_key_id: String,
    access_key_secret: String,
}

impl S3ObjectStore {
    pub fn new(section: &ObjectStoreSection) -> ObjectStoreResult<Self> {
        let raw = if section.endpoint.contains("://") {
            section.endpoint.clone()
        } else {
            format!("https://{}", section.endpoint)
        };
        let endpoint = Url::parse(&raw)
            .map_err(|err| ObjectStoreError::Other(format!("bad endpoint {raw}: {err}")))?;
        let client = Client::builder()
            .build()
            .map_err(|err| ObjectStoreError::Network(err.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            region: section.region.clone(),
            bucket: section.bucket.clone(),
            access_key_id: section.access_key_id.clone(),
            access_key_secret: section.access_key_secret.clone(),
        })
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Path-style addressing keeps the same code working for AWS and for
    /// self-hosted S3-compatible stores.
    fn canonical_uri(&self, object_name: &str) -> String {
        let mut uri = format!("/{}", uri_encode(&self.bucket, false));
        for segment in object_name.split('/') {
            uri.push('/');
            uri.push_str(&uri_encode(segment, true));
        }
        uri
    }

    fn object_url(&self, object_name: &str) -> ObjectStoreResult<Url> {
        let mut url = self.endpoint.clone();
        url.set_path(&self.canonical_uri(object_name));
        url.set_query(None);
        Ok(url)
    }

    fn signing_key(&self, date: &str) -> ObjectStoreResult<Vec<u8>> {
        let mut key = hmac_sha256(
            format!("AWS4{}", self.access_key_secret).as_bytes(),
            date.as_bytes(),
        )?;
        for part in [self.region.as_str(), "s3", "aws4_request"] {
            key = hmac_sha256(&key, part.as_bytes())?;
        }
        Ok(key)
    }

    fn scope(&self, date: &str) -> String {
        format!("{date}/{}/s3/aws4_request", self.region)
    }

    fn signature(
        &self,
        date: &str,
        timestamp: &str,
        canonical_request: &str,
    ) -> ObjectStoreResult<String> {
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{timestamp}\n{}\n{}",
            self.scope(date),
            sha256_hex(canonical_request.as_bytes())
        );
        let key = self.signing_key(date)?;
        Ok(hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?))
    }

    /// Issues a header-signed request with an explicit payload hash.
    async fn signed_request(
        &self,
        method: Method,
        object_name: &str,
        body: Option<Vec<u8>>,
    ) -> ObjectStoreResult<reqwest::Response> {
        let now = Utc::now();
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let payload_hash = match &body {
            Some(bytes) => sha256_hex(bytes),
            None => sha256_hex(b""),
        };
        let host = self.host();
        let canonical_request = format!(
            "{method}\n{uri}\n\nhost:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{timestamp}\n\nhost;x-amz-content-sha256;x-amz-date\n{payload_hash}",
            method = method.as_str(),
            uri = self.canonical_uri(object_name),
        );
        let signature = self.signature(&date, &timestamp, &canonical_request)?;
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={signature}",
            self.access_key_id,
            self.scope(&date),
        );

        let url = self.object_url(object_name)?;
        let mut request = self
            .client
            .request(method, url)
            .header("host", host)
            .header("x-amz-date", timestamp)
            .header("x-amz-content-sha256", payload_hash)
            .header("authorization", authorization);
        if let Some(bytes) = body {
            request = request.body(bytes);
        }
        request
            .send()
            .await
            .map_err(|err| ObjectStoreError::Network(err.to_string()))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, object_name: &str, local_path: &Path) -> ObjectStoreResult<()> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|err| ObjectStoreError::Other(format!("{}: {err}", local_path.display())))?;
        debug!(object = object_name, bytes = bytes.len(), "uploading object");
        let response = self
            .signed_request(Method::PUT, object_name, Some(bytes))
            .await?;
        classify_status(object_name, response.status())?;
        Ok(())
    }

    async fn exists(&self, object_name: &str) -> ObjectStoreResult<bool> {
        let response = self.signed_request(Method::HEAD, object_name, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        classify_status(object_name, response.status())?;
        Ok(true)
    }

    async fn get(&self, object_name: &str) -> ObjectStoreResult<Vec<u8>> {
        let response = self.signed_request(Method::GET, object_name, None).await?;
        classify_status(object_name, response.status())?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ObjectStoreError::Network(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// Presigned GET with query-string authentication and an unsigned
    /// payload. No network call is made.
    async fn sign(&self, object_name: &str, ttl: Duration) -> ObjectStoreResult<String> {
        let now = Utc::now();
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let expires = ttl.as_secs().max(1);
        let credential = format!("{}/{}", self.access_key_id, self.scope(&date));
        let host = self.host();

        // Keys are already in canonical (sorted) order.
        let canonical_query = format!(
            "X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Credential={}&X-Amz-Date={timestamp}&X-Amz-Expires={expires}&X-Amz-SignedHeaders=host",
            uri_encode(&credential, true),
        );
        let canonical_request = format!(
            "GET\n{uri}\n{canonical_query}\nhost:{host}\n\nhost\nUNSIGNED-PAYLOAD",
            uri = self.canonical_uri(object_name),
        );
        let signature = self.signature(&date, &timestamp, &canonical_request)?;

        let mut url = self.object_url(object_name)?;
        url.set_query(Some(&format!(
            "{canonical_query}&X-Amz-Signature={signature}"
        )));
        Ok(url.to_string())
    }
}

fn classify_status(object_name: &str, status: StatusCode) -> ObjectStoreResult<()> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ObjectStoreError::Auth(format!(
            "status {status} for {object_name}"
        ))),
        StatusCode::NOT_FOUND => Err(ObjectStoreError::NotFound(object_name.to_string())),
        other => Err(ObjectStoreError::Other(format!(
            "status {other} for {object_name}"
        ))),
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> ObjectStoreResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| ObjectStoreError::Auth("invalid signing key".to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// RFC 3986 unreserved-set encoding as the signing algorithm requires;
/// `encode_slash` is false only for path components that keep `/`.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> S3ObjectStore {
        S3ObjectStore::new(&ObjectStoreSection {
            endpoint: "store.example.com".into(),
            region: "us-east-1".into(),
            bucket: "drafts".into(),
            access_key_id: "AKIDEXAMPLE".into(),
            access_key_secret: "secret".into(),
            signed_url_ttl_seconds: 86_400,
        })
        .unwrap()
    }

    #[test]
    fn endpoint_without_scheme_defaults_to_https() {
        let store = store();
        assert_eq!(store.endpoint.scheme(), "https");
        assert_eq!(store.host(), "store.example.com");
    }

    #[test]
    fn canonical_uri_is_path_style_and_encoded() {
        let store = store();
        assert_eq!(store.canonical_uri("dft_a.zip"), "/drafts/dft_a.zip");
        assert_eq!(
            store.canonical_uri("a b/c.zip"),
            "/drafts/a%20b/c.zip"
        );
    }

    #[tokio::test]
    async fn signed_url_carries_query_auth() {
        let store = store();
        let url = store
            .sign("dft_a.zip", Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(url.starts_with("https://store.example.com/drafts/dft_a.zip?"));
        assert!(url.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("X-Amz-Credential=AKIDEXAMPLE%2F"));
    }

    #[test]
    fn uri_encode_modes() {
        assert_eq!(uri_encode("a/b c", true), "a%2Fb%20c");
        assert_eq!(uri_encode("a/b c", false), "a/b%20c");
    }
}
