use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("fetch cancelled before start")]
    Cancelled,
}

impl FetchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FetchError::Io {
            source,
            path: path.into(),
        }
    }

    pub fn from_reqwest(url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout(url.to_string())
        } else if let Some(status) = error.status() {
            FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            }
        } else {
            FetchError::Transport(error.to_string())
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
