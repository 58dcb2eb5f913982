//! Transport seam for every remote document the pipeline reads.

use crate::config::HttpConfig;
use crate::error::{Result, VisionError};
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;

/// Transport-level failure while retrieving a resource.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("{0}")]
    Other(String),
}

/// Retrieves raw bytes for a URL.
///
/// The pipeline never talks to the network directly; everything goes
/// through an implementation of this trait so it can be swapped in tests.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> std::result::Result<Vec<u8>, FetchError>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for std::sync::Arc<T> {
    async fn fetch(&self, url: &Url) -> std::result::Result<Vec<u8>, FetchError> {
        (**self).fetch(url).await
    }
}

/// `reqwest` backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(cfg: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(cfg.user_agent.clone())
            .build()
            .map_err(|e| VisionError::Config(format!("cannot build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> std::result::Result<Vec<u8>, FetchError> {
        tracing::debug!("GET {url}");
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Parses an absolute URL, mapping failures to [`VisionError::InvalidUrl`].
pub fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw.trim()).map_err(|e| VisionError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Resolves `path` against the document found at `base`.
pub fn resolve_relative(base: &Url, path: &str) -> Result<Url> {
    base.join(path).map_err(|e| VisionError::InvalidUrl {
        url: path.to_string(),
        reason: e.to_string(),
    })
}
