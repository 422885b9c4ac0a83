//! # Downloader
//!
//! The transfer collaborator used by the cache. A [`Downloader`] performs a
//! conditional retrieval: it replays the validators from the last successful
//! transfer and either reports the resource unchanged or writes the full body.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ETAG, HeaderMap, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use url::Url;

use crate::{CacheConfig, DownloadError};

/// Change-detection tokens returned by the origin
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    /// ETag header value
    pub etag: Option<String>,
    /// Last-Modified header value
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn new(etag: Option<String>, last_modified: Option<String>) -> Self {
        Self {
            etag: etag.filter(|s| !s.is_empty()),
            last_modified: last_modified.filter(|s| !s.is_empty()),
        }
    }

    /// Set the ETag value
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        let etag: String = etag.into();
        self.etag = Some(etag).filter(|s| !s.is_empty());
        self
    }

    /// Set the Last-Modified value
    pub fn with_last_modified(mut self, last_modified: impl Into<String>) -> Self {
        let last_modified: String = last_modified.into();
        self.last_modified = Some(last_modified).filter(|s| !s.is_empty());
        self
    }

    /// True when the origin supplied nothing to revalidate against
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }

    /// Extract validators from HTTP response headers
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let etag = headers
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let last_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        Self::new(etag, last_modified)
    }
}

/// Result of a single conditional transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The origin confirmed the resource is unchanged; nothing was written
    NotModified,
    /// A full body was written to the destination
    Fetched {
        /// Number of bytes written
        size: u64,
        /// Validators for the new body, possibly empty
        validators: Validators,
    },
}

impl DownloadOutcome {
    pub fn is_fetched(&self) -> bool {
        matches!(self, DownloadOutcome::Fetched { .. })
    }
}

/// A transfer collaborator performing conditional retrieval
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` into `dest`, using `current` as request preconditions.
    ///
    /// When `current` is empty the body must always be transferred.
    async fn download(
        &self,
        url: &Url,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
        current: &Validators,
    ) -> Result<DownloadOutcome, DownloadError>;
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &CacheConfig) -> Result<Client, DownloadError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .redirect(reqwest::redirect::Policy::limited(10));

    if !config.download_timeout.is_zero() {
        client_builder = client_builder.timeout(config.download_timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    client_builder.build().map_err(DownloadError::from)
}

fn map_request_error(err: reqwest::Error) -> DownloadError {
    if err.is_timeout() {
        DownloadError::Timeout(err.to_string())
    } else {
        DownloadError::HttpError(err)
    }
}

/// [`Downloader`] backed by a reqwest client
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    /// Create a downloader using the timeouts and user agent from `config`
    pub fn new(config: &CacheConfig) -> Result<Self, DownloadError> {
        Ok(Self {
            client: create_client(config)?,
        })
    }

    /// Wrap an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(
        &self,
        url: &Url,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
        current: &Validators,
    ) -> Result<DownloadOutcome, DownloadError> {
        let mut req = self.client.get(url.clone());

        if let Some(etag) = &current.etag {
            req = req.header(IF_NONE_MATCH, etag);
        }

        if let Some(last_modified) = &current.last_modified {
            req = req.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = req.send().await.map_err(map_request_error)?;

        if response.status() == StatusCode::NOT_MODIFIED {
            debug!(url = %url, "Content not modified");
            return Ok(DownloadOutcome::NotModified);
        }

        if !response.status().is_success() {
            return Err(DownloadError::StatusCode(response.status()));
        }

        let validators = Validators::from_headers(response.headers());

        let mut size = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(map_request_error)?;
            dest.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        dest.flush().await?;

        info!(url = %url, size, cacheable = !validators.is_empty(), "Download complete");

        Ok(DownloadOutcome::Fetched { size, validators })
    }
}
