use std::path::PathBuf;

use reqwest::StatusCode;

/// Errors raised by a [`Downloader`](crate::Downloader) while transferring a resource
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    UrlError(String),

    #[error("Server returned status code {0}")]
    StatusCode(StatusCode),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Download timed out: {0}")]
    Timeout(String),

    #[error("Generic download error: {0}")]
    Generic(String),
}

/// Errors surfaced to callers of [`CachedDownloader::fetch`](crate::CachedDownloader::fetch)
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The scratch file for the transfer could not be created
    #[error("Failed to create temporary file in {dir:?}: {source}")]
    TempFile {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The downloader failed; not subdivided further here
    #[error("Transfer failed: {0}")]
    Transfer(#[from] DownloadError),

    /// The placed file could not be opened for reading
    #[error("Failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cache or scratch directory could not be prepared at construction time
    #[error("Failed to prepare directory {path:?}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Whether this error came from the transfer itself rather than local file handling
    pub fn is_transfer(&self) -> bool {
        matches!(self, FetchError::Transfer(_))
    }
}
