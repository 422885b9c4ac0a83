use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::DeletionModel;

const DEFAULT_USER_AGENT: &str = concat!("cached-downloader/", env!("CARGO_PKG_VERSION"));

/// Configuration for a [`CachedDownloader`](crate::CachedDownloader)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding tracked cache files; wiped and recreated on construction
    pub cache_dir: PathBuf,

    /// Directory for in-flight transfers and uncached files
    pub scratch_dir: PathBuf,

    /// Maximum total size of tracked files in bytes
    pub max_size_bytes: u64,

    /// Deadline for a single transfer, forwarded to the downloader
    pub download_timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// How files handed to callers are deleted
    pub deletion_model: DeletionModel,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let temp_dir = std::env::temp_dir();
        Self {
            cache_dir: temp_dir.join("cached-downloader").join("cache"),
            scratch_dir: temp_dir.join("cached-downloader").join("scratch"),
            max_size_bytes: 500 * 1024 * 1024, // 500MB
            download_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            deletion_model: DeletionModel::platform_default(),
        }
    }
}

impl CacheConfig {
    pub fn builder() -> crate::builder::CacheConfigBuilder {
        crate::builder::CacheConfigBuilder::new()
    }

    /// Configuration with explicit directories, capacity and timeout; everything else defaulted
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
        max_size_bytes: u64,
        download_timeout: Duration,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            scratch_dir: scratch_dir.into(),
            max_size_bytes,
            download_timeout,
            ..Self::default()
        }
    }
}
