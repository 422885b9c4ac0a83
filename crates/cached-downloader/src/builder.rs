//! # Builder for CacheConfig
//!
//! This module provides a builder pattern implementation for creating and customizing
//! CacheConfig instances with a fluent API.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use cached_downloader::{CacheConfig, DeletionModel};
//!
//! let config = CacheConfig::builder()
//!     .with_cache_dir("/var/cache/downloads")
//!     .with_scratch_dir("/var/tmp/downloads")
//!     .with_max_size(1024 * 1024 * 1024)
//!     .with_download_timeout(Duration::from_secs(60))
//!     .with_deletion_model(DeletionModel::Deferred)
//!     .build();
//!
//! assert_eq!(config.max_size_bytes, 1024 * 1024 * 1024);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::{CacheConfig, DeletionModel};

/// Builder for creating CacheConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct CacheConfigBuilder {
    /// Internal config being built
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
        }
    }

    /// Set the directory for tracked cache files
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    /// Set the directory for transfers and uncached files
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = dir.into();
        self
    }

    /// Set the total cache capacity in bytes
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.config.max_size_bytes = bytes;
        self
    }

    /// Set the per-transfer deadline
    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.config.download_timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Override the platform's file deletion model
    pub fn with_deletion_model(mut self, model: DeletionModel) -> Self {
        self.config.deletion_model = model;
        self
    }

    /// Build the CacheConfig instance
    pub fn build(self) -> CacheConfig {
        self.config
    }
}

impl Default for CacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
