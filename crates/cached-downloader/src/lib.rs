//! # Cached Downloader
//!
//! A disk-backed, size-bounded cache in front of a conditional HTTP
//! downloader. Unchanged resources are revalidated instead of re-fetched,
//! total disk usage is bounded by least-recently-used eviction, and files are
//! shared safely between concurrent readers.
//!
//! ## Features
//!
//! - Conditional revalidation with `ETag` / `Last-Modified`
//! - LRU eviction with a hard byte capacity
//! - Untracked fallback for oversized or non-revalidatable responses
//! - Handles that clean up their own files under both platform deletion models
//!
//! ```no_run
//! use cached_downloader::{CacheConfig, CachedDownloader};
//! use tokio::io::AsyncReadExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = CachedDownloader::new(CacheConfig::default()).await?;
//! let mut file = cache
//!     .fetch("https://example.com/buildpack.zip", "buildpack-ruby")
//!     .await?;
//!
//! let mut body = Vec::new();
//! file.read_to_end(&mut body).await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod key;
pub mod lifecycle;
pub mod store;

pub use builder::CacheConfigBuilder;
pub use config::CacheConfig;
pub use downloader::{DownloadOutcome, Downloader, HttpDownloader, Validators, create_client};
pub use error::{DownloadError, FetchError};
pub use fetcher::CachedDownloader;
pub use key::CacheId;
pub use lifecycle::{DeletionModel, FetchedFile, FileOrigin, ReleasePolicy};
pub use store::{Admission, CacheEntry, CacheStats, CacheStore, Lookup};
