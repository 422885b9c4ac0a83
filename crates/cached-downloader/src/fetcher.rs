//! # Cached Downloader
//!
//! Entry point of the crate. [`CachedDownloader::fetch`] resolves the cache
//! key, replays stored validators to the [`Downloader`], and then either
//! serves the tracked file, admits the fresh transfer into the cache, or
//! hands the transfer back untracked.
//!
//! Concurrent fetches of the same key are not coalesced: each one transfers
//! on its own and the last admission wins. Callers that need single-flight
//! behaviour should keep a map from cache key to an in-flight token (for
//! example a `tokio::sync::Mutex` per key) above this type.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};
use url::Url;

use crate::downloader::{DownloadOutcome, Downloader, HttpDownloader, Validators};
use crate::key::CacheId;
use crate::lifecycle::{FetchedFile, FileOrigin};
use crate::store::{Admission, CacheStats, CacheStore, remove_file_logged};
use crate::{CacheConfig, DownloadError, FetchError};

/// Disk-backed, size-bounded cache in front of a [`Downloader`]
#[derive(Clone)]
pub struct CachedDownloader {
    config: Arc<CacheConfig>,
    store: Arc<CacheStore>,
    downloader: Arc<dyn Downloader>,
}

impl CachedDownloader {
    /// Create a cached downloader using the reqwest-backed [`HttpDownloader`]
    pub async fn new(config: CacheConfig) -> Result<Self, FetchError> {
        let downloader = HttpDownloader::new(&config)?;
        Self::with_downloader(config, downloader).await
    }

    /// Create a cached downloader around a custom transfer collaborator.
    ///
    /// The cache directory is wiped and recreated: the in-memory index cannot
    /// reconcile with files left over from a previous run.
    pub async fn with_downloader(
        config: CacheConfig,
        downloader: impl Downloader + 'static,
    ) -> Result<Self, FetchError> {
        match tokio::fs::remove_dir_all(&config.cache_dir).await {
            Ok(()) => debug!(dir = ?config.cache_dir, "Wiped cache directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(FetchError::Setup {
                    path: config.cache_dir.clone(),
                    source,
                });
            }
        }

        for dir in [&config.cache_dir, &config.scratch_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| FetchError::Setup {
                    path: dir.clone(),
                    source,
                })?;
        }

        info!(
            cache_dir = ?config.cache_dir,
            scratch_dir = ?config.scratch_dir,
            max_size = config.max_size_bytes,
            deletion_model = ?config.deletion_model,
            "Cached downloader ready"
        );

        let store = Arc::new(CacheStore::new(
            config.cache_dir.clone(),
            config.max_size_bytes,
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            downloader: Arc::new(downloader),
        })
    }

    /// Fetch `url`, caching it under `cache_key`.
    ///
    /// An empty `cache_key` always downloads fresh and never touches the cache.
    #[instrument(skip(self), level = "debug")]
    pub async fn fetch(&self, url_str: &str, cache_key: &str) -> Result<FetchedFile, FetchError> {
        let url = url_str
            .parse::<Url>()
            .map_err(|e| DownloadError::UrlError(format!("{url_str}: {e}")))?;

        if cache_key.is_empty() {
            return self.fetch_uncached(&url).await;
        }

        let id = CacheId::resolve(cache_key);
        let result = self.fetch_cached(&url, &id).await;
        if !matches!(&result, Ok(file) if file.release_policy().is_tracked())
            && self.store.discard_access(&id)
        {
            debug!(id = %id, "Dropped access record for untracked fetch");
        }
        result
    }

    async fn fetch_uncached(&self, url: &Url) -> Result<FetchedFile, FetchError> {
        let (outcome, temp) = self
            .transfer(url, &Validators::default(), "uncached-")
            .await?;

        if !outcome.is_fetched() {
            return Err(DownloadError::Generic(format!(
                "{url} reported not modified for an unconditional request"
            ))
            .into());
        }

        let reader = self.open_transfer(&temp).await?;
        let path = self.keep(temp)?;
        self.serve_untracked(reader, path).await
    }

    async fn fetch_cached(&self, url: &Url, id: &CacheId) -> Result<FetchedFile, FetchError> {
        let lookup = self.store.record_access(id);

        let prefix = format!("{id}-");
        let (outcome, temp) = self.transfer(url, &lookup.validators, &prefix).await?;

        match outcome {
            DownloadOutcome::NotModified => {
                drop(temp);

                // Serve whatever is tracked now; a concurrent admission may have replaced it.
                let path = self.store.path(id).or(lookup.path).ok_or_else(|| {
                    FetchError::Open {
                        path: PathBuf::new(),
                        source: io::Error::new(
                            io::ErrorKind::NotFound,
                            "origin reported not modified but nothing is cached",
                        ),
                    }
                })?;

                info!(url = %url, id = %id, "Content not modified, using cache");
                FetchedFile::open(
                    &path,
                    FileOrigin::Tracked {
                        id: id.clone(),
                        store: self.store.clone(),
                    },
                    self.config.deletion_model,
                )
                .await
            }
            DownloadOutcome::Fetched { validators, .. } if validators.is_empty() => {
                info!(url = %url, id = %id, "Response has no validators, serving uncached");
                self.store.remove(id);

                let reader = self.open_transfer(&temp).await?;
                let path = self.keep(temp)?;
                self.serve_untracked(reader, path).await
            }
            DownloadOutcome::Fetched { size, validators } => {
                // Opened before admission so the handle survives a concurrent
                // eviction or replacement of the admitted file.
                let reader = self.open_transfer(&temp).await?;
                let source = self.keep(temp)?;

                match self.store.admit(id, &source, size, validators) {
                    Admission::Tracked(path) => {
                        FetchedFile::wrap(
                            reader,
                            &path,
                            FileOrigin::Tracked {
                                id: id.clone(),
                                store: self.store.clone(),
                            },
                            self.config.deletion_model,
                        )
                        .await
                    }
                    Admission::Untracked(path) => self.serve_untracked(reader, path).await,
                }
            }
        }
    }

    /// Run one transfer into a fresh scratch file.
    ///
    /// The scratch file is removed when the returned [`TempPath`] is dropped,
    /// including on every early return here.
    async fn transfer(
        &self,
        url: &Url,
        validators: &Validators,
        prefix: &str,
    ) -> Result<(DownloadOutcome, TempPath), FetchError> {
        let (file, temp) = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(&self.config.scratch_dir)
            .map_err(|source| FetchError::TempFile {
                dir: self.config.scratch_dir.clone(),
                source,
            })?
            .into_parts();

        let mut file = File::from_std(file);

        debug!(url = %url, temp = ?temp, revalidating = !validators.is_empty(), "Starting transfer");
        let outcome = self.downloader.download(url, &mut file, validators).await?;

        file.flush().await.map_err(DownloadError::from)?;
        // Wait out any in-flight write before the file is renamed or reopened.
        drop(file.into_std().await);

        Ok((outcome, temp))
    }

    async fn open_transfer(&self, temp: &TempPath) -> Result<File, FetchError> {
        File::open(temp).await.map_err(|source| FetchError::Open {
            path: temp.to_path_buf(),
            source,
        })
    }

    /// Take ownership of a scratch file away from its [`TempPath`]
    fn keep(&self, temp: TempPath) -> Result<PathBuf, FetchError> {
        temp.keep().map_err(|e| FetchError::TempFile {
            dir: self.config.scratch_dir.clone(),
            source: e.error,
        })
    }

    async fn serve_untracked(&self, reader: File, path: PathBuf) -> Result<FetchedFile, FetchError> {
        match FetchedFile::wrap(
            reader,
            &path,
            FileOrigin::Untracked,
            self.config.deletion_model,
        )
        .await
        {
            Ok(handle) => Ok(handle),
            Err(e) => {
                remove_file_logged(&path);
                Err(e)
            }
        }
    }

    /// Current usage of the cache
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// The entry store backing this cache
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Configuration this cache was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}
