//! # File Lifecycle
//!
//! Every file handed to a caller is wrapped in a [`FetchedFile`] carrying the
//! action that must run when the caller is done with it. Two deletion models
//! are supported:
//!
//! - [`DeletionModel::Immediate`]: open files may be unlinked and stay
//!   readable. Untracked files are unlinked right after opening; tracked files
//!   are left to the store, which may unlink them under open readers.
//! - [`DeletionModel::Deferred`]: open files cannot be removed. Untracked
//!   files are deleted when the handle is dropped; tracked files are deleted on
//!   drop only if the store no longer tracks that exact path.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, ReadBuf};
use tracing::{debug, warn};

use crate::FetchError;
use crate::key::CacheId;
use crate::store::{CacheStore, remove_file_logged};

/// Whether the platform lets an open file be deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionModel {
    /// Unlinking an open file is allowed and the handle stays readable
    Immediate,
    /// Files must be closed before they can be deleted
    Deferred,
}

impl DeletionModel {
    /// Deferred on Windows, immediate everywhere else
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            DeletionModel::Deferred
        } else {
            DeletionModel::Immediate
        }
    }
}

/// Who owns the file behind a handle
#[derive(Debug, Clone)]
pub enum FileOrigin {
    /// Owned by the handle alone
    Untracked,
    /// Tracked by `store` under `id`
    Tracked { id: CacheId, store: Arc<CacheStore> },
}

/// What happens to the file when its handle is released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// Already unlinked when the handle was created
    ImmediateUnlink,
    /// Left alone; the store decides when it goes
    Retain,
    /// Deleted unconditionally on release
    DeferredUnlink,
    /// Deleted on release unless it is still the tracked file for its key
    DeferredUnlinkIfStale,
}

impl ReleasePolicy {
    /// Whether the file belongs to the cache rather than to the handle
    pub fn is_tracked(&self) -> bool {
        matches!(
            self,
            ReleasePolicy::Retain | ReleasePolicy::DeferredUnlinkIfStale
        )
    }
}

#[derive(Debug)]
enum Release {
    Nothing,
    Unlink,
    UnlinkIfStale { id: CacheId, store: Arc<CacheStore> },
}

/// Readable handle to a fetched file
///
/// Implements [`AsyncRead`] and [`AsyncSeek`]. Dropping the handle closes the
/// file and then runs its release action.
#[derive(Debug)]
pub struct FetchedFile {
    file: Option<File>,
    path: PathBuf,
    policy: ReleasePolicy,
    release: Release,
}

impl FetchedFile {
    /// Open `path` and wrap it according to `origin` and `model`
    pub async fn open(
        path: &Path,
        origin: FileOrigin,
        model: DeletionModel,
    ) -> Result<Self, FetchError> {
        let file = File::open(path).await.map_err(|source| FetchError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::wrap(file, path, origin, model).await
    }

    /// Wrap an already open `file` whose current location is `path`
    pub async fn wrap(
        mut file: File,
        path: &Path,
        origin: FileOrigin,
        model: DeletionModel,
    ) -> Result<Self, FetchError> {
        file.seek(SeekFrom::Start(0))
            .await
            .map_err(|source| FetchError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let (policy, release) = match (origin, model) {
            (FileOrigin::Untracked, DeletionModel::Immediate) => {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => (ReleasePolicy::ImmediateUnlink, Release::Nothing),
                    Err(e) => {
                        warn!(path = ?path, error = %e, "Immediate unlink failed, deferring to release");
                        (ReleasePolicy::DeferredUnlink, Release::Unlink)
                    }
                }
            }
            (FileOrigin::Untracked, DeletionModel::Deferred) => {
                (ReleasePolicy::DeferredUnlink, Release::Unlink)
            }
            (FileOrigin::Tracked { .. }, DeletionModel::Immediate) => {
                (ReleasePolicy::Retain, Release::Nothing)
            }
            (FileOrigin::Tracked { id, store }, DeletionModel::Deferred) => (
                ReleasePolicy::DeferredUnlinkIfStale,
                Release::UnlinkIfStale { id, store },
            ),
        };

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            policy,
            release,
        })
    }

    /// Location of the file when the handle was created
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release_policy(&self) -> ReleasePolicy {
        self.policy
    }

    fn released() -> io::Error {
        io::Error::other("file handle already released")
    }
}

impl Drop for FetchedFile {
    fn drop(&mut self) {
        // Close first; the deferred model cannot remove open files.
        drop(self.file.take());

        match &self.release {
            Release::Nothing => {}
            Release::Unlink => {
                debug!(path = ?self.path, "Releasing untracked file");
                remove_file_logged(&self.path);
            }
            Release::UnlinkIfStale { id, store } => {
                if store.release_if_stale(id, &self.path) {
                    debug!(id = %id, path = ?self.path, "Released stale cache file");
                }
            }
        }
    }
}

impl AsyncRead for FetchedFile {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.file.as_mut() {
            Some(file) => Pin::new(file).poll_read(cx, buf),
            None => Poll::Ready(Err(Self::released())),
        }
    }
}

impl AsyncSeek for FetchedFile {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => Pin::new(file).start_seek(position),
            None => Err(Self::released()),
        }
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        match self.file.as_mut() {
            Some(file) => Pin::new(file).poll_complete(cx),
            None => Poll::Ready(Err(Self::released())),
        }
    }
}
