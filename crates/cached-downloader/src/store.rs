//! # Cache Entry Store
//!
//! In-memory index of the files tracked in the cache directory. The index is
//! the only source of truth for what the cache holds: every method takes the
//! lock exactly once, and no method blocks on network I/O while holding it.
//! Files leaving the index are unlinked after the lock is released; the only
//! filesystem call made under it is the rename that admits a file.
//!
//! Admission evicts least-recently-accessed entries until the incoming file
//! fits. Ties on access time are broken by identifier order, so the victim is
//! reproducible for a given index state.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::downloader::Validators;
use crate::key::CacheId;

/// Metadata for one cached resource
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Size of the tracked file in bytes
    pub size: u64,
    /// Last time a fetch touched this key
    pub last_access: Instant,
    /// Validators recorded with the tracked file
    pub validators: Validators,
    /// Tracked file, if the resource is materialized in the cache
    pub path: Option<PathBuf>,
}

impl CacheEntry {
    fn touched() -> Self {
        Self {
            size: 0,
            last_access: Instant::now(),
            validators: Validators::default(),
            path: None,
        }
    }

    fn is_resident(&self) -> bool {
        self.path.is_some()
    }
}

/// Snapshot taken when a fetch records its access
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lookup {
    /// Currently tracked file
    pub path: Option<PathBuf>,
    /// Validators to replay; empty unless a file is tracked
    pub validators: Validators,
}

/// Where an admitted file ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Moved into the cache directory and tracked under the key
    Tracked(PathBuf),
    /// Not admitted; the source path is returned unchanged
    Untracked(PathBuf),
}

impl Admission {
    pub fn path(&self) -> &Path {
        match self {
            Admission::Tracked(path) | Admission::Untracked(path) => path,
        }
    }

    pub fn is_tracked(&self) -> bool {
        matches!(self, Admission::Tracked(_))
    }
}

/// Point-in-time usage figures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of resident entries
    pub entries: usize,
    /// Sum of resident entry sizes
    pub used_bytes: u64,
    /// Configured capacity
    pub capacity_bytes: u64,
}

/// Mutex-protected index from [`CacheId`] to [`CacheEntry`]
#[derive(Debug)]
pub struct CacheStore {
    cache_dir: PathBuf,
    capacity: u64,
    entries: Mutex<HashMap<CacheId, CacheEntry>>,
    rename_failed: AtomicBool,
}

impl CacheStore {
    /// Create an empty store placing admitted files in `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>, capacity: u64) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            capacity,
            entries: Mutex::new(HashMap::new()),
            rename_failed: AtomicBool::new(false),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Mark `id` as accessed now, creating the entry if absent, and return
    /// what a fetch needs to revalidate it.
    pub fn record_access(&self, id: &CacheId) -> Lookup {
        let mut entries = self.entries.lock();
        let entry = entries.entry(id.clone()).or_insert_with(CacheEntry::touched);
        entry.last_access = Instant::now();

        // An entry without a file has nothing to revalidate against.
        match &entry.path {
            Some(path) => Lookup {
                path: Some(path.clone()),
                validators: entry.validators.clone(),
            },
            None => Lookup::default(),
        }
    }

    pub fn path(&self, id: &CacheId) -> Option<PathBuf> {
        self.entries.lock().get(id).and_then(|e| e.path.clone())
    }

    pub fn validators(&self, id: &CacheId) -> Validators {
        self.entries
            .lock()
            .get(id)
            .map(|e| e.validators.clone())
            .unwrap_or_default()
    }

    pub fn set_validators(&self, id: &CacheId, validators: Validators) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(id.clone()).or_insert_with(CacheEntry::touched);
        entry.validators = validators;
    }

    /// Whether `id` currently has a tracked file
    pub fn contains(&self, id: &CacheId) -> bool {
        self.entries
            .lock()
            .get(id)
            .is_some_and(CacheEntry::is_resident)
    }

    pub fn entry(&self, id: &CacheId) -> Option<CacheEntry> {
        self.entries.lock().get(id).cloned()
    }

    /// Forget the access record for `id` if no file is tracked under it.
    ///
    /// A fetch that ends without admitting anything calls this so that keys
    /// which never make it into the cache do not accumulate in the index.
    pub fn discard_access(&self, id: &CacheId) -> bool {
        let mut entries = self.entries.lock();
        if entries.get(id).is_some_and(|e| !e.is_resident()) {
            entries.remove(id);
            return true;
        }
        false
    }

    /// Drop the entry for `id` and unlink its file. Returns whether an entry existed.
    pub fn remove(&self, id: &CacheId) -> bool {
        let Some(entry) = self.entries.lock().remove(id) else {
            return false;
        };
        if let Some(path) = &entry.path {
            debug!(id = %id, path = ?path, "Removing cache entry");
            remove_file_logged(path);
        }
        true
    }

    /// Place `source` under cache management for `id`, evicting the least
    /// recently accessed entries until it fits.
    ///
    /// A file larger than the whole capacity is refused without evicting
    /// anything. On success any previous file for `id` is unlinked and
    /// replaced by the new one.
    pub fn admit(
        &self,
        id: &CacheId,
        source: &Path,
        size: u64,
        validators: Validators,
    ) -> Admission {
        if size > self.capacity {
            info!(
                id = %id,
                size,
                capacity = self.capacity,
                "Entry too large for cache, serving untracked"
            );
            return Admission::Untracked(source.to_path_buf());
        }

        let Some(file_name) = source.file_name() else {
            warn!(id = %id, source = ?source, "Source has no file name, serving untracked");
            return Admission::Untracked(source.to_path_buf());
        };
        let destination = self.cache_dir.join(file_name);

        let mut entries = self.entries.lock();

        let mut used: u64 = entries
            .iter()
            .filter(|(key, _)| *key != id)
            .map(|(_, entry)| entry.size)
            .sum();

        // Pick victims first; nothing leaves the index unless the rename succeeds.
        let mut candidates: Vec<_> = entries
            .iter()
            .filter(|(key, entry)| *key != id && entry.is_resident())
            .collect();
        candidates.sort_by(|(ka, a), (kb, b)| {
            a.last_access
                .cmp(&b.last_access)
                .then_with(|| ka.cmp(kb))
        });

        let mut victims = Vec::new();
        for (key, entry) in candidates {
            if used + size <= self.capacity {
                break;
            }
            used -= entry.size;
            victims.push(key.clone());
        }

        if let Err(e) = std::fs::rename(source, &destination) {
            drop(entries);
            if !self.rename_failed.swap(true, Ordering::Relaxed) {
                warn!(
                    from = ?source,
                    to = ?destination,
                    error = %e,
                    "Failed to move file into cache, serving untracked. \
                     Scratch and cache directories should share a filesystem"
                );
            } else {
                debug!(
                    from = ?source,
                    to = ?destination,
                    error = %e,
                    "Failed to move file into cache"
                );
            }
            return Admission::Untracked(source.to_path_buf());
        }

        let mut unlink = Vec::with_capacity(victims.len() + 1);
        for victim in victims {
            if let Some(evicted) = entries.remove(&victim) {
                debug!(id = %victim, size = evicted.size, "Evicting cache entry");
                unlink.extend(evicted.path);
            }
        }

        let entry = entries.entry(id.clone()).or_insert_with(CacheEntry::touched);
        if let Some(previous) = entry.path.take()
            && previous != destination
        {
            debug!(id = %id, path = ?previous, "Replacing previous cache file");
            unlink.push(previous);
        }
        entry.size = size;
        entry.validators = validators;
        entry.path = Some(destination.clone());
        drop(entries);

        for path in &unlink {
            remove_file_logged(path);
        }

        debug!(id = %id, size, path = ?destination, "Admitted file into cache");
        Admission::Tracked(destination)
    }

    /// Whether `path` is still the tracked file for `id`
    pub(crate) fn is_current(&self, id: &CacheId, path: &Path) -> bool {
        self.entries
            .lock()
            .get(id)
            .and_then(|e| e.path.as_deref())
            .is_some_and(|current| current == path)
    }

    /// Unlink `path` unless it is still the tracked file for `id`.
    ///
    /// Cache file names are never reused, so a path found stale under the
    /// lock cannot become current again before it is unlinked.
    pub(crate) fn release_if_stale(&self, id: &CacheId, path: &Path) -> bool {
        if self.is_current(id, path) {
            return false;
        }
        remove_file_logged(path);
        true
    }

    pub fn used_bytes(&self) -> u64 {
        self.entries.lock().values().map(|e| e.size).sum()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            entries: entries.values().filter(|e| e.is_resident()).count(),
            used_bytes: entries.values().map(|e| e.size).sum(),
            capacity_bytes: self.capacity,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_last_access(&self, id: &CacheId, at: Instant) {
        if let Some(entry) = self.entries.lock().get_mut(id) {
            entry.last_access = at;
        }
    }
}

/// Remove a file, ignoring files that are already gone
pub(crate) fn remove_file_logged(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "Failed to remove file"),
    }
}
