//! # Cache Keys
//!
//! Maps arbitrary external cache keys onto fixed-width identifiers that are
//! safe to use as file names.

use std::fmt;

use sha2::{Digest, Sha256};

/// Internal identifier for a cached resource: the lowercase hex SHA-256 of the external key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheId(String);

impl CacheId {
    /// Length of every identifier in characters
    pub const LEN: usize = 64;

    /// Resolve an external cache key.
    ///
    /// The empty key means "do not cache" and must be handled by the caller
    /// before it gets here.
    pub fn resolve(key: &str) -> Self {
        debug_assert!(!key.is_empty(), "empty cache keys bypass the cache");

        let hash = Sha256::digest(key.as_bytes());
        Self(format!("{hash:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
