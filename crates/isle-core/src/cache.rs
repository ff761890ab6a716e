//! Memoization of compiled binaries.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Identity of a build: the source location plus the call expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildKey {
    source: String,
    call: String,
}

impl BuildKey {
    /// Create a key.
    pub fn new(source: impl Into<String>, call: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            call: call.into(),
        }
    }

    /// Source location component.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Call expression component.
    pub fn call(&self) -> &str {
        &self.call
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source, self.call)
    }
}

/// Process-lifetime map from [`BuildKey`] to the binary it produced.
///
/// Entries never expire on their own; they are overwritten by a later build
/// or cleared by a cache-bust.
#[derive(Debug, Default)]
pub struct BinaryCache {
    entries: RwLock<HashMap<BuildKey, PathBuf>>,
}

impl BinaryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<BuildKey, PathBuf>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<BuildKey, PathBuf>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Binary path for `key`, if one was recorded.
    pub fn get(&self, key: &BuildKey) -> Option<PathBuf> {
        self.read().get(key).cloned()
    }

    /// Record the binary for `key`, replacing any previous entry.
    pub fn insert(&self, key: BuildKey, binary: impl AsRef<Path>) {
        let binary = binary.as_ref().to_path_buf();
        tracing::debug!(key = %key, binary = %binary.display(), "Cached binary");
        self.write().insert(key, binary);
    }

    /// Drop the entry for `key`.
    pub fn remove(&self, key: &BuildKey) -> Option<PathBuf> {
        self.write().remove(key)
    }

    /// Drop every entry built from `source`. Returns how many were removed.
    pub fn invalidate_source(&self, source: &str) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|key, _| key.source != source);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(source, removed, "Invalidated cached binaries");
        }
        removed
    }

    /// Number of cached binaries.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
