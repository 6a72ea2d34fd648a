//! The watch registry: a thread-safe bidirectional mapping between kernel
//! watch descriptors and the absolute directory paths they cover.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use inotify::{WatchDescriptor, Watches};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{GalaxyError, Result};
use crate::mask::EventMask;

/// Returned by [`WatchRegistry::lookup`] for a watch id no longer present in
/// the map. IGNORED events can arrive after the mapping is removed; callers
/// must tolerate it rather than treat it as an error.
pub const UNKNOWN_PATH: &str = "unknown";

struct Maps {
    by_id: HashMap<WatchDescriptor, PathBuf>,
    by_path: HashMap<PathBuf, WatchDescriptor>,
}

/// Owns the kernel-facing `Watches` handle (cheap to clone, safe to share
/// across the crawler, dispatcher, and per-client workers) and the
/// multi-reader/single-writer map of installed watches.
pub struct WatchRegistry {
    watches: Watches,
    maps: RwLock<Maps>,
}

impl WatchRegistry {
    pub fn new(watches: Watches) -> Self {
        Self {
            watches,
            maps: RwLock::new(Maps {
                by_id: HashMap::new(),
                by_path: HashMap::new(),
            }),
        }
    }

    /// Installs a watch for `path` covering `mask`. Duplicate installs for an
    /// already-registered path return the existing descriptor without
    /// re-registering with the kernel.
    ///
    /// The kernel watch is allocated before the mapping is recorded; on
    /// failure no mapping is recorded and the error is returned so a caller
    /// such as the crawler can choose to skip the path and continue.
    pub fn insert(&self, path: &Path, mask: EventMask) -> Result<WatchDescriptor> {
        if let Some(existing) = self.maps.read().by_path.get(path) {
            return Ok(existing.clone());
        }

        let wd = self
            .watches
            .add(path, mask.to_watch_mask())
            .map_err(|source| GalaxyError::WatchInstallFailed {
                path: path.to_path_buf(),
                source,
            })?;

        let mut maps = self.maps.write();
        // Re-check under the write lock: another thread may have installed
        // the same path while we were waiting on the kernel call.
        if let Some(existing) = maps.by_path.get(path) {
            let _ = self.watches.remove(wd);
            return Ok(existing.clone());
        }
        maps.by_id.insert(wd.clone(), path.to_path_buf());
        maps.by_path.insert(path.to_path_buf(), wd.clone());
        debug!(?path, "installed watch");
        Ok(wd)
    }

    /// Removes a watch mapping. Idempotent: removing an id that is not
    /// present is a no-op.
    pub fn remove(&self, wd: &WatchDescriptor) {
        let mut maps = self.maps.write();
        if let Some(path) = maps.by_id.remove(wd) {
            maps.by_path.remove(&path);
            debug!(?path, "removed watch");
        }
    }

    /// Explicitly asks the kernel to drop a watch, then removes the mapping.
    /// Used for an explicit client-requested watch removal, as opposed to a
    /// watch the kernel tore down on its own (`DELETE_SELF`/`IGNORED`).
    pub fn uninstall(&self, wd: WatchDescriptor) {
        if let Err(err) = self.watches.remove(wd.clone()) {
            warn!(?err, "inotify_rm_watch failed, removing mapping anyway");
        }
        self.remove(&wd);
    }

    /// Looks up the absolute path for a watch id. Returns `None` for an
    /// unknown id; callers that need the `"unknown"` sentinel string should
    /// use [`Self::lookup_or_unknown`].
    pub fn lookup(&self, wd: &WatchDescriptor) -> Option<PathBuf> {
        self.maps.read().by_id.get(wd).cloned()
    }

    pub fn lookup_or_unknown(&self, wd: &WatchDescriptor) -> String {
        self.lookup(wd)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| UNKNOWN_PATH.to_string())
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.maps.read().by_path.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.maps.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every currently-registered path, for diagnostics and tests.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.maps.read().by_path.keys().cloned().collect()
    }
}
