//! Per-path write serialization.
//!
//! The filesystem is the single source of truth: every API call re-reads a
//! config file, mutates it in memory, and writes it back. Two concurrent
//! requests against the same file must not interleave their writes, so each
//! path gets one async mutex held across the whole read-modify-write.
//! External writers (the shell scripts) are not coordinated with — accepted
//! for a single-admin box.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Registry of per-path async mutexes. Lives in the shared app state.
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        PathLocks {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Lock handle for a path, created on first use. Hold the guard for
    /// the entire read-modify-write sequence:
    ///
    /// ```ignore
    /// let lock = state.locks.for_path(config::NETWORK_CFG);
    /// let _guard = lock.lock().await;
    /// ```
    pub fn for_path(&self, path: impl AsRef<Path>) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(path.as_ref().to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Write via a sibling temp file and rename, so a crash mid-write never
/// leaves a truncated config for the host scripts to trip over.
pub fn write_atomic(path: impl AsRef<Path>, contents: &str) -> Result<(), String> {
    let path = path.as_ref();
    let tmp = match path.file_name() {
        Some(name) => path.with_file_name(format!(".{}.tmp", name.to_string_lossy())),
        None => return Err(format!("invalid target path: {}", path.display())),
    };
    std::fs::write(&tmp, contents)
        .map_err(|e| format!("failed to write {}: {}", tmp.display(), e))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| format!("failed to replace {}: {}", path.display(), e))
}
