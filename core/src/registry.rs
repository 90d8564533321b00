//! PID registry: filesystem-backed liveness markers for forked processes
//!
//! Forked workers and publishers are invisible to unrelated later
//! invocations of the caller, so every fork drops a marker file recording
//! "a process of this kind with this pid is alive". Marker names embed the
//! pid, the kind token, and the `.AT.` sentinel
//! (`{pid}.{KIND}.AT.{suffix}`), which makes subset enumeration a substring
//! match. Deletion ownership is opportunistic — the worker itself, a
//! canceller, or an external sweep may all remove the same marker — so
//! removal is idempotent and enumeration tolerates duplicates.

use crate::Result;
use schema::{PidFilter, ProcessKind};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the registry directory
pub const PID_DIR_ENV: &str = "FORKTASK_PID_DIR";

/// Filesystem-backed set of (pid, kind) liveness markers
#[derive(Debug, Clone)]
pub struct PidRegistry {
    dir: PathBuf,
}

impl PidRegistry {
    /// Registry in the system-wide marker directory.
    ///
    /// Uses `FORKTASK_PID_DIR` if set, the platform temp directory
    /// otherwise.
    pub fn system() -> Self {
        let dir = std::env::var(PID_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());
        Self { dir }
    }

    /// Registry rooted at an explicit directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory markers live in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a marker for a (pid, kind) pair, optionally carrying a
    /// payload string, and return its path.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker file cannot be created or written.
    pub fn create(&self, pid: u32, content: &str, kind: ProcessKind) -> Result<PathBuf> {
        let prefix = marker_prefix(pid, kind);
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile_in(&self.dir)?;

        if !content.is_empty() {
            file.write_all(content.as_bytes())?;
        }

        let (_, path) = file.keep().map_err(|e| e.error)?;
        debug!("Created {:?} marker {:?}", kind, path);
        Ok(path)
    }

    /// Remove every marker for a (pid, kind) pair.
    ///
    /// Idempotent: markers that are already gone are not an error.
    pub fn remove(&self, pid: u32, kind: ProcessKind) {
        let pattern = marker_prefix(pid, kind);
        for path in self.matching(&pattern) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed marker {:?}", path),
                // Racing removers are expected; losing the race is fine
                Err(e) => debug!("Marker {:?} already removed: {}", path, e),
            }
        }
    }

    /// Enumerate the pids of markers matching a filter, optionally deleting
    /// each marker as it is read.
    ///
    /// Duplicates are possible when several markers share a pid; callers
    /// must tolerate them.
    pub fn open_pids(&self, filter: PidFilter, consume: bool) -> Vec<u32> {
        let mut pids = Vec::new();

        for path in self.matching(filter.pattern()) {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(pid) = name.split('.').next().and_then(|s| s.parse::<u32>().ok()) else {
                warn!("Skipping malformed marker name {:?}", name);
                continue;
            };
            pids.push(pid);

            if consume {
                if let Err(e) = std::fs::remove_file(&path) {
                    debug!("Marker {:?} already removed: {}", path, e);
                }
            }
        }

        pids
    }

    /// Marker paths whose filename contains `pattern`.
    fn matching(&self, pattern: &str) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read registry directory {:?}: {}", self.dir, e);
                return Vec::new();
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| name.contains(pattern))
            })
            .collect()
    }
}

fn marker_prefix(pid: u32, kind: ProcessKind) -> String {
    format!("{}.{}.AT.", pid, kind.marker_token())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_and_remove_marker() {
        let dir = tempdir().unwrap();
        let registry = PidRegistry::in_dir(dir.path());

        let path = registry
            .create(999_999, "Foo", ProcessKind::Worker)
            .expect("create marker");
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Foo");

        registry.remove(999_999, ProcessKind::Worker);
        assert!(!path.exists());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let registry = PidRegistry::in_dir(dir.path());

        let path = registry
            .create(999_999, "", ProcessKind::Publisher)
            .unwrap();

        registry.remove(999_999, ProcessKind::Publisher);
        assert!(!path.exists());
        // Second removal finds nothing and is not an error
        registry.remove(999_999, ProcessKind::Publisher);
    }

    #[test]
    fn remove_only_touches_the_requested_kind() {
        let dir = tempdir().unwrap();
        let registry = PidRegistry::in_dir(dir.path());

        let worker = registry.create(4242, "", ProcessKind::Worker).unwrap();
        let publisher = registry.create(4242, "", ProcessKind::Publisher).unwrap();

        registry.remove(4242, ProcessKind::Worker);
        assert!(!worker.exists());
        assert!(publisher.exists());
    }

    #[test]
    fn open_pids_filters_by_kind() {
        let dir = tempdir().unwrap();
        let registry = PidRegistry::in_dir(dir.path());

        registry.create(888_888, "Foo", ProcessKind::Worker).unwrap();
        registry.create(999_999, "Bar", ProcessKind::Worker).unwrap();
        registry
            .create(777_777, "", ProcessKind::Publisher)
            .unwrap();

        let mut workers = registry.open_pids(PidFilter::Worker, false);
        workers.sort_unstable();
        assert_eq!(workers, vec![888_888, 999_999]);

        let publishers = registry.open_pids(PidFilter::Publisher, false);
        assert_eq!(publishers, vec![777_777]);

        let mut all = registry.open_pids(PidFilter::All, false);
        all.sort_unstable();
        assert_eq!(all, vec![777_777, 888_888, 999_999]);
    }

    #[test]
    fn open_pids_consume_deletes_markers() {
        let dir = tempdir().unwrap();
        let registry = PidRegistry::in_dir(dir.path());

        registry.create(888_888, "Foo", ProcessKind::Worker).unwrap();
        registry.create(999_999, "Bar", ProcessKind::Worker).unwrap();

        let pids = registry.open_pids(PidFilter::Worker, true);
        assert_eq!(pids.len(), 2);

        assert!(registry.open_pids(PidFilter::Worker, false).is_empty());
    }

    #[test]
    fn duplicate_markers_yield_duplicate_pids() {
        let dir = tempdir().unwrap();
        let registry = PidRegistry::in_dir(dir.path());

        registry.create(555_555, "", ProcessKind::Worker).unwrap();
        registry.create(555_555, "", ProcessKind::Worker).unwrap();

        let pids = registry.open_pids(PidFilter::Worker, false);
        assert_eq!(pids, vec![555_555, 555_555]);
    }
}
