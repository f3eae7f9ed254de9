//! Offline cache verification signals.
//!
//! Signal precedence:
//! 1. `NeverSynced` (no tracked artifacts and no run history)
//! 2. `Missing` (tracked files absent from the cache directory)
//! 3. `Diverged` (cache file hash no longer matches the stored hash)
//! 4. `Orphaned` (cache files present but not tracked)
//! 5. `Current`
//!
//! This is the same dual-verification rule the orchestrator applies during a
//! sync, runnable without touching the network — useful before deciding
//! whether a `force` sync is warranted.

use std::collections::BTreeSet;
use std::path::Path;

use muster_core::{store::Store, types::Source};

use crate::cache;
use crate::error::{io_err, SyncError};

/// Verification signal for one source's cache state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheSignal {
    NeverSynced,
    Current,
    /// Tracked artifacts whose cache files are gone.
    Missing { files: Vec<String> },
    /// Tracked artifacts whose cache files no longer hash to the stored value.
    Diverged { files: Vec<String> },
    /// Files under the source's cache directory that nothing tracks.
    Orphaned { files: Vec<String> },
}

/// Check a source's cache directory against the store.
pub fn check(store: &Store, root: &Path, source: &Source) -> Result<CacheSignal, SyncError> {
    let tracked = store.list_artifacts(&source.id)?;
    if tracked.is_empty() && store.get_recent_runs(&source.id, 1)?.is_empty() {
        return Ok(CacheSignal::NeverSynced);
    }

    let mut missing = Vec::new();
    let mut diverged = Vec::new();
    for artifact in &tracked {
        if !artifact.local_cache_path.is_file() {
            missing.push(artifact.path.clone());
            continue;
        }
        let on_disk = cache::hash_file(&artifact.local_cache_path)?;
        if on_disk != artifact.content_hash {
            diverged.push(artifact.path.clone());
        }
    }
    if !missing.is_empty() {
        missing.sort();
        return Ok(CacheSignal::Missing { files: missing });
    }
    if !diverged.is_empty() {
        diverged.sort();
        return Ok(CacheSignal::Diverged { files: diverged });
    }

    let tracked_keys: BTreeSet<&str> = tracked.iter().map(|a| a.path.as_str()).collect();
    let source_dir = cache::source_dir_at(root, source);
    let mut orphaned = Vec::new();
    if source_dir.is_dir() {
        let mut on_disk = Vec::new();
        walk_files(&source_dir, &source_dir, &mut on_disk)?;
        for rel in on_disk {
            if !tracked_keys.contains(rel.as_str()) {
                orphaned.push(rel);
            }
        }
    }
    if !orphaned.is_empty() {
        orphaned.sort();
        return Ok(CacheSignal::Orphaned { files: orphaned });
    }

    Ok(CacheSignal::Current)
}

/// Collect relative file paths beneath `base`, depth-first.
fn walk_files(base: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), SyncError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            walk_files(base, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(base)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(rel);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
