//! Sync orchestrator.
//!
//! One sync pass per source, in ascending `(priority, id)` order:
//!
//! 1. Enumerate paths via [`ArtifactDiscovery`], conditioned on the source's
//!    manifest ETag.
//! 2. Fetch each path on a bounded worker pool.
//! 3. Collect outcomes and apply every store write on the orchestrating
//!    thread, in path order — single-writer discipline per `(source, path)`.
//! 4. Append the run to the audit trail and update source bookkeeping.
//!
//! Per-file failures are folded into the report; nothing short of a store or
//! registry failure aborts the pass. Priority ordering governs only report
//! and merge order, never fetch completion order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use muster_core::{
    registry::SourceRegistry,
    store::Store,
    types::{NewSyncRun, Source, SourceId, SyncStatus, TrackedArtifact},
};

use crate::cache;
use crate::discovery::{join_url, ArtifactDiscovery, ManifestOutcome};
use crate::error::SyncError;
use crate::fetcher::{FetchOutcome, Fetcher};

// ---------------------------------------------------------------------------
// Options and report types
// ---------------------------------------------------------------------------

/// Knobs for one sync invocation.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Bypass ETags and refetch everything.
    pub force: bool,
    /// Worker threads per source. Fetches within one source run concurrently;
    /// store writes never do.
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force: false,
            concurrency: 4,
        }
    }
}

/// One per-file failure, itemized in the report and the run's error detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub detail: String,
}

/// Outcome of one sync pass for one source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source_id: SourceId,
    pub run_id: i64,
    pub status: SyncStatus,
    pub files_fetched: u32,
    pub files_unchanged: u32,
    pub files_failed: u32,
    pub failures: Vec<FileFailure>,
    /// Source-level failure detail (e.g. the manifest could not be fetched).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub duration_ms: u64,
}

/// Per-source reports in ascending `(priority, id)` order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub sources: Vec<SourceReport>,
}

// ---------------------------------------------------------------------------
// Per-file outcome (internal)
// ---------------------------------------------------------------------------

enum FileOutcome {
    /// New or changed content, written to the cache.
    Fetched(TrackedArtifact),
    /// Content verified unchanged. `refreshed_etag` is set when the server
    /// rotated its ETag without changing the bytes.
    Unchanged {
        path: String,
        refreshed_etag: Option<String>,
    },
    Failed {
        path: String,
        detail: String,
    },
}

impl FileOutcome {
    fn path(&self) -> &str {
        match self {
            FileOutcome::Fetched(artifact) => &artifact.path,
            FileOutcome::Unchanged { path, .. } => path,
            FileOutcome::Failed { path, .. } => path,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Coordinates registry, discovery, fetcher, and store for sync passes.
pub struct Orchestrator<'a, D> {
    store: &'a Store,
    root: PathBuf,
    fetcher: Fetcher,
    discovery: D,
}

impl<'a, D: ArtifactDiscovery + Sync> Orchestrator<'a, D> {
    pub fn new(store: &'a Store, root: impl Into<PathBuf>, discovery: D) -> Self {
        Self {
            store,
            root: root.into(),
            fetcher: Fetcher::new(),
            discovery,
        }
    }

    /// Replace the default fetcher (shorter timeouts in tests).
    pub fn with_fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Sync every enabled source, reporting in `(priority, id)` order.
    pub fn sync(&self, options: &SyncOptions) -> Result<SyncReport, SyncError> {
        let registry = SourceRegistry::new(self.store);
        let mut report = SyncReport::default();
        for source in registry.list(true)? {
            report.sources.push(self.sync_source(&source, options)?);
        }
        Ok(report)
    }

    /// One sync pass for one source.
    pub fn sync_source(
        &self,
        source: &Source,
        options: &SyncOptions,
    ) -> Result<SourceReport, SyncError> {
        let started_at = Utc::now();
        let timer = Instant::now();
        tracing::info!("syncing '{}' from {}", source.id, source.url);

        // A Fresh manifest proves the remote list is unchanged, not that the
        // tracked set is complete; only trust it after a fully clean run.
        let prev_success = matches!(
            self.store.last_run_status(&source.id)?,
            Some(SyncStatus::Success)
        );
        let manifest_force = options.force || !prev_success;
        let known_etag = if manifest_force {
            None
        } else {
            source.last_etag.as_deref()
        };

        let known: BTreeMap<String, TrackedArtifact> = self
            .store
            .list_artifacts(&source.id)?
            .into_iter()
            .map(|artifact| (artifact.path.clone(), artifact))
            .collect();

        let (mut paths, manifest_etag) =
            match self
                .discovery
                .enumerate(&self.fetcher, source, known_etag, manifest_force)
            {
                ManifestOutcome::Unchanged => {
                    tracing::debug!("manifest for '{}' unchanged", source.id);
                    (known.keys().cloned().collect(), source.last_etag.clone())
                }
                ManifestOutcome::Listed { paths, etag } => (paths, etag),
                ManifestOutcome::Failed { detail } => {
                    tracing::warn!("manifest for '{}' failed: {detail}", source.id);
                    return self.record_manifest_failure(source, started_at, timer, detail);
                }
            };
        paths.sort();
        paths.dedup();

        let mut outcomes = self.run_pool(source, &known, &paths, options);
        outcomes.sort_by(|a, b| a.path().cmp(b.path()));

        let mut files_fetched = 0u32;
        let mut files_unchanged = 0u32;
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                FileOutcome::Fetched(artifact) => {
                    self.store.record_file(&artifact)?;
                    files_fetched += 1;
                }
                FileOutcome::Unchanged {
                    path,
                    refreshed_etag,
                } => {
                    if let Some(etag) = refreshed_etag {
                        if let Some(mut artifact) = known.get(&path).cloned() {
                            artifact.etag = Some(etag);
                            self.store.record_file(&artifact)?;
                        }
                    }
                    files_unchanged += 1;
                }
                FileOutcome::Failed { path, detail } => {
                    tracing::warn!("'{}': {path} failed: {detail}", source.id);
                    failures.push(FileFailure { path, detail });
                }
            }
        }

        let files_failed = failures.len() as u32;
        let status = run_status(files_fetched, files_unchanged, files_failed);
        let error_detail = if failures.is_empty() {
            None
        } else {
            Some(
                failures
                    .iter()
                    .map(|f| format!("{}: {}", f.path, f.detail))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        let duration_ms = timer.elapsed().as_millis() as u64;
        let run_id = self.store.record_sync_run(&NewSyncRun {
            source_id: source.id.clone(),
            started_at,
            status,
            files_fetched,
            files_unchanged,
            files_failed,
            error_detail: error_detail.clone(),
            duration_ms,
        })?;
        self.store
            .record_source_sync(&source.id, started_at, manifest_etag.as_deref())?;

        tracing::info!(
            "'{}' {status}: {files_fetched} fetched, {files_unchanged} unchanged, {files_failed} failed",
            source.id
        );
        Ok(SourceReport {
            source_id: source.id.clone(),
            run_id,
            status,
            files_fetched,
            files_unchanged,
            files_failed,
            failures,
            error_detail,
            duration_ms,
        })
    }

    fn record_manifest_failure(
        &self,
        source: &Source,
        started_at: chrono::DateTime<Utc>,
        timer: Instant,
        detail: String,
    ) -> Result<SourceReport, SyncError> {
        let duration_ms = timer.elapsed().as_millis() as u64;
        let run_id = self.store.record_sync_run(&NewSyncRun {
            source_id: source.id.clone(),
            started_at,
            status: SyncStatus::Error,
            files_fetched: 0,
            files_unchanged: 0,
            files_failed: 0,
            error_detail: Some(detail.clone()),
            duration_ms,
        })?;
        // last_sync_time advances (the attempt happened); the manifest ETag
        // is left as-is so the next pass re-validates against it.
        self.store
            .record_source_sync(&source.id, started_at, source.last_etag.as_deref())?;
        Ok(SourceReport {
            source_id: source.id.clone(),
            run_id,
            status: SyncStatus::Error,
            files_fetched: 0,
            files_unchanged: 0,
            files_failed: 0,
            failures: Vec::new(),
            error_detail: Some(detail),
            duration_ms,
        })
    }

    /// Fan file fetches out over a bounded worker pool and collect outcomes.
    ///
    /// Workers touch the network and the cache directory only; the store is
    /// written exclusively by the caller after collection.
    fn run_pool(
        &self,
        source: &Source,
        known: &BTreeMap<String, TrackedArtifact>,
        paths: &[String],
        options: &SyncOptions,
    ) -> Vec<FileOutcome> {
        if paths.is_empty() {
            return Vec::new();
        }
        let workers = options.concurrency.clamp(1, paths.len());
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(path) = paths.get(index) else { break };
                    let outcome =
                        self.process_file(source, known.get(path.as_str()), path, options.force);
                    if tx.send(outcome).is_err() {
                        break;
                    }
                });
            }
            drop(tx);
            rx.iter().collect()
        })
    }

    fn process_file(
        &self,
        source: &Source,
        known: Option<&TrackedArtifact>,
        path: &str,
        force: bool,
    ) -> FileOutcome {
        let url = join_url(source, path);
        let dest = cache::artifact_path_at(&self.root, source, path);
        let known_etag = known.and_then(|artifact| artifact.etag.as_deref());

        match self.fetcher.fetch(&url, known_etag, force) {
            FetchOutcome::Fresh => self.verify_fresh(source, known, path, &url, &dest),
            FetchOutcome::Updated { body, etag } => {
                self.write_updated(source, known, path, &dest, body, etag)
            }
            FetchOutcome::Failed { detail } => FileOutcome::Failed {
                path: path.to_owned(),
                detail,
            },
        }
    }

    /// Dual verification: a 304 is only trusted if the cache file still
    /// matches the stored hash. The content hash, not the ETag, is ground
    /// truth for whether consumers see a change.
    fn verify_fresh(
        &self,
        source: &Source,
        known: Option<&TrackedArtifact>,
        path: &str,
        url: &str,
        dest: &Path,
    ) -> FileOutcome {
        let Some(known) = known else {
            return FileOutcome::Failed {
                path: path.to_owned(),
                detail: "server returned 304 for a file with no tracked state".to_owned(),
            };
        };

        let intact = dest.is_file()
            && cache::hash_file(dest)
                .map(|hash| hash == known.content_hash)
                .unwrap_or(false);
        if intact {
            return FileOutcome::Unchanged {
                path: path.to_owned(),
                refreshed_etag: None,
            };
        }

        tracing::warn!(
            "hash/ETag divergence for '{}':{path} — cache does not match stored hash; refetching",
            source.id
        );
        match self.fetcher.fetch(url, None, true) {
            FetchOutcome::Updated { body, etag } => {
                self.write_updated(source, Some(known), path, dest, body, etag)
            }
            FetchOutcome::Fresh => FileOutcome::Failed {
                path: path.to_owned(),
                detail: "server replied 304 to an unconditional refetch".to_owned(),
            },
            FetchOutcome::Failed { detail } => FileOutcome::Failed {
                path: path.to_owned(),
                detail: format!("refetch after divergence failed: {detail}"),
            },
        }
    }

    fn write_updated(
        &self,
        source: &Source,
        known: Option<&TrackedArtifact>,
        path: &str,
        dest: &Path,
        body: Vec<u8>,
        etag: Option<String>,
    ) -> FileOutcome {
        let hash = cache::sha256_hex(&body);

        // A 200 whose body hashes identically is not a change (ETag rotation
        // without new content); only the stored ETag refreshes.
        if let Some(known) = known {
            let cache_intact = dest.is_file()
                && cache::hash_file(dest)
                    .map(|on_disk| on_disk == hash)
                    .unwrap_or(false);
            if known.content_hash == hash && cache_intact {
                let refreshed =
                    etag.filter(|new| known.etag.as_deref() != Some(new.as_str()));
                return FileOutcome::Unchanged {
                    path: path.to_owned(),
                    refreshed_etag: refreshed,
                };
            }
        }

        match cache::atomic_write_bytes(dest, &body) {
            Ok(()) => FileOutcome::Fetched(TrackedArtifact {
                source_id: source.id.clone(),
                path: path.to_owned(),
                content_hash: hash,
                etag,
                local_cache_path: dest.to_path_buf(),
                size_bytes: body.len() as u64,
                synced_at: Utc::now(),
            }),
            Err(e) => FileOutcome::Failed {
                path: path.to_owned(),
                detail: format!("cache write failed: {e}"),
            },
        }
    }
}

/// success: no failures; error: nothing but failures; partial: a mix.
fn run_status(fetched: u32, unchanged: u32, failed: u32) -> SyncStatus {
    if failed == 0 {
        SyncStatus::Success
    } else if fetched == 0 && unchanged == 0 {
        SyncStatus::Error
    } else {
        SyncStatus::Partial
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
