//! Priority resolver — merges per-source artifact sets into one logical view.
//!
//! Sources are considered in ascending `(priority, id)` order; the first
//! source offering a logical name wins. Later offers are shadowed conflicts,
//! recorded for diagnostics and never surfaced as errors. An equal-priority
//! collision falls back to the lexical id tie-break with a warning.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use muster_core::{
    registry::SourceRegistry,
    store::Store,
    types::{Source, SourceId, TrackedArtifact},
};

use crate::error::SyncError;

/// The winning entry for one logical artifact name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedArtifact {
    pub name: String,
    pub source_id: SourceId,
    pub path: String,
    pub hash: String,
    pub cache_path: PathBuf,
}

/// A lower-precedence offer that lost to `shadowed_by`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShadowedArtifact {
    pub name: String,
    pub source_id: SourceId,
    pub path: String,
    pub shadowed_by: SourceId,
}

/// One consistent view across sources, plus the shadowed conflicts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergedView {
    pub artifacts: BTreeMap<String, ResolvedArtifact>,
    pub conflicts: Vec<ShadowedArtifact>,
}

/// Logical artifact name: the relative path with its final extension
/// stripped (`agents/research.md` → `agents/research`).
pub fn logical_name(rel_path: &str) -> String {
    match rel_path.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/{}", strip_extension(file)),
        None => strip_extension(rel_path).to_owned(),
    }
}

fn strip_extension(file: &str) -> &str {
    match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    }
}

/// Merge per-source artifact sets. Input order does not matter; the merge
/// re-sorts by `(priority, id)` for determinism.
pub fn resolve(per_source: &[(Source, Vec<TrackedArtifact>)]) -> MergedView {
    let mut ordered: Vec<&(Source, Vec<TrackedArtifact>)> = per_source.iter().collect();
    ordered.sort_by(|a, b| {
        (a.0.priority, &a.0.id).cmp(&(b.0.priority, &b.0.id))
    });

    let mut view = MergedView::default();
    for (source, artifacts) in ordered {
        for artifact in artifacts {
            let name = logical_name(&artifact.path);
            match view.artifacts.get(&name) {
                None => {
                    view.artifacts.insert(
                        name.clone(),
                        ResolvedArtifact {
                            name,
                            source_id: source.id.clone(),
                            path: artifact.path.clone(),
                            hash: artifact.content_hash.clone(),
                            cache_path: artifact.local_cache_path.clone(),
                        },
                    );
                }
                Some(winner) => {
                    let winner_priority = per_source
                        .iter()
                        .find(|(s, _)| s.id == winner.source_id)
                        .map(|(s, _)| s.priority);
                    if winner_priority == Some(source.priority) {
                        tracing::warn!(
                            "equal-priority collision on '{name}': '{}' shadows '{}' by lexical id order",
                            winner.source_id,
                            source.id
                        );
                    }
                    view.conflicts.push(ShadowedArtifact {
                        name,
                        source_id: source.id.clone(),
                        path: artifact.path.clone(),
                        shadowed_by: winner.source_id.clone(),
                    });
                }
            }
        }
    }
    view
}

/// Store-backed convenience: merge the tracked artifacts of every enabled
/// source.
pub fn resolve_tracked(store: &Store) -> Result<MergedView, SyncError> {
    let registry = SourceRegistry::new(store);
    let mut per_source = Vec::new();
    for source in registry.list(true)? {
        let artifacts = store.list_artifacts(&source.id)?;
        per_source.push((source, artifacts));
    }
    Ok(resolve(&per_source))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
