//! Canonical sync entrypoint shared by embedding tools.

use std::path::Path;

use muster_core::{
    registry::SourceRegistry,
    store::Store,
    types::SourceId,
};

use crate::discovery::ManifestDiscovery;
use crate::error::SyncError;
use crate::orchestrator::{Orchestrator, SyncOptions, SyncReport};

/// Scope for a sync pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// Sync every enabled source.
    All,
    /// Sync a single named source, even if disabled — explicit scope is
    /// explicit intent.
    Source(SourceId),
}

/// Run the sync pipeline for a scope with the default manifest discovery.
pub fn run(
    store: &Store,
    root: &Path,
    scope: SyncScope,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError> {
    let orchestrator = Orchestrator::new(store, root, ManifestDiscovery::default());
    match scope {
        SyncScope::All => orchestrator.sync(options),
        SyncScope::Source(id) => {
            let source = SourceRegistry::new(store).get(&id)?;
            let report = orchestrator.sync_source(&source, options)?;
            Ok(SyncReport {
                sources: vec![report],
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::RegistryError;
    use tempfile::TempDir;

    #[test]
    fn run_all_with_no_sources_returns_empty_report() {
        let root = TempDir::new().expect("root");
        let store = Store::open_at(root.path()).expect("open");
        let report = run(&store, root.path(), SyncScope::All, &SyncOptions::default())
            .expect("run");
        assert!(report.sources.is_empty());
    }

    #[test]
    fn run_named_unknown_source_is_not_found() {
        let root = TempDir::new().expect("root");
        let store = Store::open_at(root.path()).expect("open");
        let err = run(
            &store,
            root.path(),
            SyncScope::Source(SourceId::from("ghost")),
            &SyncOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Registry(RegistryError::NotFound { .. })
        ));
    }
}
