//! Cross-component registry/store integration tests: validation messages,
//! cascade behavior, and persistence across reopen.

use chrono::Utc;
use muster_core::{
    registry::SourceRegistry,
    store::Store,
    types::{NewSource, NewSyncRun, SourceId, SyncStatus, TrackedArtifact},
    RegistryError,
};
use rstest::rstest;
use std::path::PathBuf;
use tempfile::TempDir;

fn tracked(source: &str, path: &str, hash: &str) -> TrackedArtifact {
    TrackedArtifact {
        source_id: SourceId::from(source),
        path: path.to_owned(),
        content_hash: hash.to_owned(),
        etag: None,
        local_cache_path: PathBuf::from("/cache").join(source).join(path),
        size_bytes: 7,
        synced_at: Utc::now(),
    }
}

fn run(source: &str, status: SyncStatus) -> NewSyncRun {
    NewSyncRun {
        source_id: SourceId::from(source),
        started_at: Utc::now(),
        status,
        files_fetched: 0,
        files_unchanged: 0,
        files_failed: 0,
        error_detail: None,
        duration_ms: 3,
    }
}

// ---------------------------------------------------------------------------
// 1. Validation
// ---------------------------------------------------------------------------

#[rstest]
#[case::no_scheme("example.com/defs")]
#[case::wrong_scheme("git://example.com/defs")]
#[case::empty_host("https:///defs")]
#[case::embedded_space("https://example.com/a b")]
fn rejected_urls_never_persist(#[case] url: &str) {
    let root = TempDir::new().expect("tempdir");
    let store = Store::open_at(root.path()).expect("open");
    let registry = SourceRegistry::new(&store);

    let err = registry.register(NewSource::new("docs", url)).unwrap_err();
    assert!(matches!(err, RegistryError::Validation { .. }), "got: {err}");
    assert!(registry.list(false).expect("list").is_empty());
}

#[rstest]
#[case::https("https://example.com/defs")]
#[case::http("http://localhost:8080/defs")]
#[case::trailing_slash("https://example.com/defs/")]
fn accepted_urls_roundtrip(#[case] url: &str) {
    let root = TempDir::new().expect("tempdir");
    let store = Store::open_at(root.path()).expect("open");
    let registry = SourceRegistry::new(&store);

    registry.register(NewSource::new("docs", url)).expect("register");
    assert_eq!(registry.get(&SourceId::from("docs")).expect("get").url, url);
}

// ---------------------------------------------------------------------------
// 2. Cascade (removal deletes every dependent row)
// ---------------------------------------------------------------------------

#[test]
fn removing_a_source_cascades_artifacts_and_runs() {
    let root = TempDir::new().expect("tempdir");
    let store = Store::open_at(root.path()).expect("open");
    let registry = SourceRegistry::new(&store);

    registry
        .register(NewSource::new("docs", "https://example.com/defs"))
        .expect("register docs");
    registry
        .register(NewSource::new("extra", "https://example.com/extra"))
        .expect("register extra");

    store.record_file(&tracked("docs", "intro.md", "h1")).expect("track");
    store.record_file(&tracked("docs", "setup.md", "h2")).expect("track");
    store.record_file(&tracked("extra", "notes.md", "h3")).expect("track");
    store.record_sync_run(&run("docs", SyncStatus::Success)).expect("run");
    store.record_sync_run(&run("extra", SyncStatus::Success)).expect("run");

    registry.remove(&SourceId::from("docs")).expect("remove");

    let docs = SourceId::from("docs");
    assert!(store.list_artifacts(&docs).expect("artifacts").is_empty());
    assert!(store.get_recent_runs(&docs, 10).expect("runs").is_empty());

    // The sibling source is untouched.
    let extra = SourceId::from("extra");
    assert_eq!(store.list_artifacts(&extra).expect("artifacts").len(), 1);
    assert_eq!(store.get_recent_runs(&extra, 10).expect("runs").len(), 1);
}

// ---------------------------------------------------------------------------
// 3. Persistence across reopen
// ---------------------------------------------------------------------------

#[test]
fn state_survives_close_and_reopen() {
    let root = TempDir::new().expect("tempdir");
    {
        let store = Store::open_at(root.path()).expect("open");
        let registry = SourceRegistry::new(&store);
        registry
            .register(NewSource::new("docs", "https://example.com/defs").priority(2))
            .expect("register");
        store.record_file(&tracked("docs", "intro.md", "h1")).expect("track");
        store.record_sync_run(&run("docs", SyncStatus::Partial)).expect("run");
        store.close().expect("close");
    }

    let store = Store::open_at(root.path()).expect("reopen");
    let registry = SourceRegistry::new(&store);
    let docs = SourceId::from("docs");

    let source = registry.get(&docs).expect("get");
    assert_eq!(source.priority, 2);
    assert_eq!(
        store.get_hash(&docs, "intro.md").expect("hash").as_deref(),
        Some("h1")
    );
    assert_eq!(
        store.last_run_status(&docs).expect("status"),
        Some(SyncStatus::Partial)
    );
}

#[test]
fn run_history_is_append_only_audit_trail() {
    let root = TempDir::new().expect("tempdir");
    let store = Store::open_at(root.path()).expect("open");
    let registry = SourceRegistry::new(&store);
    registry
        .register(NewSource::new("docs", "https://example.com/defs"))
        .expect("register");

    let docs = SourceId::from("docs");
    for status in [SyncStatus::Error, SyncStatus::Partial, SyncStatus::Success] {
        store.record_sync_run(&run("docs", status)).expect("record");
    }

    let recent = store.get_recent_runs(&docs, 2).expect("recent");
    assert_eq!(recent.len(), 2, "limit respected");
    assert_eq!(recent[0].status, SyncStatus::Success, "newest first");
    assert_eq!(recent[1].status, SyncStatus::Partial);
}
