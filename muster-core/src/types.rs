//! Domain types for the Muster state store.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem
//! paths. Timestamps are `chrono::DateTime<Utc>` and serialize as RFC 3339.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a configured remote source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Outcome of one sync run for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Every enumerated path was fetched or verified unchanged.
    Success,
    /// A mix of successes and per-file failures.
    Partial,
    /// Every path failed, or the manifest itself could not be obtained.
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Partial => "partial",
            SyncStatus::Error => "error",
        }
    }

    /// Parse the column form written by [`as_str`](Self::as_str).
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "success" => Some(SyncStatus::Success),
            "partial" => Some(SyncStatus::Partial),
            "error" => Some(SyncStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A configured remote source of artifact definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    /// Base http(s) URL the manifest and artifacts are fetched beneath.
    pub url: String,
    /// Optional path segment between the base URL and the artifact tree.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdirectory: Option<String>,
    /// Lower value wins when several sources offer the same artifact name.
    pub priority: u32,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    /// ETag of the source's manifest resource from the last sync.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_etag: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when registering a source; the registry fills in the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSource {
    pub id: SourceId,
    pub url: String,
    pub subdirectory: Option<String>,
    pub priority: u32,
    pub enabled: bool,
}

impl NewSource {
    pub fn new(id: impl Into<SourceId>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            subdirectory: None,
            priority: 0,
            enabled: true,
        }
    }

    pub fn subdirectory(mut self, dir: impl Into<String>) -> Self {
        self.subdirectory = Some(dir.into());
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Partial update for a registered source. `None` fields are left untouched.
///
/// `subdirectory` is doubly optional: the outer `None` means "keep", the
/// inner `None` means "clear".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceUpdate {
    pub url: Option<String>,
    pub subdirectory: Option<Option<String>>,
    pub priority: Option<u32>,
    pub enabled: Option<bool>,
}

/// Per-file record mapping a source + relative path to its last-known
/// content hash and cache location. Primary key: `(source_id, path)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedArtifact {
    pub source_id: SourceId,
    /// Path relative to the source's artifact root.
    pub path: String,
    /// SHA-256 hex digest of the cached bytes.
    pub content_hash: String,
    /// ETag from the last 200 response for this file, if the server sent one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub local_cache_path: PathBuf,
    pub size_bytes: u64,
    pub synced_at: DateTime<Utc>,
}

/// One append-only audit record of a sync invocation for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: i64,
    pub source_id: SourceId,
    pub started_at: DateTime<Utc>,
    pub status: SyncStatus,
    pub files_fetched: u32,
    pub files_unchanged: u32,
    pub files_failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub duration_ms: u64,
}

/// Fields for a sync run about to be recorded; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSyncRun {
    pub source_id: SourceId,
    pub started_at: DateTime<Utc>,
    pub status: SyncStatus,
    pub files_fetched: u32,
    pub files_unchanged: u32,
    pub files_failed: u32,
    pub error_detail: Option<String>,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
