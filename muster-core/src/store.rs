//! SQLite-backed state store.
//!
//! # Storage layout
//!
//! ```text
//! <root>/                 (default ~/.muster/)
//!   state.db              schema_version, sources, tracked_artifacts, sync_runs
//! ```
//!
//! One connection per [`Store`], guarded by a single writer mutex. Every
//! statement runs as its own transaction, so an interrupted sync leaves the
//! store consistent. The store is a cache of remote truth: if the database
//! cannot be opened or its schema does not match, the file is removed and
//! recreated empty, to be rebuilt by the next full sync.
//!
//! # API pattern
//!
//! - `open_at(root: &Path)` — explicit root; used in tests with `TempDir`
//! - `open()` — derives the root from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg form; always use `open_at`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{io_err, StoreError};
use crate::types::{NewSyncRun, Source, SourceId, SyncRun, SyncStatus, TrackedArtifact};

const STATE_DB_FILE: &str = "state.db";

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// A single schema migration, applied atomically and recorded in
/// `schema_version`.
struct Migration {
    version: i64,
    up_sql: &'static str,
}

fn migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS sources (
                id             TEXT PRIMARY KEY,
                url            TEXT NOT NULL,
                subdirectory   TEXT,
                priority       INTEGER NOT NULL DEFAULT 0,
                enabled        INTEGER NOT NULL DEFAULT 1,
                last_sync_time TEXT,
                last_etag      TEXT,
                created_at     TEXT NOT NULL,
                updated_at     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tracked_artifacts (
                source_id        TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                path             TEXT NOT NULL,
                content_hash     TEXT NOT NULL,
                etag             TEXT,
                local_cache_path TEXT NOT NULL,
                size_bytes       INTEGER NOT NULL,
                synced_at        TEXT NOT NULL,
                PRIMARY KEY (source_id, path)
            );

            CREATE TABLE IF NOT EXISTS sync_runs (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id       TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                started_at      TEXT NOT NULL,
                status          TEXT NOT NULL,
                files_fetched   INTEGER NOT NULL DEFAULT 0,
                files_unchanged INTEGER NOT NULL DEFAULT 0,
                files_failed    INTEGER NOT NULL DEFAULT 0,
                error_detail    TEXT,
                duration_ms     INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_sync_runs_source
                ON sync_runs(source_id, id);
        "#,
    }]
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Persistent record of sources, per-file content hashes, and sync history.
pub struct Store {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the store at `<root>/state.db`.
    ///
    /// A corrupt or schema-incompatible database is removed and recreated
    /// empty; only a second consecutive failure is surfaced as
    /// [`StoreError::Unusable`].
    pub fn open_at(root: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root).map_err(|e| io_err(root, e))?;
        let path = root.join(STATE_DB_FILE);

        match Self::try_open(&path) {
            Ok(store) => Ok(store),
            Err(_) => {
                remove_db_files(&path)?;
                Self::try_open(&path).map_err(|e| StoreError::Unusable {
                    path,
                    detail: e.to_string(),
                })
            }
        }
    }

    /// `open_at` convenience wrapper rooted at `~/.muster/`.
    pub fn open() -> Result<Self, StoreError> {
        let home = dirs::home_dir().ok_or(StoreError::HomeNotFound)?;
        Self::open_at(&home.join(".muster"))
    }

    fn try_open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        apply_migrations(&conn)?;
        verify_schema(&conn)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Explicitly close the connection, flushing WAL state.
    pub fn close(self) -> Result<(), StoreError> {
        let conn = self.conn.into_inner().map_err(|_| StoreError::Poisoned)?;
        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // -----------------------------------------------------------------------
    // Sources
    // -----------------------------------------------------------------------

    /// Insert a fully-formed source row. The registry validates first.
    pub fn insert_source(&self, source: &Source) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO sources
               (id, url, subdirectory, priority, enabled, last_sync_time,
                last_etag, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                source.id.0,
                source.url,
                source.subdirectory,
                source.priority,
                source.enabled,
                source.last_sync_time,
                source.last_etag,
                source.created_at,
                source.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Overwrite every mutable column of an existing source row.
    pub fn update_source(&self, source: &Source) -> Result<bool, StoreError> {
        let changed = self.conn()?.execute(
            "UPDATE sources
                SET url = ?2, subdirectory = ?3, priority = ?4, enabled = ?5,
                    last_sync_time = ?6, last_etag = ?7, updated_at = ?8
              WHERE id = ?1",
            params![
                source.id.0,
                source.url,
                source.subdirectory,
                source.priority,
                source.enabled,
                source.last_sync_time,
                source.last_etag,
                source.updated_at,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Delete a source row. `tracked_artifacts` and `sync_runs` rows cascade.
    pub fn delete_source(&self, id: &SourceId) -> Result<bool, StoreError> {
        let changed = self
            .conn()?
            .execute("DELETE FROM sources WHERE id = ?1", params![id.0])?;
        Ok(changed > 0)
    }

    pub fn get_source(&self, id: &SourceId) -> Result<Option<Source>, StoreError> {
        let conn = self.conn()?;
        let source = conn
            .query_row(
                &format!("{SELECT_SOURCE} WHERE id = ?1"),
                params![id.0],
                source_from_row,
            )
            .optional()?;
        Ok(source)
    }

    /// All sources ordered ascending by priority, ties broken by lexical id.
    pub fn list_sources(&self, enabled_only: bool) -> Result<Vec<Source>, StoreError> {
        let conn = self.conn()?;
        let sql = if enabled_only {
            format!("{SELECT_SOURCE} WHERE enabled = 1 ORDER BY priority ASC, id ASC")
        } else {
            format!("{SELECT_SOURCE} ORDER BY priority ASC, id ASC")
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], source_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Update the per-source sync bookkeeping after a run.
    pub fn record_source_sync(
        &self,
        id: &SourceId,
        sync_time: DateTime<Utc>,
        manifest_etag: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE sources
                SET last_sync_time = ?2, last_etag = ?3, updated_at = ?2
              WHERE id = ?1",
            params![id.0, sync_time, manifest_etag],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tracked artifacts
    // -----------------------------------------------------------------------

    /// Last recorded content hash for `(source_id, path)`, if any.
    pub fn get_hash(&self, source_id: &SourceId, path: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let hash = conn
            .query_row(
                "SELECT content_hash FROM tracked_artifacts
                  WHERE source_id = ?1 AND path = ?2",
                params![source_id.0, path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    pub fn get_artifact(
        &self,
        source_id: &SourceId,
        path: &str,
    ) -> Result<Option<TrackedArtifact>, StoreError> {
        let conn = self.conn()?;
        let artifact = conn
            .query_row(
                &format!("{SELECT_ARTIFACT} WHERE source_id = ?1 AND path = ?2"),
                params![source_id.0, path],
                artifact_from_row,
            )
            .optional()?;
        Ok(artifact)
    }

    /// All tracked artifacts for a source, ordered by path.
    pub fn list_artifacts(&self, source_id: &SourceId) -> Result<Vec<TrackedArtifact>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare(&format!("{SELECT_ARTIFACT} WHERE source_id = ?1 ORDER BY path ASC"))?;
        let rows = stmt.query_map(params![source_id.0], artifact_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Upsert a tracked artifact row keyed on `(source_id, path)`.
    pub fn record_file(&self, artifact: &TrackedArtifact) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO tracked_artifacts
               (source_id, path, content_hash, etag, local_cache_path,
                size_bytes, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(source_id, path) DO UPDATE SET
                content_hash = excluded.content_hash,
                etag = excluded.etag,
                local_cache_path = excluded.local_cache_path,
                size_bytes = excluded.size_bytes,
                synced_at = excluded.synced_at",
            params![
                artifact.source_id.0,
                artifact.path,
                artifact.content_hash,
                artifact.etag,
                artifact.local_cache_path.to_string_lossy(),
                artifact.size_bytes,
                artifact.synced_at,
            ],
        )?;
        Ok(())
    }

    /// True for any never-seen path; false iff `current_hash` exactly
    /// matches the stored hash.
    pub fn has_changed(
        &self,
        source_id: &SourceId,
        path: &str,
        current_hash: &str,
    ) -> Result<bool, StoreError> {
        Ok(match self.get_hash(source_id, path)? {
            Some(stored) => stored != current_hash,
            None => true,
        })
    }

    // -----------------------------------------------------------------------
    // Sync runs
    // -----------------------------------------------------------------------

    /// Append a sync run row and return its monotonic id. Rows are never
    /// mutated afterwards.
    pub fn record_sync_run(&self, run: &NewSyncRun) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_runs
               (source_id, started_at, status, files_fetched, files_unchanged,
                files_failed, error_detail, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.source_id.0,
                run.started_at,
                run.status.as_str(),
                run.files_fetched,
                run.files_unchanged,
                run.files_failed,
                run.error_detail,
                run.duration_ms,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent runs for a source, newest first.
    pub fn get_recent_runs(
        &self,
        source_id: &SourceId,
        limit: u32,
    ) -> Result<Vec<SyncRun>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_RUN} WHERE source_id = ?1 ORDER BY id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![source_id.0, limit], run_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Status of the most recent run for a source, if any.
    pub fn last_run_status(&self, source_id: &SourceId) -> Result<Option<SyncStatus>, StoreError> {
        Ok(self
            .get_recent_runs(source_id, 1)?
            .into_iter()
            .next()
            .map(|run| run.status))
    }

    /// Delete every tracked artifact and sync run for a source, keeping the
    /// source row itself registered.
    pub fn purge_source(&self, source_id: &SourceId) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM tracked_artifacts WHERE source_id = ?1",
            params![source_id.0],
        )?;
        tx.execute(
            "DELETE FROM sync_runs WHERE source_id = ?1",
            params![source_id.0],
        )?;
        tx.commit()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const SELECT_SOURCE: &str = "SELECT id, url, subdirectory, priority, enabled, \
     last_sync_time, last_etag, created_at, updated_at FROM sources";

const SELECT_ARTIFACT: &str = "SELECT source_id, path, content_hash, etag, \
     local_cache_path, size_bytes, synced_at FROM tracked_artifacts";

const SELECT_RUN: &str = "SELECT id, source_id, started_at, status, files_fetched, \
     files_unchanged, files_failed, error_detail, duration_ms FROM sync_runs";

fn source_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Source> {
    Ok(Source {
        id: SourceId(row.get(0)?),
        url: row.get(1)?,
        subdirectory: row.get(2)?,
        priority: row.get(3)?,
        enabled: row.get(4)?,
        last_sync_time: row.get(5)?,
        last_etag: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn artifact_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackedArtifact> {
    Ok(TrackedArtifact {
        source_id: SourceId(row.get(0)?),
        path: row.get(1)?,
        content_hash: row.get(2)?,
        etag: row.get(3)?,
        local_cache_path: PathBuf::from(row.get::<_, String>(4)?),
        size_bytes: row.get(5)?,
        synced_at: row.get(6)?,
    })
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRun> {
    let status: String = row.get(3)?;
    let status = SyncStatus::from_str_opt(&status).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(3, "status".to_owned(), rusqlite::types::Type::Text)
    })?;
    Ok(SyncRun {
        id: row.get(0)?,
        source_id: SourceId(row.get(1)?),
        started_at: row.get(2)?,
        status,
        files_fetched: row.get(4)?,
        files_unchanged: row.get(5)?,
        files_failed: row.get(6)?,
        error_detail: row.get(7)?,
        duration_ms: row.get(8)?,
    })
}

// ---------------------------------------------------------------------------
// Schema management
// ---------------------------------------------------------------------------

fn apply_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    for migration in migrations() {
        if migration.version <= current {
            continue;
        }
        conn.execute_batch("BEGIN")?;
        let applied = conn
            .execute_batch(migration.up_sql)
            .and_then(|_| {
                conn.execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                    params![migration.version, Utc::now()],
                )
            });
        match applied {
            Ok(_) => conn.execute_batch("COMMIT")?,
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(StoreError::Sqlite(e));
            }
        }
    }
    Ok(())
}

/// Prepare a probe statement against each table so a structurally damaged
/// schema fails at open time rather than mid-sync.
fn verify_schema(conn: &Connection) -> Result<(), StoreError> {
    for sql in [SELECT_SOURCE, SELECT_ARTIFACT, SELECT_RUN] {
        conn.prepare(&format!("{sql} LIMIT 1"))?;
    }
    Ok(())
}

fn remove_db_files(path: &Path) -> Result<(), StoreError> {
    for suffix in ["", "-wal", "-shm"] {
        let target = PathBuf::from(format!("{}{}", path.display(), suffix));
        match std::fs::remove_file(&target) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(target, e)),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
