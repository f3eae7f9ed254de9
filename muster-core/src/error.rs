//! Error types for muster-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the SQLite state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("state store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store could not be opened even after recreating the schema.
    #[error("state store at {path} is unusable: {detail}")]
    Unusable { path: PathBuf, detail: String },

    /// The writer mutex was poisoned by a panicking thread.
    #[error("state store lock poisoned")]
    Poisoned,

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.muster/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Errors from source registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Malformed source configuration, rejected before anything is persisted.
    #[error("invalid source: {reason}")]
    Validation { reason: String },

    /// No source registered under the given id.
    #[error("source '{id}' is not registered")]
    NotFound { id: String },

    /// An error from the underlying store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
