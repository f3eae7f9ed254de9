//! Error types for muster-sync.
//!
//! Per-file fetch failures and hash/ETag divergences are NOT errors — they
//! travel through result variants and the sync report. `SyncError` is for
//! configuration and environment failures only.

use std::path::PathBuf;

use thiserror::Error;

use muster_core::error::{RegistryError, StoreError};

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the source registry.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// An error from the state store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
