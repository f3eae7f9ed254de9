//! Muster core library — domain types, state store, source registry, errors.
//!
//! Public API surface:
//! - [`types`] — newtypes and domain structs
//! - [`error`] — [`StoreError`], [`RegistryError`]
//! - [`store`] — SQLite-backed [`Store`](store::Store)
//! - [`registry`] — validated [`SourceRegistry`](registry::SourceRegistry)

pub mod error;
pub mod registry;
pub mod store;
pub mod types;

pub use error::{RegistryError, StoreError};
pub use registry::SourceRegistry;
pub use store::Store;
pub use types::{
    NewSource, NewSyncRun, Source, SourceId, SourceUpdate, SyncRun, SyncStatus, TrackedArtifact,
};
