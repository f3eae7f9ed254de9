//! Source registry — validated configuration layer over the state store.
//!
//! Validation happens synchronously at call time; a malformed source is
//! rejected with [`RegistryError::Validation`] and never persisted. Listing
//! is deterministic: ascending priority, ties broken by lexical id.

use chrono::Utc;

use crate::error::RegistryError;
use crate::store::Store;
use crate::types::{NewSource, Source, SourceId, SourceUpdate};

/// Registry of configured remote sources, borrowing the shared [`Store`].
pub struct SourceRegistry<'a> {
    store: &'a Store,
}

impl<'a> SourceRegistry<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Register a new source.
    ///
    /// Rejects malformed ids/URLs and duplicate ids before persisting.
    pub fn register(&self, new: NewSource) -> Result<Source, RegistryError> {
        validate_id(&new.id)?;
        validate_url(&new.url)?;
        validate_subdirectory(new.subdirectory.as_deref())?;

        if self.store.get_source(&new.id)?.is_some() {
            return Err(RegistryError::Validation {
                reason: format!("source id '{}' is already registered", new.id),
            });
        }

        let now = Utc::now();
        let source = Source {
            id: new.id,
            url: new.url,
            subdirectory: new.subdirectory,
            priority: new.priority,
            enabled: new.enabled,
            last_sync_time: None,
            last_etag: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_source(&source)?;
        Ok(source)
    }

    /// Apply a partial update to a registered source.
    ///
    /// Updated fields are re-validated with the same rules as `register`.
    pub fn update(&self, id: &SourceId, fields: SourceUpdate) -> Result<Source, RegistryError> {
        let mut source = self.get(id)?;

        if let Some(url) = fields.url {
            validate_url(&url)?;
            source.url = url;
        }
        if let Some(subdirectory) = fields.subdirectory {
            validate_subdirectory(subdirectory.as_deref())?;
            source.subdirectory = subdirectory;
        }
        if let Some(priority) = fields.priority {
            source.priority = priority;
        }
        if let Some(enabled) = fields.enabled {
            source.enabled = enabled;
        }
        source.updated_at = Utc::now();

        if !self.store.update_source(&source)? {
            return Err(RegistryError::NotFound { id: id.0.clone() });
        }
        Ok(source)
    }

    /// Remove a source. Tracked artifacts and sync runs cascade away with it.
    ///
    /// Removing an unregistered id is non-fatal: it returns
    /// [`RegistryError::NotFound`] and changes nothing.
    pub fn remove(&self, id: &SourceId) -> Result<(), RegistryError> {
        if !self.store.delete_source(id)? {
            return Err(RegistryError::NotFound { id: id.0.clone() });
        }
        Ok(())
    }

    pub fn get(&self, id: &SourceId) -> Result<Source, RegistryError> {
        self.store
            .get_source(id)?
            .ok_or_else(|| RegistryError::NotFound { id: id.0.clone() })
    }

    /// Sources in ascending `(priority, id)` order.
    pub fn list(&self, enabled_only: bool) -> Result<Vec<Source>, RegistryError> {
        Ok(self.store.list_sources(enabled_only)?)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_id(id: &SourceId) -> Result<(), RegistryError> {
    if id.0.is_empty() {
        return Err(invalid("id must not be empty"));
    }
    if !id
        .0
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid(&format!(
            "id '{}' may only contain [A-Za-z0-9._-]",
            id.0
        )));
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<(), RegistryError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| invalid(&format!("url '{url}' must start with http:// or https://")))?;

    let host = rest.split('/').next().unwrap_or("");
    if host.is_empty() {
        return Err(invalid(&format!("url '{url}' has no host")));
    }
    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid(&format!("url '{url}' contains whitespace")));
    }
    Ok(())
}

fn validate_subdirectory(subdirectory: Option<&str>) -> Result<(), RegistryError> {
    let Some(dir) = subdirectory else {
        return Ok(());
    };
    if dir.is_empty() {
        return Err(invalid("subdirectory must not be empty; omit it instead"));
    }
    if dir.starts_with('/') || dir.contains('\\') || dir.split('/').any(|seg| seg == "..") {
        return Err(invalid(&format!("subdirectory '{dir}' must be a safe relative path")));
    }
    Ok(())
}

fn invalid(reason: &str) -> RegistryError {
    RegistryError::Validation {
        reason: reason.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
