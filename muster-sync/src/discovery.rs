//! Artifact discovery — manifest-driven path enumeration.
//!
//! A source's artifact set is enumerated from a manifest resource fetched
//! like any other file, through the same conditional fetcher. The engine is
//! deliberately decoupled from any one hosting API: [`ArtifactDiscovery`] is
//! the seam, and [`ManifestDiscovery`] is the committed-index implementation
//! in two wire formats (plaintext line list, JSON string array).
//!
//! The manifest is a strict schema: every entry must be a traversal-safe
//! relative path. One unsafe entry fails the whole manifest for that source
//! — a tampered listing is a signal, not something to skip quietly.

use muster_core::types::Source;

use crate::fetcher::{FetchOutcome, Fetcher};

/// Result of enumerating a source's artifact paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestOutcome {
    /// The manifest matched the presented ETag; the tracked path set stands.
    Unchanged,
    /// A fresh path list, already validated, plus the manifest's new ETag.
    Listed {
        paths: Vec<String>,
        etag: Option<String>,
    },
    /// The manifest could not be fetched or failed validation.
    Failed { detail: String },
}

/// Pluggable enumeration mechanism for a source's artifact paths.
pub trait ArtifactDiscovery {
    fn enumerate(
        &self,
        fetcher: &Fetcher,
        source: &Source,
        known_etag: Option<&str>,
        force: bool,
    ) -> ManifestOutcome;
}

/// Wire format of the committed manifest index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// Newline-separated relative paths; blank lines and `#` comments skipped.
    Lines,
    /// A JSON array of relative path strings.
    Json,
}

/// Committed-index discovery: fetches `<base>/<file_name>` and parses it.
#[derive(Debug, Clone)]
pub struct ManifestDiscovery {
    pub file_name: String,
    pub format: ManifestFormat,
}

impl Default for ManifestDiscovery {
    fn default() -> Self {
        Self {
            file_name: "manifest.txt".to_owned(),
            format: ManifestFormat::Lines,
        }
    }
}

impl ManifestDiscovery {
    pub fn json(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            format: ManifestFormat::Json,
        }
    }

    fn parse(&self, body: &[u8]) -> Result<Vec<String>, String> {
        let paths = match self.format {
            ManifestFormat::Lines => {
                let text = std::str::from_utf8(body)
                    .map_err(|_| "manifest is not valid UTF-8".to_owned())?;
                text.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_owned)
                    .collect()
            }
            ManifestFormat::Json => serde_json::from_slice::<Vec<String>>(body)
                .map_err(|e| format!("manifest is not a JSON array of paths: {e}"))?,
        };

        for path in &paths {
            if let Err(reason) = validate_rel_path(path) {
                return Err(format!("unsafe manifest entry '{path}': {reason}"));
            }
        }
        Ok(paths)
    }
}

impl ArtifactDiscovery for ManifestDiscovery {
    fn enumerate(
        &self,
        fetcher: &Fetcher,
        source: &Source,
        known_etag: Option<&str>,
        force: bool,
    ) -> ManifestOutcome {
        let url = join_url(source, &self.file_name);
        match fetcher.fetch(&url, known_etag, force) {
            FetchOutcome::Fresh => ManifestOutcome::Unchanged,
            FetchOutcome::Updated { body, etag } => match self.parse(&body) {
                Ok(paths) => ManifestOutcome::Listed { paths, etag },
                Err(detail) => ManifestOutcome::Failed { detail },
            },
            FetchOutcome::Failed { detail } => ManifestOutcome::Failed {
                detail: format!("manifest fetch failed: {detail}"),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// URL and path rules
// ---------------------------------------------------------------------------

/// Join a source's base URL, optional subdirectory, and a relative path.
pub fn join_url(source: &Source, rel_path: &str) -> String {
    let mut url = source.url.trim_end_matches('/').to_owned();
    if let Some(dir) = &source.subdirectory {
        let dir = dir.trim_matches('/');
        if !dir.is_empty() {
            url.push('/');
            url.push_str(dir);
        }
    }
    url.push('/');
    url.push_str(rel_path.trim_start_matches('/'));
    url
}

/// Traversal-safety rule applied to every manifest entry before fetch.
pub fn validate_rel_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("empty path".to_owned());
    }
    if path.starts_with('/') {
        return Err("absolute path".to_owned());
    }
    if path.contains('\\') {
        return Err("backslash separator".to_owned());
    }
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return Err("drive-letter path".to_owned());
    }
    if path.split('/').any(|seg| seg == "..") {
        return Err("parent-directory component".to_owned());
    }
    if path.chars().any(char::is_control) {
        return Err("control character".to_owned());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
