//! Local cache layout, hashing, and the atomic write primitive.
//!
//! ## Layout
//!
//! ```text
//! <root>/cache/<slug>/<relative path>
//! ```
//!
//! `<slug>` is a stable function of the source URL: a sanitized prefix plus
//! the first 8 hex chars of the URL's SHA-256, so renaming a source id never
//! orphans its cache directory and two sources with similar URLs cannot
//! collide.
//!
//! ## `atomic_write_bytes`
//!
//! 1. Ensure the parent directory exists.
//! 2. Write to a `.muster.tmp` sibling.
//! 3. Rename to the final path (atomic on POSIX).
//!
//! A failed rename removes the temp file and leaves any previous content
//! intact.

use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{io_err, SyncError};
use muster_core::types::Source;

/// SHA-256 hex digest of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of a file's contents, streamed.
pub fn hash_file(path: &Path) -> Result<String, SyncError> {
    let file = std::fs::File::open(path).map_err(|e| io_err(path, e))?;
    let mut reader = std::io::BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).map_err(|e| io_err(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Stable cache directory slug for a source URL.
pub fn source_slug(url: &str) -> String {
    let stripped = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);

    let mut sanitized = String::with_capacity(stripped.len());
    let mut last_dash = false;
    for c in stripped.chars() {
        if c.is_ascii_alphanumeric() {
            sanitized.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            sanitized.push('-');
            last_dash = true;
        }
    }
    let sanitized = sanitized.trim_matches('-');
    let head: String = sanitized.chars().take(40).collect();
    let digest = sha256_hex(url.as_bytes());
    format!("{}-{}", head.trim_matches('-'), &digest[..8])
}

/// `<root>/cache/<slug>/` for a source.
pub fn source_dir_at(root: &Path, source: &Source) -> PathBuf {
    root.join("cache").join(source_slug(&source.url))
}

/// Cache path for one artifact: `<root>/cache/<slug>/<relative path>`.
pub fn artifact_path_at(root: &Path, source: &Source, rel_path: &str) -> PathBuf {
    let mut path = source_dir_at(root, source);
    for segment in rel_path.split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path
}

/// Atomically write artifact bytes: `.muster.tmp` sibling, then rename.
pub(crate) fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let tmp = PathBuf::from(format!("{}.muster.tmp", path.display()));
    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use muster_core::types::SourceId;
    use tempfile::TempDir;

    fn source(url: &str) -> Source {
        let now = Utc::now();
        Source {
            id: SourceId::from("docs"),
            url: url.to_owned(),
            subdirectory: None,
            priority: 0,
            enabled: true,
            last_sync_time: None,
            last_etag: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn slug_is_stable_and_distinct() {
        let a = source_slug("https://example.com/defs");
        let b = source_slug("https://example.com/defs");
        let c = source_slug("https://example.com/defs2");
        assert_eq!(a, b, "same URL must slug identically");
        assert_ne!(a, c, "different URLs must not collide");
        assert!(a.starts_with("example-com-defs-"), "got: {a}");
    }

    #[test]
    fn slug_truncates_long_urls_but_keeps_digest() {
        let url = format!("https://example.com/{}", "x".repeat(200));
        let slug = source_slug(&url);
        assert!(slug.len() <= 40 + 1 + 8, "slug too long: {slug}");
    }

    #[test]
    fn artifact_path_nests_relative_segments() {
        let root = TempDir::new().unwrap();
        let src = source("https://example.com/defs");
        let path = artifact_path_at(root.path(), &src, "agents/research.md");
        assert!(path.ends_with(
            PathBuf::from(source_slug(&src.url))
                .join("agents")
                .join("research.md")
        ));
    }

    #[test]
    fn sha256_hex_matches_known_vector() {
        // Well-known digest of the empty input.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hash_file_agrees_with_in_memory_hash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, b"artifact body").unwrap();
        assert_eq!(hash_file(&path).unwrap(), sha256_hex(b"artifact body"));
    }

    #[test]
    fn atomic_write_creates_parents_and_cleans_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agents").join("research.md");
        atomic_write_bytes(&path, b"hello").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        let tmp = PathBuf::from(format!("{}.muster.tmp", path.display()));
        assert!(!tmp.exists(), ".muster.tmp must be gone after rename");
    }

    #[test]
    #[cfg(unix)]
    fn write_into_readonly_dir_fails_and_leaves_original() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let readonly = dir.path().join("ro");
        std::fs::create_dir_all(&readonly).unwrap();
        let path = readonly.join("file.md");
        std::fs::write(&path, b"original").unwrap();

        let mut perms = std::fs::metadata(&readonly).unwrap().permissions();
        perms.set_mode(0o555);
        std::fs::set_permissions(&readonly, perms).unwrap();

        let err = atomic_write_bytes(&path, b"new");
        assert!(err.is_err(), "write into read-only dir should fail");
        assert_eq!(std::fs::read(&path).unwrap(), b"original");

        let mut perms = std::fs::metadata(&readonly).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&readonly, perms).unwrap();
    }
}
