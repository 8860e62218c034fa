//! Local cache of the last accepted artifact triple.
//!
//! Three artifacts plus a commit marker live in one directory:
//!
//! ```text
//! active-config.json    document bytes
//! active-config.pub     issuer public key (PEM)
//! active-config.sig     detached signature (raw or base64)
//! active-config.commit  SHA-256 of all three, written last
//! ```
//!
//! A commit removes the marker first and writes it again only after every
//! artifact has been durably replaced. The cache counts as present only when
//! the marker exists and matches the artifacts on disk, so an interrupted
//! commit reads as "no cache" instead of a mismatched document and signature.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::artifacts::{ArtifactSource, ArtifactTriple, VerifiedTriple};
use crate::config::format_stored_date;
use crate::document::parse_meta;
use crate::durable::{remove_durable, sync_dir, write_durable};
use crate::error::ConfigError;

/// Cached document file name.
pub const DOCUMENT_FILE: &str = "active-config.json";
/// Cached public key file name.
pub const PUBLIC_KEY_FILE: &str = "active-config.pub";
/// Cached signature file name.
pub const SIGNATURE_FILE: &str = "active-config.sig";
/// Commit marker file name.
pub const COMMIT_MARKER_FILE: &str = "active-config.commit";

/// Digest record written as the final step of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CommitMarker {
    document_sha256: String,
    public_key_sha256: String,
    signature_sha256: String,
    serial: Option<u64>,
    committed_at: String,
}

impl CommitMarker {
    fn for_triple(triple: &ArtifactTriple) -> Self {
        Self {
            document_sha256: sha256_hex(&triple.document),
            public_key_sha256: sha256_hex(triple.public_key.as_bytes()),
            signature_sha256: sha256_hex(&triple.signature),
            serial: parse_meta(&triple.document).ok().map(|m| m.serial),
            committed_at: format_stored_date(Utc::now()),
        }
    }

    fn matches(&self, triple: &ArtifactTriple) -> bool {
        self.document_sha256 == sha256_hex(&triple.document)
            && self.public_key_sha256 == sha256_hex(triple.public_key.as_bytes())
            && self.signature_sha256 == sha256_hex(&triple.signature)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Directory-backed store for the cached triple.
///
/// Callers serialize commits. The loader holds a per-directory write guard
/// keyed on [`LocalCacheStore::dir`] around every commit, bootstrap seeding
/// included.
#[derive(Debug, Clone)]
pub struct LocalCacheStore {
    dir: PathBuf,
}

impl LocalCacheStore {
    /// Store rooted at `dir`. The directory is created on first commit.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// True only if all three artifacts and a matching commit marker exist.
    pub fn exists(&self) -> bool {
        match self.read() {
            Ok(_) => true,
            Err(e) => {
                debug!(dir = ?self.dir, reason = %e, "Cache: not usable");
                false
            },
        }
    }

    /// Read the cached triple.
    ///
    /// # Errors
    ///
    /// `CacheError` if any artifact or the marker is missing or unreadable,
    /// or if the marker does not match the artifacts.
    pub fn read(&self) -> Result<ArtifactTriple, ConfigError> {
        let document = self.read_file(DOCUMENT_FILE)?;
        let public_key = String::from_utf8(self.read_file(PUBLIC_KEY_FILE)?).map_err(|e| {
            ConfigError::CacheError {
                message: format!("{} is not UTF-8: {}", PUBLIC_KEY_FILE, e),
            }
        })?;
        let signature = self.read_file(SIGNATURE_FILE)?;
        let marker_bytes = self.read_file(COMMIT_MARKER_FILE)?;

        let marker: CommitMarker =
            serde_json::from_slice(&marker_bytes).map_err(|e| ConfigError::CacheError {
                message: format!("unparsable commit marker: {}", e),
            })?;

        let triple = ArtifactTriple::new(document, public_key, signature, ArtifactSource::Cache);
        if !marker.matches(&triple) {
            return Err(ConfigError::CacheError {
                message: "commit marker does not match cached artifacts".into(),
            });
        }
        Ok(triple)
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>, ConfigError> {
        let path = self.path(name);
        std::fs::read(&path).map_err(|e| ConfigError::CacheError {
            message: format!("read {}: {}", path.display(), e),
        })
    }

    /// Replace all three artifacts as a unit.
    ///
    /// # Errors
    ///
    /// `CacheError` on any I/O failure. The cache then reads as absent until
    /// the next successful commit.
    pub fn commit_atomic(&self, triple: &VerifiedTriple) -> Result<(), ConfigError> {
        let io_err = |step: &str, e: std::io::Error| ConfigError::CacheError {
            message: format!("commit {}: {}", step, e),
        };

        std::fs::create_dir_all(&self.dir).map_err(|e| io_err("create dir", e))?;

        // Invalidate first: from here until the marker is rewritten the
        // cache reads as absent.
        remove_durable(&self.path(COMMIT_MARKER_FILE)).map_err(|e| io_err("clear marker", e))?;

        let raw = triple.as_triple();
        write_durable(&self.path(DOCUMENT_FILE), &raw.document)
            .map_err(|e| io_err(DOCUMENT_FILE, e))?;
        write_durable(&self.path(PUBLIC_KEY_FILE), raw.public_key.as_bytes())
            .map_err(|e| io_err(PUBLIC_KEY_FILE, e))?;
        write_durable(&self.path(SIGNATURE_FILE), &raw.signature)
            .map_err(|e| io_err(SIGNATURE_FILE, e))?;

        let marker = CommitMarker::for_triple(raw);
        let marker_json = serde_json::to_vec_pretty(&marker).map_err(|e| {
            ConfigError::CacheError {
                message: format!("serialize commit marker: {}", e),
            }
        })?;
        write_durable(&self.path(COMMIT_MARKER_FILE), &marker_json)
            .map_err(|e| io_err(COMMIT_MARKER_FILE, e))?;
        sync_dir(&self.dir).map_err(|e| io_err("sync dir", e))?;

        info!(
            dir = ?self.dir,
            serial = ?marker.serial,
            from = %triple.source(),
            "Cache: committed configuration"
        );
        Ok(())
    }

    /// Remove every cached artifact.
    pub fn clear(&self) -> Result<(), ConfigError> {
        for name in [COMMIT_MARKER_FILE, DOCUMENT_FILE, PUBLIC_KEY_FILE, SIGNATURE_FILE] {
            remove_durable(&self.path(name)).map_err(|e| ConfigError::CacheError {
                message: format!("remove {}: {}", name, e),
            })?;
        }
        warn!(dir = ?self.dir, "Cache: cleared");
        Ok(())
    }
}
