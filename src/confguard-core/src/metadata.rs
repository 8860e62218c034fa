//! Persisted engine metadata: last check, last update, accepted serial.
//!
//! Stored as a small `key=value` file. Every setter rewrites the file with
//! the durable write protocol before returning, so a crash never loses an
//! acknowledged update.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::{format_stored_date, parse_stored_date};
use crate::durable::write_durable;
use crate::error::ConfigError;
use crate::properties;

const KEY_LAST_CHECKED: &str = "lastCheckedAt";
const KEY_LAST_UPDATED: &str = "lastUpdatedAt";
const KEY_ACCEPTED_SERIAL: &str = "acceptedSerial";

/// Snapshot of the three persisted scalars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineMetadata {
    /// Last completed freshness check.
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Last time a new document was accepted.
    pub last_updated_at: Option<DateTime<Utc>>,
    /// Serial of the last accepted document.
    pub accepted_serial: Option<u64>,
}

impl EngineMetadata {
    /// True on a first run: nothing has ever been recorded.
    pub fn is_empty(&self) -> bool {
        self.last_checked_at.is_none()
            && self.last_updated_at.is_none()
            && self.accepted_serial.is_none()
    }

    /// Fill absent timestamps with `issued_at` and raise the accepted serial
    /// to `serial`. Present timestamps are kept and the serial never drops.
    pub fn reconcile_with(&mut self, issued_at: DateTime<Utc>, serial: u64) {
        self.last_checked_at.get_or_insert(issued_at);
        self.last_updated_at.get_or_insert(issued_at);
        if self.accepted_serial.map_or(true, |s| serial > s) {
            self.accepted_serial = Some(serial);
        }
    }

    fn from_props(props: &BTreeMap<String, String>) -> Self {
        let date = |key: &str| {
            let raw = props.get(key)?;
            let parsed = parse_stored_date(raw);
            if parsed.is_none() {
                warn!(key = key, value = %raw, "Metadata: unparsable date, treating as absent");
            }
            parsed
        };

        let accepted_serial = props.get(KEY_ACCEPTED_SERIAL).and_then(|raw| {
            let parsed = raw.parse::<u64>().ok();
            if parsed.is_none() {
                warn!(value = %raw, "Metadata: unparsable serial, treating as absent");
            }
            parsed
        });

        Self {
            last_checked_at: date(KEY_LAST_CHECKED),
            last_updated_at: date(KEY_LAST_UPDATED),
            accepted_serial,
        }
    }

    fn to_props(self) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();
        if let Some(d) = self.last_checked_at {
            props.insert(KEY_LAST_CHECKED.to_string(), format_stored_date(d));
        }
        if let Some(d) = self.last_updated_at {
            props.insert(KEY_LAST_UPDATED.to_string(), format_stored_date(d));
        }
        if let Some(s) = self.accepted_serial {
            props.insert(KEY_ACCEPTED_SERIAL.to_string(), s.to_string());
        }
        props
    }
}

/// Durable store for [`EngineMetadata`].
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    /// Open the store backed by `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current values from disk.
    ///
    /// A missing file reads as empty metadata; an unreadable one is logged
    /// and also reads as empty.
    pub fn load(&self) -> EngineMetadata {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => EngineMetadata::from_props(&properties::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => EngineMetadata::default(),
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Metadata: read failed, treating as empty");
                EngineMetadata::default()
            },
        }
    }

    /// Persist a full snapshot.
    pub fn store(&self, metadata: &EngineMetadata) -> Result<(), ConfigError> {
        let text = properties::render("confguard engine metadata", &metadata.to_props());
        write_durable(&self.path, text.as_bytes()).map_err(|e| ConfigError::MetadataError {
            message: format!("write {}: {}", self.path.display(), e),
        })?;
        debug!(
            last_checked_at = ?metadata.last_checked_at,
            last_updated_at = ?metadata.last_updated_at,
            accepted_serial = ?metadata.accepted_serial,
            "Metadata: persisted"
        );
        Ok(())
    }

    /// Read-modify-write against the file as it is now. Skips the write when
    /// nothing changed.
    fn update(&self, f: impl FnOnce(&mut EngineMetadata)) -> Result<EngineMetadata, ConfigError> {
        let before = self.load();
        let mut metadata = before;
        f(&mut metadata);
        if metadata != before {
            self.store(&metadata)?;
        }
        Ok(metadata)
    }

    /// Last completed freshness check.
    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        self.load().last_checked_at
    }

    /// Last accepted update.
    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.load().last_updated_at
    }

    /// Serial of the last accepted document.
    pub fn accepted_serial(&self) -> Option<u64> {
        self.load().accepted_serial
    }

    /// Record a completed freshness check.
    pub fn set_last_checked_at(&self, at: DateTime<Utc>) -> Result<(), ConfigError> {
        self.update(|m| m.last_checked_at = Some(at)).map(|_| ())
    }

    /// Record an accepted update time.
    pub fn set_last_updated_at(&self, at: DateTime<Utc>) -> Result<(), ConfigError> {
        self.update(|m| m.last_updated_at = Some(at)).map(|_| ())
    }

    /// Record the accepted serial.
    pub fn set_accepted_serial(&self, serial: u64) -> Result<(), ConfigError> {
        self.update(|m| m.accepted_serial = Some(serial)).map(|_| ())
    }

    /// Merge a published document into the stored values, see
    /// [`EngineMetadata::reconcile_with`].
    pub fn reconcile(
        &self,
        issued_at: DateTime<Utc>,
        serial: u64,
    ) -> Result<EngineMetadata, ConfigError> {
        self.update(|m| m.reconcile_with(issued_at, serial))
    }

    /// Record an accepted document in one durable write.
    pub fn record_accepted(
        &self,
        at: DateTime<Utc>,
        serial: u64,
    ) -> Result<EngineMetadata, ConfigError> {
        self.update(|m| {
            m.last_checked_at = Some(at);
            m.last_updated_at = Some(at);
            m.accepted_serial = Some(serial);
        })
    }
}
