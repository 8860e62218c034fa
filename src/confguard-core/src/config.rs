//! Loader configuration and the bundled bootstrap properties.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::ConfigError;
use crate::properties;

/// Days between central checks when the bundle does not say otherwise.
pub const DEFAULT_UPDATE_INTERVAL_DAYS: u32 = 4;

/// Fixed textual format for every persisted date (`dd.MM.yyyy HH:mm:ss`, UTC).
pub const STORED_DATE_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Property key: base URL of the central configuration service.
pub const KEY_CENTRAL_URL: &str = "central-configuration-service.url";
/// Property key: update interval in days.
pub const KEY_UPDATE_INTERVAL: &str = "configuration.update-interval";
/// Property key: serial of the bundled document.
pub const KEY_VERSION_SERIAL: &str = "configuration.version-serial";
/// Property key: when the bundled document was downloaded.
pub const KEY_DOWNLOAD_DATE: &str = "configuration.download-date";

/// Format a date for storage.
pub fn format_stored_date(date: DateTime<Utc>) -> String {
    date.format(STORED_DATE_FORMAT).to_string()
}

/// Parse a stored date; `None` if it does not match the fixed format.
pub fn parse_stored_date(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text.trim(), STORED_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Static bootstrap parameters packaged with the bundled default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundledProperties {
    /// Base URL of the central configuration service.
    pub central_service_url: String,
    /// Days between central checks.
    pub update_interval_days: u32,
    /// Serial of the bundled document, written at packaging time.
    pub version_serial: Option<u64>,
    /// When the bundled document was downloaded, written at packaging time.
    pub download_date: Option<DateTime<Utc>>,
}

impl BundledProperties {
    /// Parse the bundled `key=value` properties file.
    ///
    /// # Errors
    ///
    /// `PropertiesError` if the central URL is missing or a numeric field is
    /// malformed. A malformed download date is ignored.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let props = properties::parse(text);

        let central_service_url = props
            .get(KEY_CENTRAL_URL)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| ConfigError::PropertiesError {
                message: format!("missing {}", KEY_CENTRAL_URL),
            })?;

        let update_interval_days = match props.get(KEY_UPDATE_INTERVAL) {
            Some(v) => v.parse::<u32>().map_err(|e| ConfigError::PropertiesError {
                message: format!("{} {:?}: {}", KEY_UPDATE_INTERVAL, v, e),
            })?,
            None => DEFAULT_UPDATE_INTERVAL_DAYS,
        };

        let version_serial = props
            .get(KEY_VERSION_SERIAL)
            .map(|v| {
                v.parse::<u64>().map_err(|e| ConfigError::PropertiesError {
                    message: format!("{} {:?}: {}", KEY_VERSION_SERIAL, v, e),
                })
            })
            .transpose()?;

        let download_date = props.get(KEY_DOWNLOAD_DATE).and_then(|v| parse_stored_date(v));

        Ok(Self {
            central_service_url,
            update_interval_days,
            version_serial,
            download_date,
        })
    }

    /// Render back to the properties file format.
    pub fn render(&self) -> String {
        let mut props = BTreeMap::new();
        props.insert(KEY_CENTRAL_URL.to_string(), self.central_service_url.clone());
        props.insert(
            KEY_UPDATE_INTERVAL.to_string(),
            self.update_interval_days.to_string(),
        );
        if let Some(serial) = self.version_serial {
            props.insert(KEY_VERSION_SERIAL.to_string(), serial.to_string());
        }
        if let Some(date) = self.download_date {
            props.insert(KEY_DOWNLOAD_DATE.to_string(), format_stored_date(date));
        }
        properties::render("Bundled configuration properties", &props)
    }
}

/// Configuration for a [`ConfigurationLoader`](crate::loader::ConfigurationLoader).
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Directory holding the cached artifact triple.
    pub cache_dir: PathBuf,
    /// Metadata properties file.
    pub metadata_path: PathBuf,
    /// Upper bound for the network phase of a central check: the signature
    /// request plus, if it differs, the document and key downloads.
    /// Verification and the cache commit run after it and are not bounded.
    pub fetch_timeout: Duration,
    /// Overrides the bundled update interval when set.
    pub update_interval_days: Option<u32>,
}

impl LoaderConfig {
    /// Standard layout under an application data directory.
    pub fn in_dir(base: &Path) -> Self {
        Self {
            cache_dir: base.join("config"),
            metadata_path: base.join("confguard.properties"),
            ..Self::default()
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("confguard/config"),
            metadata_path: PathBuf::from("confguard/confguard.properties"),
            fetch_timeout: Duration::from_secs(30),
            update_interval_days: None,
        }
    }
}
