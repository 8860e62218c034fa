//! The configuration triple packaged with the application.
//!
//! Read-only. Its signature is verified like any other source; being bundled
//! confers no trust.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::artifacts::{ArtifactSource, ArtifactTriple, VerifiedTriple};
use crate::config::BundledProperties;
use crate::durable::write_durable;
use crate::error::ConfigError;

/// Bundled document file name.
pub const DEFAULT_DOCUMENT_FILE: &str = "default-config.json";
/// Bundled public key file name.
pub const DEFAULT_PUBLIC_KEY_FILE: &str = "default-config.pub";
/// Bundled signature file name.
pub const DEFAULT_SIGNATURE_FILE: &str = "default-config.sig";
/// Bundled properties file name.
pub const DEFAULT_PROPERTIES_FILE: &str = "default-config.properties";

/// Where the bundled default lives.
#[derive(Debug, Clone)]
pub enum BundledSource {
    /// Installed next to the binary.
    Directory(PathBuf),
    /// Compiled in with `include_bytes!` / `include_str!`.
    Embedded {
        /// Document bytes.
        document: &'static [u8],
        /// Public key PEM.
        public_key: &'static str,
        /// Signature bytes.
        signature: &'static [u8],
        /// Properties file text.
        properties: &'static str,
    },
}

impl BundledSource {
    /// Bundle installed in `dir`.
    pub fn directory(dir: impl Into<PathBuf>) -> Self {
        Self::Directory(dir.into())
    }

    /// Read the bundled triple.
    ///
    /// # Errors
    ///
    /// `BundledUnavailable` if a directory bundle cannot be read.
    pub fn read(&self) -> Result<ArtifactTriple, ConfigError> {
        match self {
            Self::Directory(dir) => {
                let document = read_bundled(dir, DEFAULT_DOCUMENT_FILE)?;
                let public_key = String::from_utf8(read_bundled(dir, DEFAULT_PUBLIC_KEY_FILE)?)
                    .map_err(|e| ConfigError::BundledUnavailable {
                        message: format!("{} is not UTF-8: {}", DEFAULT_PUBLIC_KEY_FILE, e),
                    })?;
                let signature = read_bundled(dir, DEFAULT_SIGNATURE_FILE)?;
                Ok(ArtifactTriple::new(
                    document,
                    public_key,
                    signature,
                    ArtifactSource::Default,
                ))
            },
            Self::Embedded {
                document,
                public_key,
                signature,
                ..
            } => Ok(ArtifactTriple::new(
                document.to_vec(),
                *public_key,
                signature.to_vec(),
                ArtifactSource::Default,
            )),
        }
    }

    /// Read the bundled bootstrap properties.
    ///
    /// # Errors
    ///
    /// `BundledUnavailable` if the file cannot be read, `PropertiesError` if
    /// it is malformed.
    pub fn properties(&self) -> Result<BundledProperties, ConfigError> {
        match self {
            Self::Directory(dir) => {
                let bytes = read_bundled(dir, DEFAULT_PROPERTIES_FILE)?;
                let text = String::from_utf8_lossy(&bytes);
                BundledProperties::parse(&text)
            },
            Self::Embedded { properties, .. } => BundledProperties::parse(properties),
        }
    }
}

/// Write a verified triple and its properties as a bundle directory.
///
/// This is the packaging step that produces a [`BundledSource::Directory`].
pub fn write_bundle(
    dir: &Path,
    triple: &VerifiedTriple,
    properties: &BundledProperties,
) -> Result<(), ConfigError> {
    let files: [(&str, &[u8]); 3] = [
        (DEFAULT_DOCUMENT_FILE, triple.document()),
        (DEFAULT_PUBLIC_KEY_FILE, triple.public_key().as_bytes()),
        (DEFAULT_SIGNATURE_FILE, triple.signature()),
    ];
    let rendered = properties.render();

    for (name, bytes) in files
        .into_iter()
        .chain(std::iter::once((DEFAULT_PROPERTIES_FILE, rendered.as_bytes())))
    {
        let path = dir.join(name);
        write_durable(&path, bytes).map_err(|e| ConfigError::CacheError {
            message: format!("write {}: {}", path.display(), e),
        })?;
    }

    info!(
        dir = ?dir,
        serial = ?properties.version_serial,
        "Bundle: written"
    );
    Ok(())
}

fn read_bundled(dir: &Path, name: &str) -> Result<Vec<u8>, ConfigError> {
    let path = dir.join(name);
    std::fs::read(&path).map_err(|e| ConfigError::BundledUnavailable {
        message: format!("read {}: {}", path.display(), e),
    })
}
