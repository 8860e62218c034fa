//! Error types for configuration loading.

use std::time::Duration;

use thiserror::Error;

use crate::artifacts::ArtifactSource;

/// Errors that can occur while loading, verifying or updating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Signature over a triple did not verify.
    #[error("Signature verification failed for {source_kind} configuration: {reason}")]
    SignatureVerificationFailed {
        /// Where the rejected triple came from.
        source_kind: ArtifactSource,
        /// Reason for failure.
        reason: String,
    },

    /// The configuration shipped with the application failed verification.
    ///
    /// There is no further fallback; this is a packaging defect.
    #[error("Bundled default configuration failed verification: {reason}")]
    BundledVerificationFailed {
        /// Reason for failure.
        reason: String,
    },

    /// The bundled default could not be read at all.
    #[error("Bundled default configuration unavailable: {message}")]
    BundledUnavailable {
        /// Error message.
        message: String,
    },

    /// Verified bytes were not a well-formed configuration document.
    #[error("Invalid configuration document: {reason}")]
    InvalidDocument {
        /// Reason the document is invalid.
        reason: String,
    },

    /// Local cache missing, partial or unreadable.
    #[error("Cache error: {message}")]
    CacheError {
        /// Error message.
        message: String,
    },

    /// Metadata store read or write failed.
    #[error("Metadata error: {message}")]
    MetadataError {
        /// Error message.
        message: String,
    },

    /// HTTPS transport failure (connectivity, TLS, non-success status).
    #[error("HTTPS error: {message}")]
    HttpsError {
        /// Error message.
        message: String,
    },

    /// The update check did not finish in time.
    #[error("Update check timed out after {after:?}")]
    Timeout {
        /// Configured bound.
        after: Duration,
    },

    /// The central update check could not complete.
    ///
    /// Advisory: the previously verified document stays published.
    #[error("Configuration update check failed: {0}")]
    UpdateCheckFailed(#[source] Box<ConfigError>),

    /// Bundled properties or loader configuration error.
    #[error("Configuration error: {message}")]
    PropertiesError {
        /// Error message.
        message: String,
    },

    /// `current()` was requested before a document was ever published.
    #[error("Configuration has not been initialized")]
    NotInitialized,

    /// Cryptographic error.
    #[error("Crypto error: {0}")]
    CryptoError(#[from] confguard_crypto::CryptoError),
}

impl ConfigError {
    /// Wrap a transport-class error into the advisory update failure.
    #[must_use]
    pub fn update_check_failed(inner: ConfigError) -> Self {
        match inner {
            already @ Self::UpdateCheckFailed(_) => already,
            other => Self::UpdateCheckFailed(Box::new(other)),
        }
    }

    /// Errors that must abort startup: only a broken bundled default.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BundledVerificationFailed { .. } | Self::BundledUnavailable { .. }
        )
    }

    /// Errors meaning "no update could be obtained right now".
    #[must_use]
    pub fn is_update_unavailable(&self) -> bool {
        matches!(
            self,
            Self::UpdateCheckFailed(_) | Self::HttpsError { .. } | Self::Timeout { .. }
        )
    }

    /// Errors that indicate a damaged local cache and warrant falling back
    /// to the bundled default.
    #[must_use]
    pub fn is_cache_corruption(&self) -> bool {
        matches!(
            self,
            Self::CacheError { .. }
                | Self::InvalidDocument { .. }
                | Self::SignatureVerificationFailed {
                    source_kind: ArtifactSource::Cache,
                    ..
                }
        )
    }
}
