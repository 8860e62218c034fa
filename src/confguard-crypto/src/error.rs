//! Cryptographic error types.

use thiserror::Error;

use crate::types::SignatureAlgorithm;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid signature format or length.
    #[error("Invalid signature: {reason}")]
    InvalidSignature {
        /// Reason the signature is invalid.
        reason: String,
    },

    /// Signature did not verify against the key and payload.
    #[error("Signature verification failed: {algorithm}")]
    VerificationFailed {
        /// The algorithm that was used.
        algorithm: SignatureAlgorithm,
    },

    /// Invalid private key format or length.
    #[error("Invalid private key: {reason}")]
    InvalidPrivateKey {
        /// Reason the key is invalid.
        reason: String,
    },

    /// The PEM key names an algorithm this crate cannot verify.
    #[error("Algorithm not supported: {algorithm}")]
    UnsupportedAlgorithm {
        /// The unsupported algorithm (OID or name).
        algorithm: String,
    },

    /// PEM encoding or decoding error.
    #[error("PEM error: {0}")]
    Pem(String),
}

impl CryptoError {
    /// Create an invalid signature error.
    #[must_use]
    pub fn invalid_signature(reason: impl Into<String>) -> Self {
        Self::InvalidSignature {
            reason: reason.into(),
        }
    }

    /// Create an invalid private key error.
    #[must_use]
    pub fn invalid_private_key(reason: impl Into<String>) -> Self {
        Self::InvalidPrivateKey {
            reason: reason.into(),
        }
    }
}
