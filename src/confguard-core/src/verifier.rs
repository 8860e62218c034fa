//! Signature verification adapter.
//!
//! Publishers have written the detached signature both as raw binary and as
//! base64 text, so the signature is normalized before it reaches the
//! primitive. A triple either verifies completely or is rejected; there is no
//! partial trust.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use confguard_crypto::{CryptoError, PublicKey};
use tracing::{debug, warn};

use crate::artifacts::{ArtifactTriple, VerifiedTriple};
use crate::error::ConfigError;

/// Standard alphabet, padding optional.
const SIGNATURE_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode a signature that may be base64 text; otherwise return it as-is.
///
/// Text is treated as base64 only when it is entirely ASCII and decodes
/// (ignoring whitespace and line breaks) to a non-empty value.
pub fn normalize_signature(signature: &[u8]) -> Vec<u8> {
    decode_base64_signature(signature).unwrap_or_else(|| signature.to_vec())
}

fn decode_base64_signature(signature: &[u8]) -> Option<Vec<u8>> {
    if signature.is_empty() || !signature.is_ascii() {
        return None;
    }
    let compact: Vec<u8> = signature
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    match SIGNATURE_BASE64.decode(&compact) {
        Ok(decoded) if !decoded.is_empty() => Some(decoded),
        _ => None,
    }
}

/// Stateless verifier for artifact triples.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureVerifier;

impl SignatureVerifier {
    /// Create a verifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Verify a triple, consuming it.
    ///
    /// # Errors
    ///
    /// `SignatureVerificationFailed` tagged with the triple's source for any
    /// failure: unparsable key, malformed or mismatching signature.
    pub fn verify(&self, triple: ArtifactTriple) -> Result<VerifiedTriple, ConfigError> {
        let source = triple.source;
        match verify_parts(&triple.document, &triple.public_key, &triple.signature) {
            Ok(normalized) => {
                debug!(
                    source = %source,
                    document_len = triple.document.len(),
                    "Verifier: signature valid"
                );
                Ok(VerifiedTriple::new(triple, normalized))
            },
            Err(e) => {
                warn!(source = %source, error = %e, "Verifier: signature rejected");
                Err(ConfigError::SignatureVerificationFailed {
                    source_kind: source,
                    reason: e.to_string(),
                })
            },
        }
    }
}

/// Verify raw parts and return the signature encoding that matched.
///
/// When the signature looks like base64 the decoded form is tried first and
/// the raw bytes second; either must be a genuine signature to pass.
pub fn verify_parts(
    document: &[u8],
    public_key_pem: &str,
    signature: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let key = PublicKey::from_pem(public_key_pem)?;

    let mut first_error = None;
    let candidates = decode_base64_signature(signature)
        .into_iter()
        .chain(std::iter::once(signature.to_vec()));

    for candidate in candidates {
        match key.verify_strict(document, &candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) => {
                first_error.get_or_insert(e);
            },
        }
    }

    Err(first_error.unwrap_or(CryptoError::VerificationFailed {
        algorithm: key.algorithm(),
    }))
}
