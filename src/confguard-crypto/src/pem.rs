//! Issuer public keys decoded from SPKI PEM.
//!
//! The algorithm is taken from the key itself: every supported key type is
//! tried in turn and the first one whose algorithm OID matches wins.

use pkcs8::DecodePublicKey;

use crate::error::CryptoError;
use crate::types::SignatureAlgorithm;

#[cfg(feature = "ecdsa-p256")]
use crate::ecdsa::P256Verifier;
#[cfg(feature = "ed25519")]
use crate::ed25519::Ed25519Verifier;

/// A decoded issuer public key.
#[derive(Debug, Clone)]
pub enum PublicKey {
    /// ECDSA P-256 key.
    #[cfg(feature = "ecdsa-p256")]
    EcdsaP256(p256::ecdsa::VerifyingKey),
    /// Ed25519 key.
    #[cfg(feature = "ed25519")]
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    /// Decode a `-----BEGIN PUBLIC KEY-----` document.
    ///
    /// # Errors
    ///
    /// `Pem` if the text is not a PEM public key at all, and
    /// `UnsupportedAlgorithm` if it is one but of a type we do not verify.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let pem = pem.trim_start();
        if !pem.starts_with("-----BEGIN PUBLIC KEY-----") {
            return Err(CryptoError::Pem(
                "expected a PUBLIC KEY PEM block".to_string(),
            ));
        }

        #[cfg(feature = "ecdsa-p256")]
        if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_pem(pem) {
            return Ok(Self::EcdsaP256(key));
        }

        #[cfg(feature = "ed25519")]
        if let Ok(key) = ed25519_dalek::VerifyingKey::from_public_key_pem(pem) {
            return Ok(Self::Ed25519(key));
        }

        Err(CryptoError::UnsupportedAlgorithm {
            algorithm: describe_spki_algorithm(pem),
        })
    }

    /// Algorithm of this key.
    #[must_use]
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            #[cfg(feature = "ecdsa-p256")]
            Self::EcdsaP256(_) => SignatureAlgorithm::EcdsaP256,
            #[cfg(feature = "ed25519")]
            Self::Ed25519(_) => SignatureAlgorithm::Ed25519,
        }
    }

    /// Verify `signature` over `data`.
    ///
    /// Malformed signatures are errors; well-formed signatures that do not
    /// match return `Ok(false)`.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
        match self {
            #[cfg(feature = "ecdsa-p256")]
            Self::EcdsaP256(key) => P256Verifier::verify_with_key(key, data, signature),
            #[cfg(feature = "ed25519")]
            Self::Ed25519(key) => Ed25519Verifier::verify_with_key(key, data, signature),
        }
    }

    /// Verify and turn a mismatch into `CryptoError::VerificationFailed`.
    pub fn verify_strict(&self, data: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        if self.verify(data, signature)? {
            Ok(())
        } else {
            Err(CryptoError::VerificationFailed {
                algorithm: self.algorithm(),
            })
        }
    }
}

/// Best-effort description of an SPKI algorithm for error messages.
fn describe_spki_algorithm(pem: &str) -> String {
    match pkcs8::Document::from_pem(pem) {
        Ok((_, doc)) => match pkcs8::SubjectPublicKeyInfoRef::try_from(doc.as_bytes()) {
            Ok(spki) => spki.algorithm.oid.to_string(),
            Err(e) => format!("unparsable SPKI ({e})"),
        },
        Err(e) => format!("unparsable PEM ({e})"),
    }
}
