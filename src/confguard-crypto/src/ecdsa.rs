//! ECDSA P-256 signature operations.
//!
//! Issuer keys are commonly P-256 because the same curve is available in
//! hardware keystores and HSMs on the publishing side.

use p256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use p256::elliptic_curve::rand_core::OsRng;
use pkcs8::{EncodePublicKey, LineEnding};

use crate::error::CryptoError;
use crate::traits::ConfigSigner;
use crate::types::SignatureAlgorithm;

/// ECDSA P-256 signer.
pub struct P256Signer {
    signing_key: SigningKey,
}

impl P256Signer {
    /// Create a new signer with a random key.
    #[must_use]
    pub fn random() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Create a signer from an existing 32-byte scalar.
    ///
    /// # Errors
    ///
    /// Returns error if the key bytes are invalid.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| CryptoError::invalid_private_key(e.to_string()))?;

        Ok(Self { signing_key })
    }

    /// Get the verifying key.
    #[must_use]
    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign and return the ASN.1 DER encoding instead of fixed `r || s`.
    pub fn sign_der(&self, data: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(data);
        signature.to_der().as_bytes().to_vec()
    }
}

impl ConfigSigner for P256Signer {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::EcdsaP256
    }

    fn public_key(&self) -> Result<Vec<u8>, CryptoError> {
        let encoded = self.signing_key.verifying_key().to_encoded_point(false); // Uncompressed
        Ok(encoded.as_bytes().to_vec())
    }

    fn public_key_pem(&self) -> Result<String, CryptoError> {
        self.signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Pem(e.to_string()))
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature: Signature = self.signing_key.sign(data);
        Ok(signature.to_bytes().to_vec())
    }
}

/// ECDSA P-256 verifier.
pub struct P256Verifier;

impl P256Verifier {
    /// Verify against an already-decoded key.
    ///
    /// Accepts both the fixed 64-byte `r || s` form and ASN.1 DER.
    pub fn verify_with_key(
        key: &VerifyingKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, CryptoError> {
        let sig = parse_signature(signature)?;
        Ok(key.verify(data, &sig).is_ok())
    }
}

fn parse_signature(signature: &[u8]) -> Result<Signature, CryptoError> {
    if signature.len() == SignatureAlgorithm::EcdsaP256.raw_signature_size() {
        Signature::from_slice(signature).map_err(|e| CryptoError::invalid_signature(e.to_string()))
    } else {
        Signature::from_der(signature).map_err(|e| CryptoError::invalid_signature(e.to_string()))
    }
}
