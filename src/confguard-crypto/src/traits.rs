//! Signer abstraction shared by every algorithm.

use crate::error::CryptoError;
use crate::types::SignatureAlgorithm;

/// Trait for signature creation.
///
/// Production code only verifies; signers exist for packaging tools and tests
/// that need to mint artifact triples.
pub trait ConfigSigner {
    /// Get the algorithm used by this signer.
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Get the raw public key bytes.
    fn public_key(&self) -> Result<Vec<u8>, CryptoError>;

    /// Get the public key as an SPKI PEM document.
    fn public_key_pem(&self) -> Result<String, CryptoError>;

    /// Sign data and return the signature.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;
}
