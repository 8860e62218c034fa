//! # confguard-crypto
//!
//! Signature primitives used to authenticate remotely issued configuration
//! documents.
//!
//! - **ECDSA P-256** over SHA-256, signatures as `r || s` or DER
//! - **Ed25519**
//!
//! Issuer keys arrive as SPKI PEM text next to the document; [`PublicKey`]
//! decodes them and picks the algorithm from the key itself, so callers never
//! have to know which scheme a publisher used.
//!
//! ```rust,ignore
//! let key = PublicKey::from_pem(&pem)?;
//! key.verify_strict(&document, &signature)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod pem;
mod traits;
mod types;

#[cfg(feature = "ecdsa-p256")]
mod ecdsa;

#[cfg(feature = "ed25519")]
mod ed25519;

pub use error::CryptoError;
pub use pem::PublicKey;
pub use traits::ConfigSigner;
pub use types::SignatureAlgorithm;

#[cfg(feature = "ecdsa-p256")]
pub use ecdsa::{P256Signer, P256Verifier};

#[cfg(feature = "ed25519")]
pub use ed25519::{Ed25519Signer, Ed25519Verifier};

/// Constant-time byte comparison.
///
/// Compares two byte slices in constant time to prevent timing attacks.
/// Returns `true` if the slices are equal, `false` otherwise.
///
/// The length check still returns early; lengths of signatures are public.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
