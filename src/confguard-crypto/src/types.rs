//! Algorithm identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Signature algorithm of a configuration issuer key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SignatureAlgorithm {
    /// ECDSA with NIST P-256 (secp256r1) over SHA-256.
    EcdsaP256 = 1,

    /// Ed25519 Edwards curve.
    Ed25519 = 2,
}

impl SignatureAlgorithm {
    /// OID for this algorithm (X.509/PKCS signature algorithm).
    #[must_use]
    pub const fn oid(&self) -> &'static str {
        match self {
            Self::EcdsaP256 => "1.2.840.10045.4.3.2", // ecdsa-with-SHA256
            Self::Ed25519 => "1.3.101.112",           // id-Ed25519
        }
    }

    /// Fixed-size signature length, where the encoding has one.
    ///
    /// P-256 signatures may also arrive DER-encoded, which is variable length.
    #[must_use]
    pub const fn raw_signature_size(&self) -> usize {
        match self {
            Self::EcdsaP256 => 64,
            Self::Ed25519 => 64,
        }
    }

    /// Short human-readable name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::EcdsaP256 => "ECDSA-P256-SHA256",
            Self::Ed25519 => "Ed25519",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
