//! The document / public key / signature triple and where it came from.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Origin of an artifact triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactSource {
    /// Shipped inside the application package.
    Default,
    /// Local cache directory.
    Cache,
    /// Fetched from the central configuration service.
    Central,
}

impl fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::Cache => "cache",
            Self::Central => "central",
        })
    }
}

/// An untrusted triple as read from disk or the network.
#[derive(Clone, PartialEq, Eq)]
pub struct ArtifactTriple {
    /// Configuration document bytes (JSON text).
    pub document: Vec<u8>,
    /// Issuer public key, SPKI PEM.
    pub public_key: String,
    /// Detached signature, raw bytes or base64 text.
    pub signature: Vec<u8>,
    /// Where the triple came from.
    pub source: ArtifactSource,
}

impl ArtifactTriple {
    /// Create a triple.
    pub fn new(
        document: impl Into<Vec<u8>>,
        public_key: impl Into<String>,
        signature: impl Into<Vec<u8>>,
        source: ArtifactSource,
    ) -> Self {
        Self {
            document: document.into(),
            public_key: public_key.into(),
            signature: signature.into(),
            source,
        }
    }
}

impl fmt::Debug for ArtifactTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactTriple")
            .field("source", &self.source)
            .field("document_len", &self.document.len())
            .field("document_sha256", &hex::encode(Sha256::digest(&self.document)))
            .field("signature_len", &self.signature.len())
            .finish()
    }
}

/// A triple whose signature has been checked.
///
/// Only [`SignatureVerifier`](crate::verifier::SignatureVerifier) constructs
/// this type; publishing and committing require it.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifiedTriple {
    triple: ArtifactTriple,
    normalized_signature: Vec<u8>,
}

impl VerifiedTriple {
    pub(crate) fn new(triple: ArtifactTriple, normalized_signature: Vec<u8>) -> Self {
        Self {
            triple,
            normalized_signature,
        }
    }

    /// Document bytes exactly as signed.
    pub fn document(&self) -> &[u8] {
        &self.triple.document
    }

    /// Issuer public key PEM.
    pub fn public_key(&self) -> &str {
        &self.triple.public_key
    }

    /// Signature exactly as it was stored or served.
    pub fn signature(&self) -> &[u8] {
        &self.triple.signature
    }

    /// Signature after base64 detection; what the comparison probe uses.
    pub fn normalized_signature(&self) -> &[u8] {
        &self.normalized_signature
    }

    /// Origin of the triple.
    pub fn source(&self) -> ArtifactSource {
        self.triple.source
    }

    /// Borrow the underlying triple.
    pub fn as_triple(&self) -> &ArtifactTriple {
        &self.triple
    }
}

impl fmt::Debug for VerifiedTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VerifiedTriple").field(&self.triple).finish()
    }
}
