//! The verified configuration document.
//!
//! Only the `META-INF` block is interpreted; service endpoint fields are
//! carried through opaquely for downstream consumers.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifacts::{ArtifactSource, VerifiedTriple};
use crate::error::ConfigError;

/// `META-INF.DATE` format.
const ISSUED_AT_FORMAT: &str = "%Y%m%d%H%M%SZ";

/// Versioning metadata of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentMeta {
    /// Issuing service URL, if stated.
    pub url: Option<String>,
    /// When the central service issued this document.
    pub issued_at: DateTime<Utc>,
    /// Monotonically increasing version serial.
    pub serial: u64,
    /// Schema version.
    pub version: u32,
}

/// Service endpoints carried by the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    /// Trust service status list URL.
    #[serde(rename = "TSL-URL", default)]
    pub tsl_url: Option<String>,
    /// Certificates trusted for the status list signature.
    #[serde(rename = "TSL-CERTS", default)]
    pub tsl_certs: Vec<String>,
    /// Timestamp authority URL.
    #[serde(rename = "TSA-URL", default)]
    pub tsa_url: Option<String>,
    /// Issuer common name to OCSP responder URL.
    #[serde(rename = "OCSP-URL-ISSUER", default)]
    pub ocsp_url_issuer: BTreeMap<String, String>,
    /// Directory lookup for natural persons.
    #[serde(rename = "LDAP-PERSON-URL", default)]
    pub ldap_person_url: Option<String>,
    /// Directory lookup for legal persons.
    #[serde(rename = "LDAP-CORP-URL", default)]
    pub ldap_corp_url: Option<String>,
    /// Mobile signing proxy.
    #[serde(rename = "MID-PROXY-URL", default)]
    pub mid_proxy_url: Option<String>,
    /// Mobile signing service.
    #[serde(rename = "MID-SK-URL", default)]
    pub mid_sk_url: Option<String>,
    /// Smart signing proxy.
    #[serde(rename = "SIDV2-PROXY-URL", default)]
    pub sid_proxy_url: Option<String>,
    /// Smart signing service.
    #[serde(rename = "SIDV2-SK-URL", default)]
    pub sid_sk_url: Option<String>,
    /// Certificate bundle for TLS pinning of the services above.
    #[serde(rename = "CERT-BUNDLE", default)]
    pub cert_bundle: Vec<String>,
}

#[derive(Deserialize)]
struct WireMeta {
    #[serde(rename = "URL", default)]
    url: Option<String>,
    #[serde(rename = "DATE")]
    date: String,
    #[serde(rename = "SERIAL")]
    serial: u64,
    #[serde(rename = "VER", default)]
    version: u32,
}

#[derive(Deserialize)]
struct WireDocument {
    #[serde(rename = "META-INF")]
    meta: WireMeta,
    #[serde(flatten)]
    endpoints: ServiceEndpoints,
}

/// Parse only the metadata block of document bytes.
///
/// # Errors
///
/// `InvalidDocument` if the JSON or the `META-INF` block is malformed.
pub fn parse_meta(bytes: &[u8]) -> Result<DocumentMeta, ConfigError> {
    parse_wire(bytes).map(|(meta, _)| meta)
}

fn parse_wire(bytes: &[u8]) -> Result<(DocumentMeta, ServiceEndpoints), ConfigError> {
    let wire: WireDocument =
        serde_json::from_slice(bytes).map_err(|e| ConfigError::InvalidDocument {
            reason: e.to_string(),
        })?;

    let issued_at = NaiveDateTime::parse_from_str(wire.meta.date.trim(), ISSUED_AT_FORMAT)
        .map_err(|e| ConfigError::InvalidDocument {
            reason: format!("META-INF.DATE {:?}: {}", wire.meta.date, e),
        })?
        .and_utc();

    Ok((
        DocumentMeta {
            url: wire.meta.url,
            issued_at,
            serial: wire.meta.serial,
            version: wire.meta.version,
        },
        wire.endpoints,
    ))
}

/// A verified, immutable configuration document.
#[derive(Debug, Clone)]
pub struct ConfigurationDocument {
    meta: DocumentMeta,
    endpoints: ServiceEndpoints,
    last_checked_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
    artifacts: Arc<VerifiedTriple>,
}

impl ConfigurationDocument {
    /// Build a document from a verified triple.
    ///
    /// # Errors
    ///
    /// `InvalidDocument` if the verified bytes are not a configuration.
    pub fn from_verified(
        artifacts: VerifiedTriple,
        last_checked_at: DateTime<Utc>,
        last_updated_at: DateTime<Utc>,
    ) -> Result<Self, ConfigError> {
        let (meta, endpoints) = parse_wire(artifacts.document())?;
        Ok(Self {
            meta,
            endpoints,
            last_checked_at,
            last_updated_at,
            artifacts: Arc::new(artifacts),
        })
    }

    /// A copy with refreshed engine timestamps; the verified payload is shared.
    #[must_use]
    pub fn with_timestamps(
        &self,
        last_checked_at: DateTime<Utc>,
        last_updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            last_checked_at,
            last_updated_at,
            ..self.clone()
        }
    }

    /// Versioning metadata.
    pub fn meta(&self) -> &DocumentMeta {
        &self.meta
    }

    /// Version serial.
    pub fn serial(&self) -> u64 {
        self.meta.serial
    }

    /// Issue time stated by the document.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.meta.issued_at
    }

    /// Service endpoint fields.
    pub fn endpoints(&self) -> &ServiceEndpoints {
        &self.endpoints
    }

    /// When the engine last asked the central service about this document.
    pub fn last_checked_at(&self) -> DateTime<Utc> {
        self.last_checked_at
    }

    /// When the engine last accepted a new document.
    pub fn last_updated_at(&self) -> DateTime<Utc> {
        self.last_updated_at
    }

    /// Where the verified bytes were loaded from.
    pub fn source(&self) -> ArtifactSource {
        self.artifacts.source()
    }

    /// The verified triple backing this document.
    pub fn artifacts(&self) -> &VerifiedTriple {
        &self.artifacts
    }

    /// Raw document bytes as signed.
    pub fn raw(&self) -> &[u8] {
        self.artifacts.document()
    }
}

/// Serializable view used by the CLI's JSON output.
#[derive(Debug, Serialize)]
pub struct DocumentSummary<'a> {
    /// Metadata block.
    pub meta: &'a DocumentMeta,
    /// Source of the bytes.
    pub source: ArtifactSource,
    /// Last check time.
    pub last_checked_at: DateTime<Utc>,
    /// Last update time.
    pub last_updated_at: DateTime<Utc>,
    /// Endpoint fields.
    pub endpoints: &'a ServiceEndpoints,
}

impl<'a> From<&'a ConfigurationDocument> for DocumentSummary<'a> {
    fn from(doc: &'a ConfigurationDocument) -> Self {
        Self {
            meta: &doc.meta,
            source: doc.source(),
            last_checked_at: doc.last_checked_at,
            last_updated_at: doc.last_updated_at,
            endpoints: &doc.endpoints,
        }
    }
}
