//! Central configuration service client.
//!
//! The loader only depends on [`CentralRepository`]; [`HttpsCentralClient`]
//! is the production transport.
//!
//! ## Endpoints
//!
//! - `GET {base}/config.json` - configuration document
//! - `GET {base}/config.pub` - issuer public key (PEM)
//! - `GET {base}/config.sig` - detached signature

use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Proxy};
use tracing::{debug, info, instrument, warn};

use crate::artifacts::{ArtifactSource, ArtifactTriple};
use crate::error::ConfigError;

/// Remote document path.
pub const CENTRAL_DOCUMENT_PATH: &str = "config.json";
/// Remote public key path.
pub const CENTRAL_PUBLIC_KEY_PATH: &str = "config.pub";
/// Remote signature path.
pub const CENTRAL_SIGNATURE_PATH: &str = "config.sig";

/// Proxy selection for the central client.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum ProxySettings {
    /// Connect directly, ignoring environment proxy variables.
    NoProxy,
    /// Use the proxy from the environment (`HTTPS_PROXY`, ...).
    #[default]
    System,
    /// Explicit HTTP proxy.
    Manual {
        /// Proxy host.
        host: String,
        /// Proxy port.
        port: u16,
        /// Optional basic-auth user.
        username: Option<String>,
        /// Optional basic-auth password.
        password: Option<String>,
    },
}

impl fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProxy => f.write_str("NoProxy"),
            Self::System => f.write_str("System"),
            Self::Manual {
                host,
                port,
                username,
                password,
            } => f
                .debug_struct("Manual")
                .field("host", host)
                .field("port", port)
                .field("username", username)
                .field("password", &password.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Source of central artifacts.
///
/// Every error is treated by the loader as "update unavailable".
#[async_trait]
pub trait CentralRepository: Send + Sync {
    /// Fetch the configuration document text.
    async fn fetch_configuration(&self) -> Result<String, ConfigError>;

    /// Fetch the detached signature (raw bytes or base64 text).
    async fn fetch_signature(&self) -> Result<Vec<u8>, ConfigError>;

    /// Fetch the issuer public key PEM.
    async fn fetch_public_key(&self) -> Result<String, ConfigError>;

    /// Apply proxy settings to subsequent requests.
    fn configure_proxy(&self, settings: &ProxySettings) -> Result<(), ConfigError>;
}

/// HTTPS implementation of [`CentralRepository`].
pub struct HttpsCentralClient {
    /// Rebuilt whenever proxy settings change.
    client: RwLock<Client>,
    /// Base URL, no trailing slash.
    base_url: String,
    /// Per-request timeout.
    timeout: Duration,
}

impl HttpsCentralClient {
    /// Create a client for `base_url` using environment proxy settings.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let client = build_client(timeout, &ProxySettings::System)?;
        Ok(Self {
            client: RwLock::new(client),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Base URL requests are made against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn client(&self) -> Result<Client, ConfigError> {
        self.client
            .read()
            .map(|c| c.clone())
            .map_err(|_| ConfigError::HttpsError {
                message: "HTTP client lock poisoned".into(),
            })
    }

    #[instrument(skip(self), fields(base = %self.base_url))]
    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, ConfigError> {
        let url = self.url(path);
        debug!(url = %url, "Central: GET");

        let response = self.client()?.get(&url).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Central: request failed");
            ConfigError::HttpsError {
                message: format!("Request to {} failed: {}", url, e),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Central: non-success status");
            return Err(ConfigError::HttpsError {
                message: format!("HTTP {} from {}", status, url),
            });
        }

        let body = response.bytes().await.map_err(|e| ConfigError::HttpsError {
            message: format!("Failed to read body from {}: {}", url, e),
        })?;

        debug!(url = %url, len = body.len(), "Central: response received");
        Ok(body.to_vec())
    }

    async fn get_text(&self, path: &str) -> Result<String, ConfigError> {
        let bytes = self.get_bytes(path).await?;
        String::from_utf8(bytes).map_err(|e| ConfigError::HttpsError {
            message: format!("{} is not UTF-8: {}", self.url(path), e),
        })
    }
}

#[async_trait]
impl CentralRepository for HttpsCentralClient {
    async fn fetch_configuration(&self) -> Result<String, ConfigError> {
        self.get_text(CENTRAL_DOCUMENT_PATH).await
    }

    async fn fetch_signature(&self) -> Result<Vec<u8>, ConfigError> {
        self.get_bytes(CENTRAL_SIGNATURE_PATH).await
    }

    async fn fetch_public_key(&self) -> Result<String, ConfigError> {
        self.get_text(CENTRAL_PUBLIC_KEY_PATH).await
    }

    fn configure_proxy(&self, settings: &ProxySettings) -> Result<(), ConfigError> {
        let client = build_client(self.timeout, settings)?;
        let mut guard = self.client.write().map_err(|_| ConfigError::HttpsError {
            message: "HTTP client lock poisoned".into(),
        })?;
        *guard = client;
        info!(proxy = ?settings, "Central: proxy settings applied");
        Ok(())
    }
}

/// Fetch the full remote triple. The result is unverified.
pub async fn fetch_triple(repo: &dyn CentralRepository) -> Result<ArtifactTriple, ConfigError> {
    let signature = repo.fetch_signature().await?;
    let document = repo.fetch_configuration().await?;
    let public_key = repo.fetch_public_key().await?;
    Ok(ArtifactTriple::new(
        document.into_bytes(),
        public_key,
        signature,
        ArtifactSource::Central,
    ))
}

fn build_client(timeout: Duration, proxy: &ProxySettings) -> Result<Client, ConfigError> {
    let builder = ClientBuilder::new()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5)) // Quick fail on unreachable hosts
        .user_agent(format!("confguard/{}", env!("CARGO_PKG_VERSION")));

    let builder = match proxy {
        ProxySettings::NoProxy => builder.no_proxy(),
        ProxySettings::System => builder,
        ProxySettings::Manual {
            host,
            port,
            username,
            password,
        } => {
            let mut p = Proxy::all(format!("http://{}:{}", host, port)).map_err(|e| {
                ConfigError::HttpsError {
                    message: format!("Invalid proxy {}:{}: {}", host, port, e),
                }
            })?;
            if let Some(user) = username {
                p = p.basic_auth(user, password.as_deref().unwrap_or(""));
            }
            builder.proxy(p)
        },
    };

    builder.build().map_err(|e| ConfigError::HttpsError {
        message: format!("Failed to create HTTP client: {}", e),
    })
}
