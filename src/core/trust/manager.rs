use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use rustls::ClientConfig;
use rustls::client::danger::ServerCertVerifier;
use rustls::pki_types::{CertificateDer, ServerName};
use serde::{Deserialize, Serialize};

use super::harvest::{harvest_chain, load_bundle, store_bundle};
use super::verifier::{HandshakeObserver, InsecureVerifier, PinnedHostnameVerifier};
use super::{TrustError, TrustResult, crypto_provider};

/// Default hostname the backend's certificate must present.
pub const DEFAULT_EXPECTED_HOSTNAME: &str = "api.vapi.ai";

/// Default location of the persisted CA bundle.
pub const DEFAULT_CA_BUNDLE_PATH: &str = "certs/vapi-ca-bundle.pem";

/// Per-hostname locks so concurrent sessions harvest a chain once.
static HARVEST_LOCKS: Lazy<DashMap<String, Arc<tokio::sync::Mutex<()>>>> = Lazy::new(DashMap::new);

// =============================================================================
// Settings
// =============================================================================

/// Trust settings for dialing the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustSettings {
    /// Skip certificate validation entirely
    pub validation_disabled: bool,
    /// Hostname the backend certificate must present
    pub expected_hostname: String,
    /// Where the pinned bundle is read from and harvested into
    pub ca_bundle_path: PathBuf,
    /// Host to harvest from; defaults to `expected_hostname`
    pub harvest_host: Option<String>,
    pub harvest_port: u16,
    pub harvest_timeout_secs: u64,
    /// Fail instead of falling back to disabled validation
    pub strict: bool,
}

impl Default for TrustSettings {
    fn default() -> Self {
        Self {
            validation_disabled: false,
            expected_hostname: DEFAULT_EXPECTED_HOSTNAME.to_string(),
            ca_bundle_path: PathBuf::from(DEFAULT_CA_BUNDLE_PATH),
            harvest_host: None,
            harvest_port: 443,
            harvest_timeout_secs: 10,
            strict: false,
        }
    }
}

impl TrustSettings {
    /// Settings with validation switched off.
    pub fn disabled() -> Self {
        Self {
            validation_disabled: true,
            ..Default::default()
        }
    }

    pub fn harvest_host(&self) -> &str {
        self.harvest_host
            .as_deref()
            .unwrap_or(&self.expected_hostname)
    }
}

// =============================================================================
// Trust Configuration
// =============================================================================

/// Trust material used to dial the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum TrustConfiguration {
    /// No certificate validation
    Disabled,
    /// Validate against `ca_bundle` and pin the hostname
    Pinned {
        ca_bundle: Vec<CertificateDer<'static>>,
        expected_hostname: String,
    },
}

impl TrustConfiguration {
    pub fn is_pinned(&self) -> bool {
        matches!(self, TrustConfiguration::Pinned { .. })
    }

    pub fn mode(&self) -> &'static str {
        match self {
            TrustConfiguration::Disabled => "disabled",
            TrustConfiguration::Pinned { .. } => "pinned",
        }
    }

    /// TLS server name for a dial to `url_host`.
    ///
    /// Pinned mode always presents the expected hostname, whatever host the
    /// URL points at.
    pub fn server_name(&self, url_host: &str) -> TrustResult<ServerName<'static>> {
        let name = match self {
            TrustConfiguration::Disabled => url_host,
            TrustConfiguration::Pinned {
                expected_hostname, ..
            } => expected_hostname.as_str(),
        };
        ServerName::try_from(name.to_string())
            .map_err(|e| TrustError::Tls(format!("Invalid server name {name}: {e}")))
    }

    /// Build a rustls client config for this trust mode.
    pub fn client_config(&self, observer: Arc<HandshakeObserver>) -> TrustResult<Arc<ClientConfig>> {
        let provider = crypto_provider();
        let verifier: Arc<dyn ServerCertVerifier> = match self {
            TrustConfiguration::Disabled => {
                Arc::new(InsecureVerifier::new(provider.clone(), Some(observer)))
            }
            TrustConfiguration::Pinned {
                ca_bundle,
                expected_hostname,
            } => Arc::new(PinnedHostnameVerifier::new(
                ca_bundle,
                expected_hostname,
                provider.clone(),
                observer,
            )?),
        };

        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TrustError::Tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        Ok(Arc::new(config))
    }
}

/// Where a [`TrustConfiguration`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustSource {
    /// Validation disabled by settings
    Disabled,
    /// Bundle loaded from disk
    Stored,
    /// Bundle freshly harvested from the live server
    Harvested,
    /// Bundle unavailable, degraded to disabled validation
    Fallback,
}

/// Result of [`TrustManager::establish`].
#[derive(Debug, Clone)]
pub struct TrustResolution {
    pub configuration: TrustConfiguration,
    pub source: TrustSource,
}

// =============================================================================
// Trust Manager
// =============================================================================

/// Resolves the trust configuration for backend dials.
#[derive(Debug, Clone)]
pub struct TrustManager {
    settings: TrustSettings,
}

impl TrustManager {
    pub fn new(settings: TrustSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TrustSettings {
        &self.settings
    }

    /// Resolve trust: disabled, stored bundle, harvested bundle or fallback.
    ///
    /// Harvesting holds a process-wide lock for the expected hostname and
    /// re-reads the bundle once the lock is taken, so concurrent callers reuse
    /// a chain another caller just harvested.
    pub async fn establish(&self) -> TrustResult<TrustResolution> {
        if self.settings.validation_disabled {
            tracing::info!("TLS validation disabled; backend certificates are not verified");
            return Ok(TrustResolution {
                configuration: TrustConfiguration::Disabled,
                source: TrustSource::Disabled,
            });
        }

        if self.settings.expected_hostname.is_empty() {
            return Err(TrustError::Bundle("expected hostname is empty".into()));
        }

        match self.load_or_harvest().await {
            Ok((ca_bundle, source)) => Ok(TrustResolution {
                configuration: TrustConfiguration::Pinned {
                    ca_bundle,
                    expected_hostname: self.settings.expected_hostname.clone(),
                },
                source,
            }),
            Err(e) if !self.settings.strict => {
                tracing::warn!(
                    "Falling back to disabled TLS validation for {}: {}",
                    self.settings.expected_hostname,
                    e
                );
                Ok(TrustResolution {
                    configuration: TrustConfiguration::Disabled,
                    source: TrustSource::Fallback,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Convenience wrapper returning only the configuration.
    pub async fn configuration(&self) -> TrustResult<TrustConfiguration> {
        self.establish().await.map(|r| r.configuration)
    }

    async fn load_or_harvest(&self) -> TrustResult<(Vec<CertificateDer<'static>>, TrustSource)> {
        let path = &self.settings.ca_bundle_path;

        match load_bundle(path).await {
            Ok(Some(certs)) => return Ok((certs, TrustSource::Stored)),
            Ok(None) => tracing::info!("No CA bundle at {}", path.display()),
            Err(e) => tracing::warn!("Ignoring unusable CA bundle {}: {}", path.display(), e),
        }

        let lock = HARVEST_LOCKS
            .entry(self.settings.expected_hostname.to_ascii_lowercase())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        if let Ok(Some(certs)) = load_bundle(path).await {
            tracing::debug!("CA bundle appeared while waiting for harvest lock");
            return Ok((certs, TrustSource::Stored));
        }

        let chain = harvest_chain(
            self.settings.harvest_host(),
            self.settings.harvest_port,
            Duration::from_secs(self.settings.harvest_timeout_secs),
        )
        .await?;
        store_bundle(path, &chain).await?;

        Ok((chain, TrustSource::Harvested))
    }
}
