//! rustls certificate verifiers used when dialing the backend.
//!
//! - [`PinnedHostnameVerifier`]: pins the negotiated hostname to an expected
//!   value, then runs full WebPKI validation against the pinned bundle.
//! - [`InsecureVerifier`]: accepts any chain. Used when validation is disabled
//!   and for the one-off harvesting handshake.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::Serialize;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

use super::{TrustError, TrustResult};

// =============================================================================
// Handshake Observer
// =============================================================================

/// Counts TLS handshake outcomes for one session.
#[derive(Debug, Default)]
pub struct HandshakeObserver {
    successes: AtomicU64,
    failures: AtomicU64,
    pinning_failures: AtomicU64,
    certificate_failures: AtomicU64,
    insecure_handshakes: AtomicU64,
}

/// Point-in-time copy of [`HandshakeObserver`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeCounts {
    pub successes: u64,
    pub failures: u64,
    pub pinning_failures: u64,
    pub certificate_failures: u64,
    pub insecure_handshakes: u64,
}

impl HandshakeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pinning_failure(&self) {
        self.pinning_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_certificate_failure(&self) {
        self.certificate_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insecure(&self) {
        self.insecure_handshakes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counts(&self) -> HandshakeCounts {
        HandshakeCounts {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            pinning_failures: self.pinning_failures.load(Ordering::Relaxed),
            certificate_failures: self.certificate_failures.load(Ordering::Relaxed),
            insecure_handshakes: self.insecure_handshakes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Hostname Pinning
// =============================================================================

/// Hostname every pinned TLS connection must present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostnamePin {
    expected: String,
}

impl HostnamePin {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }

    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// Check that `hostname` is the pinned hostname and that `cert` names it.
    ///
    /// Comparison is ASCII case-insensitive. A certificate that carries no DNS
    /// names at all is only checked against the hostname.
    pub fn check_server_identity(
        &self,
        hostname: &str,
        cert: &CertificateDer<'_>,
    ) -> TrustResult<()> {
        if !hostname.eq_ignore_ascii_case(&self.expected) {
            return Err(TrustError::HostnameMismatch {
                expected: self.expected.clone(),
                actual: hostname.to_string(),
            });
        }

        let names = certificate_dns_names(cert)?;
        if names.is_empty() || names.iter().any(|n| dns_name_matches(n, &self.expected)) {
            Ok(())
        } else {
            Err(TrustError::HostnameMismatch {
                expected: self.expected.clone(),
                actual: names.join(", "),
            })
        }
    }
}

/// DNS names from the SAN extension, or the subject CNs when there is none.
pub fn certificate_dns_names(cert: &CertificateDer<'_>) -> TrustResult<Vec<String>> {
    let (_, parsed) = parse_x509_certificate(cert.as_ref())
        .map_err(|e| TrustError::Tls(format!("Failed to parse certificate: {e}")))?;

    let mut names = Vec::new();
    if let Ok(Some(san)) = parsed.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                names.push(dns.to_string());
            }
        }
    }

    if names.is_empty() {
        names.extend(
            parsed
                .subject()
                .iter_common_name()
                .filter_map(|cn| cn.as_str().ok())
                .map(str::to_string),
        );
    }

    Ok(names)
}

/// Match a certificate name against a hostname; `*.` covers exactly one label.
pub fn dns_name_matches(pattern: &str, hostname: &str) -> bool {
    let pattern = pattern.trim_end_matches('.');
    let hostname = hostname.trim_end_matches('.');

    match pattern.strip_prefix("*.") {
        Some(suffix) => hostname
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest.eq_ignore_ascii_case(suffix)),
        None => pattern.eq_ignore_ascii_case(hostname),
    }
}

pub(crate) fn server_name_str(name: &ServerName<'_>) -> String {
    match name {
        ServerName::DnsName(dns) => dns.as_ref().to_string(),
        ServerName::IpAddress(ip) => IpAddr::from(*ip).to_string(),
        _ => String::new(),
    }
}

// =============================================================================
// Pinned Verifier
// =============================================================================

/// Verifier for pinned mode.
///
/// The hostname pin runs first and fails with `NotValidForName`, counted as a
/// pinning failure. Chain validation against the pinned bundle follows and
/// its failures are counted separately.
#[derive(Debug)]
pub struct PinnedHostnameVerifier {
    pin: HostnamePin,
    inner: Arc<WebPkiServerVerifier>,
    provider: Arc<CryptoProvider>,
    observer: Arc<HandshakeObserver>,
}

impl PinnedHostnameVerifier {
    pub fn new(
        ca_bundle: &[CertificateDer<'static>],
        expected_hostname: &str,
        provider: Arc<CryptoProvider>,
        observer: Arc<HandshakeObserver>,
    ) -> TrustResult<Self> {
        let mut roots = RootCertStore::empty();
        for cert in ca_bundle {
            roots
                .add(cert.clone())
                .map_err(|e| TrustError::Bundle(format!("Rejected bundle certificate: {e}")))?;
        }
        if roots.is_empty() {
            return Err(TrustError::Bundle("bundle contains no certificates".into()));
        }

        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .map_err(|e| TrustError::Tls(e.to_string()))?;

        Ok(Self {
            pin: HostnamePin::new(expected_hostname),
            inner,
            provider,
            observer,
        })
    }
}

impl ServerCertVerifier for PinnedHostnameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let negotiated = server_name_str(server_name);
        if let Err(e) = self.pin.check_server_identity(&negotiated, end_entity) {
            tracing::warn!("Hostname pinning failed: {}", e);
            self.observer.record_pinning_failure();
            return Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName,
            ));
        }

        let pinned = ServerName::try_from(self.pin.expected().to_string())
            .map_err(|e| rustls::Error::General(format!("Invalid pinned hostname: {e}")))?;

        self.inner
            .verify_server_cert(end_entity, intermediates, &pinned, ocsp_response, now)
            .inspect_err(|e| {
                tracing::warn!("Certificate validation failed: {}", e);
                self.observer.record_certificate_failure();
            })
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// =============================================================================
// Insecure Verifier
// =============================================================================

/// Accepts any certificate chain. Handshake signatures are still checked.
#[derive(Debug)]
pub struct InsecureVerifier {
    provider: Arc<CryptoProvider>,
    observer: Option<Arc<HandshakeObserver>>,
}

impl InsecureVerifier {
    pub fn new(provider: Arc<CryptoProvider>, observer: Option<Arc<HandshakeObserver>>) -> Self {
        Self { provider, observer }
    }
}

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let Some(observer) = &self.observer {
            observer.record_insecure();
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
