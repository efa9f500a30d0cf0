//! Certificate chain harvesting and PEM bundle storage.
//!
//! Harvesting opens a single unverified TLS connection to the backend host,
//! takes the presented chain, orders it leaf → root by following issuer names
//! and persists it as concatenated PEM blocks.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustls::ClientConfig;
use rustls::pki_types::{CertificateDer, ServerName};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::*;

use super::verifier::InsecureVerifier;
use super::{TrustError, TrustResult, crypto_provider};

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";
const PEM_LINE_WIDTH: usize = 64;

/// Fetch the certificate chain presented by `host:port`, ordered leaf first.
pub async fn harvest_chain(
    host: &str,
    port: u16,
    timeout: Duration,
) -> TrustResult<Vec<CertificateDer<'static>>> {
    tracing::info!("Harvesting certificate chain from {}:{}", host, port);

    let presented = tokio::time::timeout(timeout, fetch_presented_chain(host, port))
        .await
        .map_err(|_| {
            TrustError::Harvest(format!(
                "timed out after {}s contacting {host}:{port}",
                timeout.as_secs()
            ))
        })??;

    let chain = order_chain(&presented)?;
    tracing::info!(
        "Harvested {} certificate(s) from {} ({} presented)",
        chain.len(),
        host,
        presented.len()
    );
    Ok(chain)
}

async fn fetch_presented_chain(host: &str, port: u16) -> TrustResult<Vec<CertificateDer<'static>>> {
    let provider = crypto_provider();
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| TrustError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier::new(provider, None)))
        .with_no_client_auth();

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| TrustError::Harvest(format!("Invalid host {host}: {e}")))?;

    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| TrustError::Harvest(format!("Failed to connect to {host}:{port}: {e}")))?;

    let tls = TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await
        .map_err(|e| TrustError::Harvest(format!("TLS handshake with {host} failed: {e}")))?;

    let (_, connection) = tls.get_ref();
    let presented = connection
        .peer_certificates()
        .map(|certs| certs.to_vec())
        .unwrap_or_default();

    if presented.is_empty() {
        return Err(TrustError::Harvest(format!(
            "{host} presented no certificates"
        )));
    }
    Ok(presented)
}

/// Order a presented chain leaf → root.
///
/// Starts at the first certificate and repeatedly follows the issuer name to
/// the certificate whose subject matches, stopping at a self-signed
/// certificate or when no issuer is present. Certificates not on that path
/// are dropped.
pub fn order_chain(presented: &[CertificateDer<'static>]) -> TrustResult<Vec<CertificateDer<'static>>> {
    let mut names = Vec::with_capacity(presented.len());
    for cert in presented {
        let (_, parsed) = parse_x509_certificate(cert.as_ref())
            .map_err(|e| TrustError::Harvest(format!("Unparseable certificate: {e}")))?;
        names.push((
            parsed.subject().as_raw().to_vec(),
            parsed.issuer().as_raw().to_vec(),
        ));
    }

    Ok(walk_issuers(&names)
        .into_iter()
        .map(|i| presented[i].clone())
        .collect())
}

/// Index path through `(subject, issuer)` pairs, starting at index 0.
pub(crate) fn walk_issuers<N: PartialEq>(names: &[(N, N)]) -> Vec<usize> {
    let mut path = Vec::new();
    if names.is_empty() {
        return path;
    }

    let mut current = 0;
    path.push(current);
    while path.len() < names.len() {
        let (subject, issuer) = &names[current];
        if subject == issuer {
            break;
        }
        match names
            .iter()
            .enumerate()
            .find(|(i, (candidate, _))| candidate == issuer && !path.contains(i))
        {
            Some((next, _)) => {
                path.push(next);
                current = next;
            }
            None => break,
        }
    }
    path
}

// =============================================================================
// PEM Bundle I/O
// =============================================================================

/// Encode certificates as concatenated PEM blocks with 64-column lines.
pub fn encode_pem_bundle(certs: &[CertificateDer<'_>]) -> String {
    let mut out = String::new();
    for cert in certs {
        let b64 = STANDARD.encode(cert.as_ref());
        out.push_str(PEM_BEGIN);
        out.push('\n');
        for line in b64.as_bytes().chunks(PEM_LINE_WIDTH) {
            // base64 output is ASCII
            out.push_str(std::str::from_utf8(line).unwrap_or_default());
            out.push('\n');
        }
        out.push_str(PEM_END);
        out.push('\n');
    }
    out
}

/// Parse every certificate in a PEM bundle.
pub fn parse_pem_bundle(pem: &[u8]) -> TrustResult<Vec<CertificateDer<'static>>> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TrustError::Bundle(format!("Malformed PEM: {e}")))?;

    if certs.is_empty() {
        return Err(TrustError::Bundle("no certificates in bundle".into()));
    }
    Ok(certs)
}

/// Load a persisted bundle. A missing file is `Ok(None)`.
pub async fn load_bundle(path: &Path) -> TrustResult<Option<Vec<CertificateDer<'static>>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => parse_pem_bundle(&bytes).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TrustError::Io(e.to_string())),
    }
}

/// Write a bundle, creating parent directories as needed.
pub async fn store_bundle(path: &Path, certs: &[CertificateDer<'_>]) -> TrustResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TrustError::Io(e.to_string()))?;
    }
    tokio::fs::write(path, encode_pem_bundle(certs))
        .await
        .map_err(|e| TrustError::Io(e.to_string()))?;

    tracing::info!(
        "Stored {} certificate(s) in {}",
        certs.len(),
        path.display()
    );
    Ok(())
}
