//! TLS trust for the backend connection.
//!
//! The bridge dials the backend either with validation disabled or with a
//! pinned CA bundle plus an expected hostname. The bundle is read from disk
//! or, when missing, harvested from the live server's presented chain.
//!
//! # Modules
//! - `manager`: settings and resolution of the trust configuration
//! - `verifier`: rustls verifiers and the hostname pin
//! - `harvest`: chain harvesting and PEM bundle storage

pub mod harvest;
mod manager;
pub mod verifier;

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use thiserror::Error;

pub use manager::{
    DEFAULT_CA_BUNDLE_PATH, DEFAULT_EXPECTED_HOSTNAME, TrustConfiguration, TrustManager,
    TrustResolution, TrustSettings, TrustSource,
};
pub use verifier::{HandshakeCounts, HandshakeObserver, HostnamePin};

/// Errors raised while establishing trust.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrustError {
    /// Negotiated or certified hostname differs from the pinned one
    #[error("Hostname pinning failed: expected {expected}, got {actual}")]
    HostnameMismatch { expected: String, actual: String },

    /// Chain could not be harvested
    #[error("Certificate harvest failed: {0}")]
    Harvest(String),

    /// Stored bundle is missing certificates or malformed
    #[error("Invalid CA bundle: {0}")]
    Bundle(String),

    /// Bundle file I/O failed
    #[error("Bundle I/O error: {0}")]
    Io(String),

    /// rustls configuration or certificate parsing failed
    #[error("TLS error: {0}")]
    Tls(String),
}

/// Result type for trust operations.
pub type TrustResult<T> = Result<T, TrustError>;

pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}
