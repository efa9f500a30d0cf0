//! Backend TLS trust against a local `wss://` server
//!
//! Each test uses its own expected hostname so the process-wide harvest locks
//! never couple tests together.

mod mock_endpoints;

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use mock_endpoints::{TlsBackend, init_tracing, spawn_tls_backend, spawn_ws_backend};
use vapi_exotel_bridge::config::BridgeConfig;
use vapi_exotel_bridge::core::trust::harvest::{encode_pem_bundle, parse_pem_bundle};
use vapi_exotel_bridge::core::trust::{TrustManager, TrustSettings, TrustSource};
use vapi_exotel_bridge::{BridgeError, BridgeSession, SessionState, TrustError};

fn pinned_config(expected_hostname: &str, bundle: PathBuf, backend: &TlsBackend) -> BridgeConfig {
    let mut config = BridgeConfig {
        trust: TrustSettings {
            validation_disabled: false,
            expected_hostname: expected_hostname.to_string(),
            ca_bundle_path: bundle,
            harvest_host: Some("127.0.0.1".to_string()),
            harvest_port: backend.addr.port(),
            harvest_timeout_secs: 5,
            strict: true,
        },
        ..Default::default()
    };
    config.session.heartbeat_interval_secs = 0;
    config.session.connect_timeout_ms = 5000;
    config
}

#[tokio::test]
async fn test_pinned_bundle_accepts_matching_server() {
    init_tracing();
    let mut backend = spawn_tls_backend("pinned.bridge.test").await;
    let dir = TempDir::new().unwrap();
    let bundle = dir.path().join("ca.pem");
    std::fs::write(&bundle, encode_pem_bundle(&[backend.ca_der.clone()])).unwrap();

    let session = BridgeSession::new(&pinned_config("pinned.bridge.test", bundle, &backend));
    assert_ok!(session.connect(&backend.url(), "CALL-TLS").await);

    let trust = session.trust_configuration().unwrap();
    assert!(trust.is_pinned());

    let tls = session.stats().tls;
    assert_eq!(tls.successes, 1);
    assert_eq!(tls.pinning_failures, 0);

    assert_ok!(session.disconnect().await);
    assert!(backend.peer.recv().await.is_close());
}

#[tokio::test]
async fn test_pinned_hostname_mismatch_is_rejected() {
    init_tracing();
    let backend = spawn_tls_backend("real.bridge.test").await;
    let dir = TempDir::new().unwrap();
    let bundle = dir.path().join("ca.pem");
    std::fs::write(&bundle, encode_pem_bundle(&[backend.ca_der.clone()])).unwrap();

    let session = BridgeSession::new(&pinned_config("expected.bridge.test", bundle, &backend));
    let err = assert_err!(session.connect(&backend.url(), "CALL-MISMATCH").await);

    match err {
        BridgeError::Trust(TrustError::HostnameMismatch { expected, .. }) => {
            assert_eq!(expected, "expected.bridge.test");
        }
        other => panic!("Expected hostname mismatch, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Closed);

    let stats = session.stats();
    assert_eq!(stats.tls.pinning_failures, 1);
    assert_eq!(stats.tls.successes, 0);
    assert_eq!(stats.connection_failures, 1);
}

#[tokio::test]
async fn test_missing_bundle_is_harvested_and_stored() {
    init_tracing();
    let backend = spawn_tls_backend("harvest.bridge.test").await;
    let dir = TempDir::new().unwrap();
    let bundle = dir.path().join("nested").join("ca.pem");

    let session = BridgeSession::new(&pinned_config(
        "harvest.bridge.test",
        bundle.clone(),
        &backend,
    ));
    assert_ok!(session.connect(&backend.url(), "CALL-HARVEST").await);
    assert!(session.trust_configuration().unwrap().is_pinned());

    // leaf first, CA last
    let stored = parse_pem_bundle(&std::fs::read(&bundle).unwrap()).unwrap();
    assert_eq!(stored, vec![backend.leaf_der.clone(), backend.ca_der.clone()]);

    // a second manager reuses the stored bundle
    let manager = TrustManager::new(pinned_config("harvest.bridge.test", bundle, &backend).trust);
    let resolution = manager.establish().await.unwrap();
    assert_eq!(resolution.source, TrustSource::Stored);
}

#[tokio::test]
async fn test_harvest_failure_falls_back_unless_strict() {
    init_tracing();
    let (url, mut peer) = spawn_ws_backend().await;
    let dir = TempDir::new().unwrap();

    let mut config = BridgeConfig::default();
    config.session.heartbeat_interval_secs = 0;
    config.trust = TrustSettings {
        expected_hostname: "fallback.bridge.test".to_string(),
        ca_bundle_path: dir.path().join("absent.pem"),
        harvest_host: Some("127.0.0.1".to_string()),
        harvest_port: 1,
        harvest_timeout_secs: 1,
        ..Default::default()
    };

    let session = BridgeSession::new(&config);
    assert_ok!(session.connect(&url, "CALL-FALLBACK").await);
    assert!(!session.trust_configuration().unwrap().is_pinned());
    assert_eq!(session.stats().trust_fallbacks, 1);

    config.trust.strict = true;
    let strict = BridgeSession::new(&config);
    let err = assert_err!(strict.connect(&url, "CALL-STRICT").await);
    assert!(matches!(err, BridgeError::Trust(TrustError::Harvest(_))));
    assert_eq!(strict.state(), SessionState::Closed);
    assert_eq!(strict.stats().trust_fallbacks, 0);

    assert_ok!(session.disconnect().await);
    assert!(peer.recv().await.is_close());
}

#[tokio::test]
async fn test_concurrent_managers_harvest_once() {
    init_tracing();
    let backend = spawn_tls_backend("shared.bridge.test").await;
    let dir = TempDir::new().unwrap();
    let settings = pinned_config(
        "shared.bridge.test",
        dir.path().join("shared.pem"),
        &backend,
    )
    .trust;

    let managers: Vec<TrustManager> = (0..3).map(|_| TrustManager::new(settings.clone())).collect();
    let (a, b, c) = tokio::join!(
        managers[0].establish(),
        managers[1].establish(),
        managers[2].establish()
    );
    let sources: Vec<TrustSource> = [a, b, c]
        .into_iter()
        .map(|resolution| resolution.unwrap().source)
        .collect();

    let harvested = sources.iter().filter(|s| **s == TrustSource::Harvested).count();
    let stored = sources.iter().filter(|s| **s == TrustSource::Stored).count();
    assert_eq!((harvested, stored), (1, 2), "sources: {sources:?}");

    // only the harvesting manager touched the network
    assert_eq!(backend.peer.connections.load(Ordering::SeqCst), 1);
}
