//! Mock backend endpoints for bridge integration tests.
//!
//! - `spawn_ws_backend`: plain `ws://` backend on a loopback port
//! - `spawn_tls_backend`: `wss://` backend presenting a leaf + CA chain issued
//!   by a throwaway rcgen CA
//!
//! Each backend hands its first WebSocket connection to a [`BackendPeer`] so
//! tests can script frames in both directions. Dropping `to_bridge` closes the
//! backend side of the socket.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

static TRACING: Once = Once::new();

/// Install a fmt subscriber that writes through the test harness.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Test-side handle on the backend's WebSocket.
pub struct BackendPeer {
    /// Frames the backend sends to the bridge
    pub to_bridge: mpsc::UnboundedSender<Message>,
    /// Frames the bridge sent to the backend
    pub from_bridge: mpsc::UnboundedReceiver<Message>,
    /// TCP connections accepted so far, including harvest handshakes
    pub connections: Arc<AtomicU64>,
}

impl BackendPeer {
    /// Next non-control frame from the bridge.
    pub async fn recv(&mut self) -> Message {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.from_bridge.recv())
                .await
                .expect("timed out waiting for bridge frame")
                .expect("backend connection ended");
            if !matches!(msg, Message::Ping(_) | Message::Pong(_)) {
                return msg;
            }
        }
    }
}

type Slot = Arc<Mutex<Option<(mpsc::UnboundedReceiver<Message>, mpsc::UnboundedSender<Message>)>>>;

fn peer_and_slot() -> (BackendPeer, Slot) {
    let (to_bridge, outbound) = mpsc::unbounded_channel();
    let (inbound, from_bridge) = mpsc::unbounded_channel();
    let peer = BackendPeer {
        to_bridge,
        from_bridge,
        connections: Arc::new(AtomicU64::new(0)),
    };
    (peer, Arc::new(Mutex::new(Some((outbound, inbound)))))
}

/// Pump frames between one WebSocket and the test's channels.
async fn serve<S>(ws: WebSocketStream<S>, slot: Slot)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let taken = slot.lock().unwrap().take();
    let Some((mut outbound, inbound)) = taken else {
        return;
    };
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(msg) => {
                    if write.send(msg).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = write.close().await;
                    break;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(msg)) => {
                    let closing = msg.is_close();
                    let _ = inbound.send(msg);
                    if closing {
                        break;
                    }
                }
                _ => break,
            },
        }
    }
}

/// Plain WebSocket backend. Returns its `ws://` URL.
pub async fn spawn_ws_backend() -> (String, BackendPeer) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (peer, slot) = peer_and_slot();
    let connections = peer.connections.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            connections.fetch_add(1, Ordering::SeqCst);
            let slot = slot.clone();
            tokio::spawn(async move {
                if let Ok(ws) = accept_async(stream).await {
                    serve(ws, slot).await;
                }
            });
        }
    });

    (format!("ws://{addr}/call"), peer)
}

/// A local `wss://` backend and the CA that issued its certificate.
pub struct TlsBackend {
    pub addr: SocketAddr,
    pub ca_der: CertificateDer<'static>,
    pub leaf_der: CertificateDer<'static>,
    pub peer: BackendPeer,
}

impl TlsBackend {
    pub fn url(&self) -> String {
        format!("wss://{}/call", self.addr)
    }
}

/// TLS WebSocket backend whose certificate is issued for `hostname`.
pub async fn spawn_tls_backend(hostname: &str) -> TlsBackend {
    let mut ca_params = CertificateParams::new(Vec::<String>::new());
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "Bridge Test Root");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca = Certificate::from_params(ca_params).unwrap();
    let ca_der = CertificateDer::from(ca.serialize_der().unwrap());

    let mut leaf_params = CertificateParams::new(vec![hostname.to_string()]);
    leaf_params
        .distinguished_name
        .push(DnType::CommonName, hostname);
    let leaf = Certificate::from_params(leaf_params).unwrap();
    let leaf_der = CertificateDer::from(leaf.serialize_der_with_signer(&ca).unwrap());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf.serialize_private_key_der()));

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![leaf_der.clone(), ca_der.clone()], key)
    .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (peer, slot) = peer_and_slot();
    let connections = peer.connections.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            connections.fetch_add(1, Ordering::SeqCst);
            let acceptor = acceptor.clone();
            let slot = slot.clone();
            tokio::spawn(async move {
                // harvest handshakes and rejected handshakes end here
                let Ok(tls) = acceptor.accept(stream).await else {
                    return;
                };
                if let Ok(ws) = accept_async(tls).await {
                    serve(ws, slot).await;
                }
            });
        }
    });

    TlsBackend {
        addr,
        ca_der,
        leaf_der,
        peer,
    }
}
