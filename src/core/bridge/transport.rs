//! Socket abstraction for both sides of the bridge.
//!
//! A [`Transport`] is a pinned frame sink plus a frame stream. The session
//! never touches a socket type directly, so the same relay runs over
//! tokio-tungstenite client streams, axum server sockets and in-memory pairs.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage, WebSocket};
use bytes::Bytes;
use futures::channel::mpsc as fmpsc;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use super::base::{BridgeError, BridgeResult};
use crate::core::trust::{HandshakeObserver, TrustConfiguration, TrustError};

/// Normal closure code.
pub const CLOSE_NORMAL: u16 = 1000;

// =============================================================================
// Frames
// =============================================================================

/// A WebSocket frame as seen by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseReason>),
}

/// Close code and reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: CLOSE_NORMAL,
            reason: reason.into(),
        }
    }
}

/// Socket error on a transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<TransportError> for BridgeError {
    fn from(e: TransportError) -> Self {
        BridgeError::Transport(e.0)
    }
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

// =============================================================================
// Transport
// =============================================================================

/// One bidirectional connection.
pub struct Transport {
    sink: FrameSink,
    stream: FrameStream,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }

    pub fn split(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }

    /// Wrap a tokio-tungstenite stream (client or server side).
    pub fn from_websocket<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(|e| TransportError(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(to_tungstenite(frame))));

        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(msg) => from_tungstenite(msg).map(Ok),
                Err(e) => Some(Err(TransportError(e.to_string()))),
            })
        });

        Self::new(Box::pin(sink), Box::pin(stream))
    }

    /// Wrap an axum server-side socket, as handed over by the front-end.
    pub fn from_axum(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();

        let sink = sink
            .sink_map_err(|e| TransportError(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(to_axum(frame))));

        let stream = stream.map(|msg| {
            msg.map(from_axum)
                .map_err(|e| TransportError(e.to_string()))
        });

        Self::new(Box::pin(sink), Box::pin(stream))
    }

    /// A connected pair of in-process transports.
    ///
    /// Frames sent on one end arrive on the other. Dropping an end finishes
    /// the peer's stream. Unlike the websocket adapters, pings are not
    /// answered automatically.
    pub fn in_memory() -> (Transport, Transport) {
        let (left_tx, left_rx) = fmpsc::unbounded::<Frame>();
        let (right_tx, right_rx) = fmpsc::unbounded::<Frame>();

        let left = Transport::new(
            Box::pin(left_tx.sink_map_err(|e| TransportError(e.to_string()))),
            Box::pin(right_rx.map(Ok)),
        );
        let right = Transport::new(
            Box::pin(right_tx.sink_map_err(|e| TransportError(e.to_string()))),
            Box::pin(left_rx.map(Ok)),
        );
        (left, right)
    }
}

fn to_tungstenite(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
            code: CloseCode::from(r.code),
            reason: r.reason.into(),
        })),
    }
}

fn from_tungstenite(msg: Message) -> Option<Frame> {
    match msg {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_string())),
        Message::Binary(data) => Some(Frame::Binary(data)),
        Message::Ping(data) => Some(Frame::Ping(data)),
        Message::Pong(data) => Some(Frame::Pong(data)),
        Message::Close(frame) => Some(Frame::Close(frame.map(|f| CloseReason {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_string(),
        }))),
        Message::Frame(_) => None,
    }
}

fn to_axum(frame: Frame) -> AxumMessage {
    match frame {
        Frame::Text(text) => AxumMessage::Text(text.into()),
        Frame::Binary(data) => AxumMessage::Binary(data),
        Frame::Ping(data) => AxumMessage::Ping(data),
        Frame::Pong(data) => AxumMessage::Pong(data),
        Frame::Close(reason) => AxumMessage::Close(reason.map(|r| AxumCloseFrame {
            code: r.code,
            reason: r.reason.into(),
        })),
    }
}

fn from_axum(msg: AxumMessage) -> Frame {
    match msg {
        AxumMessage::Text(text) => Frame::Text(text.as_str().to_string()),
        AxumMessage::Binary(data) => Frame::Binary(data),
        AxumMessage::Ping(data) => Frame::Ping(data),
        AxumMessage::Pong(data) => Frame::Pong(data),
        AxumMessage::Close(frame) => Frame::Close(frame.map(|f| CloseReason {
            code: f.code,
            reason: f.reason.as_str().to_string(),
        })),
    }
}

// =============================================================================
// Dialer
// =============================================================================

/// Opens the outbound backend connection.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dial `url` under the given trust configuration.
    async fn dial(
        &self,
        url: &str,
        trust: &TrustConfiguration,
        observer: Arc<HandshakeObserver>,
    ) -> BridgeResult<Transport>;
}

/// Dials `ws://` and `wss://` URLs with tokio-tungstenite over rustls.
///
/// For `wss://` in pinned mode the TLS server name is the pinned hostname,
/// not the URL host, so the backend can be reached through an address that
/// does not match its certificate.
#[derive(Debug, Clone, Default)]
pub struct WebSocketDialer;

impl WebSocketDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(
        &self,
        url: &str,
        trust: &TrustConfiguration,
        observer: Arc<HandshakeObserver>,
    ) -> BridgeResult<Transport> {
        let parsed = Url::parse(url)
            .map_err(|e| BridgeError::InvalidConfiguration(format!("Invalid backend URL: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| BridgeError::InvalidConfiguration("Backend URL has no host".into()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| BridgeError::InvalidConfiguration("Backend URL has no port".into()))?;

        let secure = match parsed.scheme() {
            "ws" => false,
            "wss" => true,
            other => {
                return Err(BridgeError::InvalidConfiguration(format!(
                    "Unsupported backend URL scheme: {other}"
                )));
            }
        };

        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| BridgeError::Transport(format!("Failed to connect to {host}:{port}: {e}")))?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {}", e);
        }

        if !secure {
            let (ws, _response) = tokio_tungstenite::client_async(url, tcp)
                .await
                .map_err(|e| BridgeError::Transport(format!("WebSocket handshake failed: {e}")))?;
            return Ok(Transport::from_websocket(ws));
        }

        let config = trust.client_config(observer.clone())?;
        let server_name = trust.server_name(&host)?;
        let pinning_before = observer.counts().pinning_failures;

        let tls = match TlsConnector::from(config).connect(server_name, tcp).await {
            Ok(tls) => {
                observer.record_success();
                tls
            }
            Err(e) => {
                observer.record_failure();
                if let TrustConfiguration::Pinned {
                    expected_hostname, ..
                } = trust
                {
                    if observer.counts().pinning_failures > pinning_before {
                        return Err(BridgeError::Trust(TrustError::HostnameMismatch {
                            expected: expected_hostname.clone(),
                            actual: host,
                        }));
                    }
                }
                return Err(BridgeError::Transport(format!("TLS handshake failed: {e}")));
            }
        };

        tracing::debug!("TLS established with {} ({} mode)", host, trust.mode());
        let (ws, _response) = tokio_tungstenite::client_async(url, tls)
            .await
            .map_err(|e| BridgeError::Transport(format!("WebSocket handshake failed: {e}")))?;
        Ok(Transport::from_websocket(ws))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_pair_delivers_both_ways() {
        let (left, right) = Transport::in_memory();
        let (mut left_sink, mut left_stream) = left.split();
        let (mut right_sink, mut right_stream) = right.split();

        left_sink.send(Frame::Text("hello".into())).await.unwrap();
        right_sink
            .send(Frame::Binary(Bytes::from_static(&[1, 2])))
            .await
            .unwrap();

        assert_eq!(
            right_stream.next().await.unwrap().unwrap(),
            Frame::Text("hello".into())
        );
        assert_eq!(
            left_stream.next().await.unwrap().unwrap(),
            Frame::Binary(Bytes::from_static(&[1, 2]))
        );
    }

    #[tokio::test]
    async fn test_in_memory_drop_ends_peer_stream() {
        let (left, right) = Transport::in_memory();
        drop(left);
        let (_sink, mut stream) = right.split();
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_tungstenite_close_conversion() {
        let msg = to_tungstenite(Frame::Close(Some(CloseReason::normal("bye"))));
        match from_tungstenite(msg) {
            Some(Frame::Close(Some(reason))) => {
                assert_eq!(reason.code, CLOSE_NORMAL);
                assert_eq!(reason.reason, "bye");
            }
            other => panic!("Unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dial_rejects_bad_scheme() {
        let result = WebSocketDialer::new()
            .dial(
                "http://127.0.0.1:1/",
                &TrustConfiguration::Disabled,
                Arc::new(HandshakeObserver::new()),
            )
            .await;
        assert!(matches!(result, Err(BridgeError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_dial_rejects_unparseable_url() {
        let result = WebSocketDialer::new()
            .dial(
                "not a url",
                &TrustConfiguration::Disabled,
                Arc::new(HandshakeObserver::new()),
            )
            .await;
        assert!(matches!(result, Err(BridgeError::InvalidConfiguration(_))));
    }
}
