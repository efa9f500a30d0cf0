//! One bridged call: an outbound backend socket and an inbound carrier socket.
//!
//! Each attached connection gets a writer task draining an mpsc queue into
//! the socket and a reader task translating incoming frames for the other
//! side. Lifecycle changes are broadcast through the session's
//! [`EventRegistry`].

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{OnceCell, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::base::{BridgeError, BridgeResult, ConnectionSide, SessionConfig, SessionState};
use super::events::{BridgeEvent, DisconnectReason, EventName, EventRegistry};
use super::stats::{BridgeStats, StatsSnapshot, add, bump};
use super::transport::{CloseReason, Dialer, Frame, Transport, WebSocketDialer};
use crate::config::BridgeConfig;
use crate::core::audio::{
    AmplifierConfig, amplify, decode_carrier_payload, downsample, encode_carrier_payload,
    split_into_chunks, upsample,
};
use crate::core::protocol::{EventBody, ProtocolCodec, ProtocolEvent};
use crate::core::trust::{HandshakeObserver, TrustConfiguration, TrustManager, TrustSource};

/// How long a writer may keep flushing after the session is cancelled.
const WRITE_GRACE: Duration = Duration::from_secs(1);

// =============================================================================
// Connection Handle
// =============================================================================

/// Sending half of one attached connection.
#[derive(Debug)]
struct ConnectionHandle {
    side: ConnectionSide,
    sender: RwLock<Option<mpsc::Sender<Frame>>>,
}

impl ConnectionHandle {
    fn new(side: ConnectionSide) -> Self {
        Self {
            side,
            sender: RwLock::new(None),
        }
    }

    fn install(&self, tx: mpsc::Sender<Frame>) {
        *self.sender.write() = Some(tx);
    }

    fn take(&self) -> Option<mpsc::Sender<Frame>> {
        self.sender.write().take()
    }

    fn is_open(&self) -> bool {
        self.sender
            .read()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Queue a frame without waiting. False if the connection is not open
    /// or its queue is full.
    fn try_send(&self, frame: Frame) -> bool {
        self.sender
            .read()
            .as_ref()
            .is_some_and(|tx| tx.try_send(frame).is_ok())
    }
}

// =============================================================================
// Session
// =============================================================================

struct SessionInner {
    session_id: String,
    config: SessionConfig,
    amplifier: AmplifierConfig,
    trust_manager: TrustManager,
    trust: OnceCell<TrustConfiguration>,
    dialer: Arc<dyn Dialer>,
    observer: Arc<HandshakeObserver>,
    call_stream_id: RwLock<Option<String>>,
    state: RwLock<SessionState>,
    codec: Mutex<ProtocolCodec>,
    backend: ConnectionHandle,
    carrier: ConnectionHandle,
    stats: BridgeStats,
    events: EventRegistry,
    cancel: CancellationToken,
    disconnected_emitted: AtomicBool,
}

/// Bridges one call between the voice-AI backend and the telephony carrier.
///
/// ```text
/// backend  --binary 16kHz-->  [amplify] -> downsample -> chunk -> base64 -> media event  --> carrier
/// backend  <--binary 16kHz--  upsample <- base64 decode <- media event                  <-- carrier
/// ```
///
/// The handle is cheap to clone; all clones refer to the same session.
///
/// # Example
///
/// ```rust,ignore
/// let session = BridgeSession::new(&BridgeConfig::from_env()?);
/// session.on(EventName::Disconnected, |event| tracing::info!("{:?}", event));
///
/// session.connect("wss://api.vapi.ai/call/ws", "stream-123").await?;
/// session.attach_inbound_connection(Transport::from_axum(socket)).await?;
/// ```
#[derive(Clone)]
pub struct BridgeSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for BridgeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSession")
            .field("session_id", &self.inner.session_id)
            .field("state", &self.state())
            .finish()
    }
}

impl BridgeSession {
    /// Create a session that dials with [`WebSocketDialer`].
    pub fn new(config: &BridgeConfig) -> Self {
        Self::with_dialer(config, Arc::new(WebSocketDialer::new()))
    }

    /// Create a session with a custom outbound dialer.
    pub fn with_dialer(config: &BridgeConfig, dialer: Arc<dyn Dialer>) -> Self {
        let inner = SessionInner {
            session_id: Uuid::new_v4().to_string(),
            config: config.session.clone(),
            amplifier: config.audio,
            trust_manager: TrustManager::new(config.trust.clone()),
            trust: OnceCell::new(),
            dialer,
            observer: Arc::new(HandshakeObserver::new()),
            call_stream_id: RwLock::new(None),
            state: RwLock::new(SessionState::Idle),
            codec: Mutex::new(ProtocolCodec::new()),
            backend: ConnectionHandle::new(ConnectionSide::Backend),
            carrier: ConnectionHandle::new(ConnectionSide::Carrier),
            stats: BridgeStats::new(config.session.max_recent_errors),
            events: EventRegistry::new(),
            cancel: CancellationToken::new(),
            disconnected_emitted: AtomicBool::new(false),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn call_stream_id(&self) -> Option<String> {
        self.inner.call_stream_id.read().clone()
    }

    /// Trust configuration in use, once the first connect has resolved it.
    pub fn trust_configuration(&self) -> Option<TrustConfiguration> {
        self.inner.trust.get().cloned()
    }

    /// Register an event handler.
    pub fn on<F>(&self, name: EventName, handler: F)
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(name, handler);
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot(
            &self.inner.session_id,
            self.state(),
            self.inner.observer.counts(),
        )
    }

    /// Resolve trust and dial the backend.
    ///
    /// Only valid from `Idle`. On success the session waits for the carrier
    /// connection. Any failure, including the dial timeout, leaves the session
    /// `Closed`; there is no retry.
    pub async fn connect(&self, url: &str, call_stream_id: &str) -> BridgeResult<()> {
        let inner = &self.inner;
        {
            let mut state = inner.state.write();
            if *state != SessionState::Idle {
                return Err(BridgeError::InvalidState(format!(
                    "connect called in state {}",
                    *state
                )));
            }
            *state = SessionState::Connecting;
        }

        *inner.call_stream_id.write() = Some(call_stream_id.to_string());
        bump(&inner.stats.connection_attempts);
        tracing::info!(
            session_id = %inner.session_id,
            stream_sid = call_stream_id,
            "Connecting to backend at {}",
            url
        );

        let result = tokio::select! {
            _ = inner.cancel.cancelled() => Err(BridgeError::Cancelled),
            result = inner.dial_backend(url) => result,
        };

        let transport = match result {
            Ok(transport) => transport,
            Err(e) => {
                if e != BridgeError::Cancelled {
                    bump(&inner.stats.connection_failures);
                    tracing::error!(session_id = %inner.session_id, "Backend connection failed: {}", e);
                    inner.record_error(&e);
                }
                *inner.state.write() = SessionState::Closed;
                return Err(e);
            }
        };

        {
            let mut state = inner.state.write();
            if *state != SessionState::Connecting {
                // disconnect() won the race against the dial
                return Err(BridgeError::Cancelled);
            }
            SessionInner::spawn_connection(inner, ConnectionSide::Backend, transport, None);
            *state = SessionState::AwaitingCarrier;
        }

        bump(&inner.stats.connection_successes);
        tracing::info!(session_id = %inner.session_id, "Backend connected; awaiting carrier");
        inner.events.emit(&BridgeEvent::Connected {
            side: ConnectionSide::Backend,
        });
        Ok(())
    }

    /// Attach the carrier connection and send it the start event.
    ///
    /// Only valid once the backend is connected. The start event is queued
    /// ahead of any media so the carrier always sees it first.
    pub async fn attach_inbound_connection(&self, transport: Transport) -> BridgeResult<()> {
        let inner = &self.inner;
        let stream_sid = inner
            .call_stream_id
            .read()
            .clone()
            .ok_or_else(|| BridgeError::InvalidState("no call stream id".into()))?;

        {
            let mut state = inner.state.write();
            if *state != SessionState::AwaitingCarrier {
                return Err(BridgeError::InvalidState(format!(
                    "cannot attach carrier in state {}",
                    *state
                )));
            }

            let start = inner
                .codec
                .lock()
                .build_start(&stream_sid, &inner.config.custom_parameters)?;
            SessionInner::spawn_connection(
                inner,
                ConnectionSide::Carrier,
                transport,
                Some(Frame::Text(start)),
            );
            *state = SessionState::Active;
        }

        tracing::info!(
            session_id = %inner.session_id,
            stream_sid = %stream_sid,
            "Carrier attached; session active"
        );
        inner.events.emit(&BridgeEvent::Connected {
            side: ConnectionSide::Carrier,
        });
        SessionInner::spawn_heartbeat(inner);
        Ok(())
    }

    /// Ask the carrier to drop any audio it has buffered.
    pub async fn clear_carrier_audio(&self) -> BridgeResult<()> {
        let json = self.inner.codec.lock().build_clear()?;
        self.inner
            .send_or_drop(ConnectionSide::Carrier, Frame::Text(json));
        Ok(())
    }

    /// Send a named mark the carrier echoes once preceding audio has played.
    pub async fn send_mark(&self, name: &str) -> BridgeResult<()> {
        let json = self.inner.codec.lock().build_mark(name)?;
        self.inner
            .send_or_drop(ConnectionSide::Carrier, Frame::Text(json));
        Ok(())
    }

    /// Close both connections and mark the session closed.
    ///
    /// Safe in any state; aborts an in-flight connect and is a no-op once
    /// closed. `disconnected` is emitted at most once per session.
    pub async fn disconnect(&self) -> BridgeResult<()> {
        self.inner.shutdown(DisconnectReason::Requested);
        Ok(())
    }
}

impl SessionInner {
    fn handle(&self, side: ConnectionSide) -> &ConnectionHandle {
        match side {
            ConnectionSide::Backend => &self.backend,
            ConnectionSide::Carrier => &self.carrier,
        }
    }

    async fn dial_backend(&self, url: &str) -> BridgeResult<Transport> {
        let trust = self
            .trust
            .get_or_try_init(|| async {
                let resolution = self.trust_manager.establish().await?;
                if resolution.source == TrustSource::Fallback {
                    bump(&self.stats.trust_fallbacks);
                }
                tracing::info!(
                    session_id = %self.session_id,
                    "Backend trust mode: {}",
                    resolution.configuration.mode()
                );
                Ok::<_, BridgeError>(resolution.configuration)
            })
            .await?;

        let timeout = self.config.connect_timeout();
        match tokio::time::timeout(timeout, self.dialer.dial(url, trust, self.observer.clone())).await
        {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout(format!(
                "backend dial exceeded {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Spawn the writer and reader tasks for one side.
    fn spawn_connection(
        self: &Arc<Self>,
        side: ConnectionSide,
        transport: Transport,
        first: Option<Frame>,
    ) {
        let (mut sink, mut stream) = transport.split();
        let (tx, mut rx) = mpsc::channel::<Frame>(self.config.channel_capacity.max(1));
        if let Some(frame) = first {
            if tx.try_send(frame).is_err() {
                tracing::warn!(session_id = %self.session_id, %side, "Initial frame dropped");
            }
        }
        self.handle(side).install(tx);

        let session_id = self.session_id.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            // a stalled socket is abandoned once the grace after cancellation runs out
            let deadline = async move {
                cancel.cancelled().await;
                tokio::time::sleep(WRITE_GRACE).await;
            };
            tokio::pin!(deadline);

            loop {
                let frame = tokio::select! {
                    frame = rx.recv() => frame,
                    _ = &mut deadline => {
                        tracing::debug!(session_id = %session_id, %side, "Writer stopped before queue drained");
                        return;
                    }
                };
                let Some(frame) = frame else { break };

                let closing = matches!(frame, Frame::Close(_));
                tokio::select! {
                    result = sink.send(frame) => {
                        if let Err(e) = result {
                            tracing::debug!(session_id = %session_id, %side, "Write failed: {}", e);
                            break;
                        }
                    }
                    _ = &mut deadline => {
                        tracing::warn!(session_id = %session_id, %side, "Socket stalled; dropping it unclosed");
                        return;
                    }
                }
                if closing {
                    break;
                }
            }

            match tokio::time::timeout(WRITE_GRACE, sink.close()).await {
                Ok(Err(e)) => tracing::debug!(session_id = %session_id, %side, "Close failed: {}", e),
                Err(_) => tracing::debug!(session_id = %session_id, %side, "Close timed out"),
                Ok(Ok(())) => {}
            }
        });

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => return,
                    next = stream.next() => match next {
                        Some(Ok(Frame::Close(reason))) => {
                            tracing::debug!(
                                session_id = %inner.session_id,
                                %side,
                                "Close frame received: {:?}",
                                reason
                            );
                            break;
                        }
                        Some(Ok(frame)) => inner.handle_frame(side, frame),
                        Some(Err(e)) => {
                            inner.record_error(&BridgeError::from(e));
                            break;
                        }
                        None => break,
                    }
                }
            }
            inner.on_socket_closed(side);
        });
    }

    fn spawn_heartbeat(self: &Arc<Self>) {
        let Some(period) = self.config.heartbeat_interval() else {
            return;
        };

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for handle in [&inner.backend, &inner.carrier] {
                            if handle.is_open() && !handle.try_send(Frame::Ping(Bytes::new())) {
                                tracing::debug!(
                                    session_id = %inner.session_id,
                                    side = %handle.side,
                                    "Heartbeat skipped; queue full"
                                );
                            }
                        }
                    }
                }
            }
        });
    }

    // =========================================================================
    // Relay
    // =========================================================================

    /// Handle one incoming frame. Never waits on the other side's socket:
    /// a full outbound queue drops the frame.
    fn handle_frame(&self, side: ConnectionSide, frame: Frame) {
        match (side, frame) {
            // the websocket layer answers pings itself
            (_, Frame::Ping(_)) | (_, Frame::Pong(_)) | (_, Frame::Close(_)) => {}
            (ConnectionSide::Backend, Frame::Binary(data)) => self.relay_backend_audio(&data),
            (ConnectionSide::Backend, Frame::Text(text)) => self.handle_backend_text(&text),
            (ConnectionSide::Carrier, Frame::Text(text)) => self.handle_carrier_text(&text),
            (ConnectionSide::Carrier, Frame::Binary(data)) => {
                bump(&self.stats.parse_misses);
                tracing::debug!(
                    session_id = %self.session_id,
                    "Ignoring {} byte binary frame from carrier",
                    data.len()
                );
            }
        }
    }

    /// Backend PCM → carrier media events.
    fn relay_backend_audio(&self, data: &[u8]) {
        self.events.emit(&BridgeEvent::AudioReceived {
            side: ConnectionSide::Backend,
            bytes: data.len(),
        });

        if !self.carrier.is_open() {
            bump(&self.stats.dropped_sends);
            return;
        }

        let pcm: Cow<'_, [u8]> = if self.amplifier.enabled {
            let amplified = amplify(data, &self.amplifier);
            bump(&self.stats.amplified_frames);
            add(&self.stats.clipped_samples, amplified.clipped);
            Cow::Owned(amplified.pcm)
        } else {
            Cow::Borrowed(data)
        };

        let narrow = downsample(&pcm);
        for chunk in split_into_chunks(&narrow) {
            let payload = encode_carrier_payload(&chunk);
            let built = self.codec.lock().build_media(&payload);
            let json = match built {
                Ok(json) => json,
                Err(e) => {
                    self.record_error(&BridgeError::from(e));
                    return;
                }
            };

            if self.carrier.try_send(Frame::Text(json)) {
                bump(&self.stats.media_events_sent);
                add(&self.stats.bytes_backend_to_carrier, chunk.len() as u64);
            } else {
                bump(&self.stats.dropped_sends);
            }
        }
        bump(&self.stats.frames_backend_to_carrier);
    }

    /// Backend JSON is advisory; it is logged and counted, never acted on.
    fn handle_backend_text(&self, text: &str) {
        match ProtocolCodec::parse_backend_control(text) {
            Ok(message) => {
                bump(&self.stats.control_messages);
                let kind = message.message_type().unwrap_or("unknown").to_string();
                if message.is_hangup() {
                    tracing::info!(session_id = %self.session_id, "Backend signalled hangup");
                } else {
                    tracing::debug!(session_id = %self.session_id, "Backend control message: {}", kind);
                }
                self.events.emit(&BridgeEvent::MessageProcessed {
                    side: ConnectionSide::Backend,
                    kind,
                    detail: None,
                });
            }
            Err(e) => {
                bump(&self.stats.parse_misses);
                tracing::debug!(session_id = %self.session_id, "Unparseable backend text: {}", e);
            }
        }
    }

    fn handle_carrier_text(&self, text: &str) {
        let event = match ProtocolCodec::parse_inbound(text) {
            Ok(event) => event,
            Err(e) => {
                bump(&self.stats.parse_misses);
                self.record_error(&BridgeError::from(e));
                return;
            }
        };

        let detail = match &event.body {
            EventBody::Media { .. } => {
                self.relay_carrier_audio(&event);
                return;
            }
            EventBody::Stop => {
                tracing::info!(session_id = %self.session_id, "Carrier sent stop");
                self.emit_processed(&event, None);
                self.shutdown(DisconnectReason::CarrierStop);
                return;
            }
            EventBody::Dtmf { digit } => {
                bump(&self.stats.dtmf_digits);
                tracing::debug!(session_id = %self.session_id, "DTMF digit {:?}", digit);
                digit.clone()
            }
            EventBody::Mark { name } => name.clone(),
            EventBody::Unknown { event } => Some(event.clone()),
            EventBody::Start { .. } | EventBody::Clear => None,
        };
        self.emit_processed(&event, detail);
    }

    fn emit_processed(&self, event: &ProtocolEvent, detail: Option<String>) {
        self.events.emit(&BridgeEvent::MessageProcessed {
            side: ConnectionSide::Carrier,
            kind: event.kind().to_string(),
            detail,
        });
    }

    /// Carrier media event → backend PCM.
    fn relay_carrier_audio(&self, event: &ProtocolEvent) {
        let Some(payload) = event.audio_payload() else {
            bump(&self.stats.parse_misses);
            tracing::debug!(session_id = %self.session_id, "Media event without payload");
            return;
        };

        let pcm = match decode_carrier_payload(payload) {
            Ok(pcm) => pcm,
            Err(e) => {
                self.record_error(&BridgeError::from(e));
                return;
            }
        };

        self.events.emit(&BridgeEvent::AudioReceived {
            side: ConnectionSide::Carrier,
            bytes: pcm.len(),
        });
        if pcm.is_empty() {
            return;
        }

        let wide = upsample(&pcm);
        let len = wide.len() as u64;
        if self.backend.try_send(Frame::Binary(Bytes::from(wide))) {
            bump(&self.stats.frames_carrier_to_backend);
            add(&self.stats.bytes_carrier_to_backend, len);
        } else {
            bump(&self.stats.dropped_sends);
        }
    }

    fn send_or_drop(&self, side: ConnectionSide, frame: Frame) {
        if !self.handle(side).try_send(frame) {
            bump(&self.stats.dropped_sends);
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn record_error(&self, error: &BridgeError) {
        tracing::warn!(
            session_id = %self.session_id,
            category = %error.category(),
            "{}",
            error
        );
        self.stats.record_error(error);
        self.events.emit(&BridgeEvent::Error {
            category: error.category(),
            message: error.to_string(),
        });
    }

    fn emit_disconnected(&self, reason: DisconnectReason) {
        if !self.disconnected_emitted.swap(true, Ordering::SeqCst) {
            self.events.emit(&BridgeEvent::Disconnected { reason });
        }
    }

    /// Tear the whole session down.
    fn shutdown(&self, reason: DisconnectReason) {
        {
            let mut state = self.state.write();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closing;
        }
        self.cancel.cancel();

        let stop = {
            let mut codec = self.codec.lock();
            if reason == DisconnectReason::CarrierStop {
                codec.reset();
                None
            } else if codec.is_active() {
                codec.build_stop().ok()
            } else {
                None
            }
        };
        if let Some(stop) = stop {
            if !self.carrier.try_send(Frame::Text(stop)) {
                bump(&self.stats.dropped_sends);
            }
        }

        for handle in [&self.carrier, &self.backend] {
            if let Some(tx) = handle.take() {
                // the writer also closes the sink once the queue is dropped
                let _ = tx.try_send(Frame::Close(Some(CloseReason::normal("call ended"))));
            }
        }

        *self.state.write() = SessionState::Closed;
        tracing::info!(session_id = %self.session_id, "Session closed ({:?})", reason);
        self.emit_disconnected(reason);
    }

    /// A socket ended without `disconnect()`. The other socket is left as-is.
    fn on_socket_closed(&self, side: ConnectionSide) {
        if self.cancel.is_cancelled() {
            return;
        }

        self.stats.record_close(side);
        drop(self.handle(side).take());
        let other_open = self.handle(side.other()).is_open();

        {
            let mut state = self.state.write();
            if *state == SessionState::Closed {
                return;
            }
            *state = if other_open {
                SessionState::Closing
            } else {
                SessionState::Closed
            };
        }
        if !other_open {
            self.cancel.cancel();
        }

        tracing::info!(
            session_id = %self.session_id,
            %side,
            "{} connection closed",
            side
        );
        self.emit_disconnected(DisconnectReason::SocketClosed(side));
    }
}
