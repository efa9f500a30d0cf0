//! Call bridging between the voice-AI backend and the telephony carrier.
//!
//! A [`BridgeSession`] owns two WebSocket connections for one call:
//!
//! - the **backend** side, dialed outbound, carrying raw 16kHz PCM frames
//!   plus advisory JSON text
//! - the **carrier** side, accepted inbound, carrying tagged JSON events with
//!   base64 8kHz PCM
//!
//! # Modules
//! - `base`: errors, session state and per-session settings
//! - `transport`: frame-level socket abstraction and the outbound dialer
//! - `events`: lifecycle notification registry
//! - `stats`: counters and the recent error ring
//! - `session`: the relay itself

pub mod base;
pub mod events;
mod session;
pub mod stats;
pub mod transport;

pub use base::{
    BridgeError, BridgeResult, ConnectionSide, ErrorCategory, SessionConfig, SessionState,
};
pub use events::{BridgeEvent, DisconnectReason, EventHandler, EventName, EventRegistry};
pub use session::BridgeSession;
pub use stats::{BridgeStats, ErrorRecord, StatsSnapshot};
pub use transport::{
    CloseReason, Dialer, Frame, FrameSink, FrameStream, Transport, TransportError,
    WebSocketDialer,
};
