pub mod audio;
pub mod bridge;
pub mod protocol;
pub mod trust;

// Re-export commonly used types for convenience
pub use audio::{AmplifierConfig, AudioError, AudioResult};

pub use bridge::{
    BridgeError, BridgeEvent, BridgeResult, BridgeSession, ConnectionSide, Dialer,
    DisconnectReason, ErrorCategory, EventName, Frame, SessionConfig, SessionState,
    StatsSnapshot, Transport, WebSocketDialer,
};

pub use protocol::{ProtocolCodec, ProtocolError, ProtocolEvent};

pub use trust::{TrustConfiguration, TrustError, TrustManager, TrustSettings, TrustSource};
