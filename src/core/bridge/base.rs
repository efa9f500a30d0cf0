//! Shared types for the bridge session.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::audio::AudioError;
use crate::core::protocol::ProtocolError;
use crate::core::trust::TrustError;

// =============================================================================
// Error Types
// =============================================================================

/// Errors surfaced by a bridge session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    /// Socket-level failure on either connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend dial did not complete in time
    #[error("Connection timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Operation not allowed in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Session was disconnected while the operation was in flight
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl BridgeError {
    /// Taxonomy bucket used by statistics and the `error` channel.
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::Transport(_) | BridgeError::Timeout(_) => ErrorCategory::Transport,
            BridgeError::Trust(_) => ErrorCategory::Trust,
            BridgeError::Protocol(_) => ErrorCategory::Protocol,
            BridgeError::Audio(_) => ErrorCategory::Audio,
            BridgeError::InvalidState(_)
            | BridgeError::Cancelled
            | BridgeError::InvalidConfiguration(_) => ErrorCategory::Lifecycle,
        }
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Transport,
    Trust,
    Protocol,
    Audio,
    Lifecycle,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::Trust => write!(f, "trust"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Audio => write!(f, "audio"),
            ErrorCategory::Lifecycle => write!(f, "lifecycle"),
        }
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle of a bridge session.
///
/// ```text
/// Idle -> Connecting -> AwaitingCarrier -> Active -> Closing -> Closed
/// ```
///
/// `Closing` is also the resting state when one socket has closed and the
/// other is still open. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    /// Trust setup and backend dial in progress
    Connecting,
    /// Backend open, waiting for the carrier connection
    AwaitingCarrier,
    /// Both sides attached, relaying
    Active,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::AwaitingCarrier => write!(f, "AwaitingCarrier"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Closing => write!(f, "Closing"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

/// One of the two connections a session owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionSide {
    /// Outbound connection to the voice-AI backend
    Backend,
    /// Inbound connection from the telephony carrier
    Carrier,
}

impl ConnectionSide {
    pub fn other(self) -> Self {
        match self {
            ConnectionSide::Backend => ConnectionSide::Carrier,
            ConnectionSide::Carrier => ConnectionSide::Backend,
        }
    }
}

impl fmt::Display for ConnectionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionSide::Backend => write!(f, "backend"),
            ConnectionSide::Carrier => write!(f, "carrier"),
        }
    }
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Per-session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Bound on the backend dial. Default: 10000ms
    pub connect_timeout_ms: u64,
    /// Keepalive ping interval while active; 0 disables. Default: 30s
    pub heartbeat_interval_secs: u64,
    /// Size of the recent error ring. Default: 50
    pub max_recent_errors: usize,
    /// Outgoing frame queue per connection. Default: 256
    pub channel_capacity: usize,
    /// Sent to the carrier in the start event
    #[serde(default)]
    pub custom_parameters: Map<String, Value>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            heartbeat_interval_secs: 30,
            max_recent_errors: 50,
            channel_capacity: 256,
            custom_parameters: Map::new(),
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}
