//! Carrier protocol framing and backend control messages.
//!
//! The carrier speaks tagged JSON events (`start`, `media`, `stop`, `clear`,
//! `mark`, `dtmf`); the backend speaks raw PCM plus advisory JSON text.
//! [`ProtocolCodec`] owns the per-call state needed to emit carrier events
//! and parses everything arriving from the carrier.

mod codec;
pub mod messages;


use thiserror::Error;

pub use codec::ProtocolCodec;
pub use messages::{
    BackendControlMessage, CarrierOutbound, EventBody, EventKind, MediaFormat, ProtocolEvent,
};

/// Errors raised while building or parsing protocol frames.
///
/// All of these are dropped at the frame level by the bridge; none of them
/// end a call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Text was not valid JSON
    #[error("Parse error: {0}")]
    Parse(String),

    /// JSON had no `event` tag
    #[error("Parse error: missing event field")]
    MissingEvent,

    /// Event not allowed in the current codec state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Event could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
