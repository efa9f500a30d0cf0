//! Carrier (Exotel) WebSocket message types.
//!
//! # Protocol Overview
//!
//! Bridge → carrier:
//! - start - Stream opened, announces the media format
//! - media - One chunk of base64 8kHz PCM with a sequence number
//! - stop - Stream closed
//! - clear - Drop any audio the carrier has buffered
//! - mark - Named marker echoed back once preceding audio has played
//!
//! Carrier → bridge: the same tags plus `dtmf`. Field names are snake_case on
//! the wire and sequence numbers travel as decimal strings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::audio::CARRIER_SAMPLE_RATE;

/// Media encoding announced in the start event.
pub const MEDIA_ENCODING: &str = "raw";

/// Channel count announced in the start event.
pub const MEDIA_CHANNELS: u8 = 1;

// =============================================================================
// Outgoing Events (Bridge -> Carrier)
// =============================================================================

/// Events the bridge writes to the carrier connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CarrierOutbound<'a> {
    /// Stream start
    Start {
        stream_sid: &'a str,
        start: StartPayload<'a>,
    },
    /// Audio chunk
    Media {
        stream_sid: &'a str,
        sequence_number: String,
        media: MediaPayload<'a>,
    },
    /// Stream stop
    Stop {
        stream_sid: &'a str,
        stop: StopPayload,
    },
    /// Flush carrier-side audio
    Clear { stream_sid: &'a str },
    /// Playback marker
    Mark {
        stream_sid: &'a str,
        mark: MarkPayload<'a>,
    },
}

/// Body of a start event.
#[derive(Debug, Clone, Serialize)]
pub struct StartPayload<'a> {
    pub media_format: MediaFormat,
    pub custom_parameters: &'a Map<String, Value>,
}

/// Media format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediaFormat {
    pub encoding: &'static str,
    pub sample_rate: u32,
    pub channels: u8,
}

impl Default for MediaFormat {
    fn default() -> Self {
        Self {
            encoding: MEDIA_ENCODING,
            sample_rate: CARRIER_SAMPLE_RATE,
            channels: MEDIA_CHANNELS,
        }
    }
}

/// Body of a media event.
#[derive(Debug, Clone, Serialize)]
pub struct MediaPayload<'a> {
    pub payload: &'a str,
}

/// Body of a stop event; always `{}` on the wire.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StopPayload {}

/// Body of a mark event.
#[derive(Debug, Clone, Serialize)]
pub struct MarkPayload<'a> {
    pub name: &'a str,
}

// =============================================================================
// Incoming Events (Carrier -> Bridge)
// =============================================================================

/// Tag of a carrier event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Media,
    Stop,
    Clear,
    Mark,
    Dtmf,
    /// Any tag the bridge does not know about
    Unknown,
}

impl EventKind {
    /// Classify a wire tag.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "start" => EventKind::Start,
            "media" => EventKind::Media,
            "stop" => EventKind::Stop,
            "clear" => EventKind::Clear,
            "mark" => EventKind::Mark,
            "dtmf" => EventKind::Dtmf,
            _ => EventKind::Unknown,
        }
    }

    /// Wire tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Media => "media",
            EventKind::Stop => "stop",
            EventKind::Clear => "clear",
            EventKind::Mark => "mark",
            EventKind::Dtmf => "dtmf",
            EventKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag-specific content of a parsed carrier event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    Start {
        /// Format announced by the carrier, if it sent one
        media_format: Option<Value>,
        /// Free-form parameters attached to the call
        custom_parameters: Map<String, Value>,
    },
    Media {
        /// Base64 PCM payload
        payload: Option<String>,
    },
    Stop,
    Clear,
    Mark {
        name: Option<String>,
    },
    Dtmf {
        digit: Option<String>,
    },
    Unknown {
        /// The unrecognised tag as it appeared on the wire
        event: String,
    },
}

/// A carrier event parsed from JSON text.
///
/// `stream_sid` and `sequence_number` are lifted to the top level; the full
/// decoded JSON is kept in `raw`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolEvent {
    pub stream_sid: Option<String>,
    pub sequence_number: Option<u64>,
    pub body: EventBody,
    pub raw: Value,
}

impl ProtocolEvent {
    /// Tag of this event.
    pub fn kind(&self) -> EventKind {
        match &self.body {
            EventBody::Start { .. } => EventKind::Start,
            EventBody::Media { .. } => EventKind::Media,
            EventBody::Stop => EventKind::Stop,
            EventBody::Clear => EventKind::Clear,
            EventBody::Mark { .. } => EventKind::Mark,
            EventBody::Dtmf { .. } => EventKind::Dtmf,
            EventBody::Unknown { .. } => EventKind::Unknown,
        }
    }

    /// Base64 audio payload; only media events carry one.
    pub fn audio_payload(&self) -> Option<&str> {
        match &self.body {
            EventBody::Media { payload } => payload.as_deref(),
            _ => None,
        }
    }
}

// =============================================================================
// Backend Control Messages
// =============================================================================

/// A JSON control message from the voice-AI backend.
///
/// The backend's text channel is advisory. Messages are kept as an untyped
/// mapping and only the `type` field is interpreted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendControlMessage(pub Map<String, Value>);

impl BackendControlMessage {
    /// Value of the `type` field, if it is a string.
    pub fn message_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn is_hangup(&self) -> bool {
        self.message_type() == Some("hangup")
    }

    pub fn is_start(&self) -> bool {
        self.message_type() == Some("start")
    }

    pub fn is_stop(&self) -> bool {
        self.message_type() == Some("stop")
    }

    /// Look up an arbitrary field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}
