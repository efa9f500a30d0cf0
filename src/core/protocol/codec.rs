//! Carrier event framing and the per-call stream state machine.

use serde_json::{Map, Value};
use tracing::debug;

use super::messages::{
    BackendControlMessage, CarrierOutbound, EventBody, EventKind, MarkPayload, MediaFormat,
    MediaPayload, ProtocolEvent, StartPayload, StopPayload,
};
use super::{ProtocolError, ProtocolResult};

/// Builds carrier events for one call and gates which ones may be sent.
///
/// ```text
/// Idle --build_start--> Active --build_stop / reset--> Idle
/// ```
///
/// Media, clear and mark events may only be built while active. The sequence
/// number restarts at 0 on every start and is pre-incremented per media event,
/// so the first media event after a start carries `"1"`.
#[derive(Debug, Clone, Default)]
pub struct ProtocolCodec {
    stream_sid: Option<String>,
    sequence_number: u64,
    call_active: bool,
}

impl ProtocolCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a start has been built without a matching stop.
    pub fn is_active(&self) -> bool {
        self.call_active
    }

    /// Last sequence number handed out.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Stream SID of the current call.
    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    /// Build a start event and enter the active state.
    pub fn build_start(
        &mut self,
        stream_sid: &str,
        custom_parameters: &Map<String, Value>,
    ) -> ProtocolResult<String> {
        let json = serialize(&CarrierOutbound::Start {
            stream_sid,
            start: StartPayload {
                media_format: MediaFormat::default(),
                custom_parameters,
            },
        })?;

        self.stream_sid = Some(stream_sid.to_string());
        self.sequence_number = 0;
        self.call_active = true;
        debug!(stream_sid, "Carrier stream started");
        Ok(json)
    }

    /// Build a media event around an already base64-encoded payload.
    pub fn build_media(&mut self, payload: &str) -> ProtocolResult<String> {
        let stream_sid = self.active_stream("media")?;
        let next = self.sequence_number + 1;

        let json = serialize(&CarrierOutbound::Media {
            stream_sid,
            sequence_number: next.to_string(),
            media: MediaPayload { payload },
        })?;

        self.sequence_number = next;
        Ok(json)
    }

    /// Build a stop event and leave the active state.
    ///
    /// Allowed in any state.
    pub fn build_stop(&mut self) -> ProtocolResult<String> {
        let json = serialize(&CarrierOutbound::Stop {
            stream_sid: self.stream_sid.as_deref().unwrap_or_default(),
            stop: StopPayload {},
        })?;

        self.call_active = false;
        Ok(json)
    }

    /// Build a clear event.
    pub fn build_clear(&self) -> ProtocolResult<String> {
        let stream_sid = self.active_stream("clear")?;
        serialize(&CarrierOutbound::Clear { stream_sid })
    }

    /// Build a mark event.
    pub fn build_mark(&self, name: &str) -> ProtocolResult<String> {
        let stream_sid = self.active_stream("mark")?;
        serialize(&CarrierOutbound::Mark {
            stream_sid,
            mark: MarkPayload { name },
        })
    }

    /// Return to idle with the sequence number and stream SID cleared.
    pub fn reset(&mut self) {
        self.stream_sid = None;
        self.sequence_number = 0;
        self.call_active = false;
    }

    fn active_stream(&self, event: &'static str) -> ProtocolResult<&str> {
        match (&self.stream_sid, self.call_active) {
            (Some(sid), true) => Ok(sid.as_str()),
            _ => Err(ProtocolError::InvalidState(format!(
                "cannot build {event} event while the call is inactive"
            ))),
        }
    }

    /// Parse a carrier event from JSON text.
    ///
    /// Fails if the text is not JSON or has no string `event` field. Unknown
    /// tags parse successfully as [`EventKind::Unknown`].
    pub fn parse_inbound(text: &str) -> ProtocolResult<ProtocolEvent> {
        let raw: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Parse(e.to_string()))?;

        let tag = raw
            .get("event")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingEvent)?
            .to_string();
        let kind = EventKind::from_tag(&tag);

        let section = raw.get(kind.as_str());
        let field = |name: &str| -> Option<String> {
            section
                .and_then(|s| s.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let body = match kind {
            EventKind::Start => EventBody::Start {
                media_format: section.and_then(|s| s.get("media_format")).cloned(),
                custom_parameters: section
                    .and_then(|s| s.get("custom_parameters"))
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            },
            EventKind::Media => EventBody::Media {
                payload: field("payload"),
            },
            EventKind::Stop => EventBody::Stop,
            EventKind::Clear => EventBody::Clear,
            EventKind::Mark => EventBody::Mark {
                name: field("name"),
            },
            EventKind::Dtmf => EventBody::Dtmf {
                digit: field("digit"),
            },
            EventKind::Unknown => EventBody::Unknown { event: tag },
        };

        Ok(ProtocolEvent {
            stream_sid: lift_stream_sid(&raw, section),
            sequence_number: raw.get("sequence_number").and_then(as_u64_lenient),
            body,
            raw,
        })
    }

    /// Base64 payload of a media event; `None` for every other tag.
    pub fn extract_audio_payload(event: &ProtocolEvent) -> Option<&str> {
        event.audio_payload()
    }

    /// Parse a backend control message. Any JSON object is accepted.
    pub fn parse_backend_control(text: &str) -> ProtocolResult<BackendControlMessage> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Parse(e.to_string()))
    }
}

fn serialize(event: &CarrierOutbound<'_>) -> ProtocolResult<String> {
    serde_json::to_string(event).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

/// Stream SID from the top level, falling back to the event section and the
/// camelCase spelling some carriers use.
fn lift_stream_sid(raw: &Value, section: Option<&Value>) -> Option<String> {
    ["stream_sid", "streamSid"]
        .iter()
        .find_map(|key| {
            raw.get(*key)
                .or_else(|| section.and_then(|s| s.get(*key)))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
}

fn as_u64_lenient(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        other => other.as_u64(),
    }
}
