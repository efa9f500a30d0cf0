//! Per-session counters and the recent error ring.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;

use super::base::{BridgeError, ConnectionSide, ErrorCategory, SessionState};
use crate::core::trust::HandshakeCounts;

/// One entry in the recent error ring.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    /// Unix time in milliseconds
    pub timestamp_ms: i64,
    pub category: ErrorCategory,
    pub message: String,
}

/// Live statistics for one session.
#[derive(Debug)]
pub struct BridgeStats {
    pub(crate) connection_attempts: AtomicU64,
    pub(crate) connection_successes: AtomicU64,
    pub(crate) connection_failures: AtomicU64,

    pub(crate) frames_backend_to_carrier: AtomicU64,
    pub(crate) frames_carrier_to_backend: AtomicU64,
    pub(crate) bytes_backend_to_carrier: AtomicU64,
    pub(crate) bytes_carrier_to_backend: AtomicU64,
    pub(crate) media_events_sent: AtomicU64,

    pub(crate) amplified_frames: AtomicU64,
    pub(crate) clipped_samples: AtomicU64,

    pub(crate) dropped_sends: AtomicU64,
    pub(crate) parse_misses: AtomicU64,
    pub(crate) audio_errors: AtomicU64,
    pub(crate) control_messages: AtomicU64,
    pub(crate) dtmf_digits: AtomicU64,

    pub(crate) backend_closes: AtomicU64,
    pub(crate) carrier_closes: AtomicU64,
    pub(crate) trust_fallbacks: AtomicU64,

    recent_errors: Mutex<VecDeque<ErrorRecord>>,
    max_recent_errors: usize,
}

/// Serializable copy of [`BridgeStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub session_id: String,
    pub state: SessionState,
    pub connection_attempts: u64,
    pub connection_successes: u64,
    pub connection_failures: u64,
    pub frames_backend_to_carrier: u64,
    pub frames_carrier_to_backend: u64,
    pub bytes_backend_to_carrier: u64,
    pub bytes_carrier_to_backend: u64,
    pub media_events_sent: u64,
    pub amplified_frames: u64,
    pub clipped_samples: u64,
    pub dropped_sends: u64,
    pub parse_misses: u64,
    pub audio_errors: u64,
    pub control_messages: u64,
    pub dtmf_digits: u64,
    pub backend_closes: u64,
    pub carrier_closes: u64,
    pub trust_fallbacks: u64,
    pub tls: HandshakeCounts,
    pub recent_errors: Vec<ErrorRecord>,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

#[inline]
fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl BridgeStats {
    pub fn new(max_recent_errors: usize) -> Self {
        Self {
            connection_attempts: AtomicU64::new(0),
            connection_successes: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            frames_backend_to_carrier: AtomicU64::new(0),
            frames_carrier_to_backend: AtomicU64::new(0),
            bytes_backend_to_carrier: AtomicU64::new(0),
            bytes_carrier_to_backend: AtomicU64::new(0),
            media_events_sent: AtomicU64::new(0),
            amplified_frames: AtomicU64::new(0),
            clipped_samples: AtomicU64::new(0),
            dropped_sends: AtomicU64::new(0),
            parse_misses: AtomicU64::new(0),
            audio_errors: AtomicU64::new(0),
            control_messages: AtomicU64::new(0),
            dtmf_digits: AtomicU64::new(0),
            backend_closes: AtomicU64::new(0),
            carrier_closes: AtomicU64::new(0),
            trust_fallbacks: AtomicU64::new(0),
            recent_errors: Mutex::new(VecDeque::with_capacity(max_recent_errors.min(64))),
            max_recent_errors,
        }
    }

    /// Push an error, evicting the oldest once the ring is full.
    pub fn record_error(&self, error: &BridgeError) {
        if error.category() == ErrorCategory::Audio {
            bump(&self.audio_errors);
        }
        if self.max_recent_errors == 0 {
            return;
        }

        let record = ErrorRecord {
            timestamp_ms: (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            category: error.category(),
            message: error.to_string(),
        };

        let mut ring = self.recent_errors.lock();
        while ring.len() >= self.max_recent_errors {
            ring.pop_front();
        }
        ring.push_back(record);
    }

    pub fn record_close(&self, side: ConnectionSide) {
        match side {
            ConnectionSide::Backend => bump(&self.backend_closes),
            ConnectionSide::Carrier => bump(&self.carrier_closes),
        }
    }

    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.recent_errors.lock().iter().cloned().collect()
    }

    pub fn snapshot(
        &self,
        session_id: &str,
        state: SessionState,
        tls: HandshakeCounts,
    ) -> StatsSnapshot {
        StatsSnapshot {
            session_id: session_id.to_string(),
            state,
            connection_attempts: load(&self.connection_attempts),
            connection_successes: load(&self.connection_successes),
            connection_failures: load(&self.connection_failures),
            frames_backend_to_carrier: load(&self.frames_backend_to_carrier),
            frames_carrier_to_backend: load(&self.frames_carrier_to_backend),
            bytes_backend_to_carrier: load(&self.bytes_backend_to_carrier),
            bytes_carrier_to_backend: load(&self.bytes_carrier_to_backend),
            media_events_sent: load(&self.media_events_sent),
            amplified_frames: load(&self.amplified_frames),
            clipped_samples: load(&self.clipped_samples),
            dropped_sends: load(&self.dropped_sends),
            parse_misses: load(&self.parse_misses),
            audio_errors: load(&self.audio_errors),
            control_messages: load(&self.control_messages),
            dtmf_digits: load(&self.dtmf_digits),
            backend_closes: load(&self.backend_closes),
            carrier_closes: load(&self.carrier_closes),
            trust_fallbacks: load(&self.trust_fallbacks),
            tls,
            recent_errors: self.recent_errors(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::ProtocolError;

    #[test]
    fn test_ring_evicts_oldest() {
        let stats = BridgeStats::new(3);
        for i in 0..5 {
            stats.record_error(&BridgeError::Transport(format!("e{i}")));
        }

        let messages: Vec<String> = stats
            .recent_errors()
            .into_iter()
            .map(|r| r.message)
            .collect();
        assert_eq!(
            messages,
            vec![
                "Transport error: e2",
                "Transport error: e3",
                "Transport error: e4"
            ]
        );
    }

    #[test]
    fn test_zero_capacity_ring_keeps_nothing() {
        let stats = BridgeStats::new(0);
        stats.record_error(&BridgeError::Cancelled);
        assert!(stats.recent_errors().is_empty());
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = BridgeStats::new(10);
        bump(&stats.connection_attempts);
        add(&stats.clipped_samples, 7);
        stats.record_close(ConnectionSide::Carrier);
        stats.record_error(&BridgeError::from(ProtocolError::MissingEvent));

        let snap = stats.snapshot("s-1", SessionState::Active, HandshakeCounts::default());
        assert_eq!(snap.session_id, "s-1");
        assert_eq!(snap.connection_attempts, 1);
        assert_eq!(snap.clipped_samples, 7);
        assert_eq!(snap.carrier_closes, 1);
        assert_eq!(snap.backend_closes, 0);
        assert_eq!(snap.recent_errors.len(), 1);
        assert_eq!(snap.recent_errors[0].category, ErrorCategory::Protocol);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let stats = BridgeStats::new(1);
        let snap = stats.snapshot("s", SessionState::Idle, HandshakeCounts::default());
        let json = serde_json::to_value(&snap).unwrap();

        assert_eq!(json["state"], "idle");
        assert_eq!(json["droppedSends"], 0);
        assert_eq!(json["tls"]["pinningFailures"], 0);
    }
}
