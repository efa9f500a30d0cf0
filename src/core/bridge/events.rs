//! Lifecycle notifications emitted by a bridge session.
//!
//! Handlers are registered per event name and run synchronously, in
//! registration order, on the task that emits the event. A panicking handler
//! is logged and skipped; the remaining handlers still run.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;

use super::base::{ConnectionSide, ErrorCategory};

/// Names of the notification channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Connected,
    Disconnected,
    Error,
    AudioReceived,
    MessageProcessed,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Connected => "connected",
            EventName::Disconnected => "disconnected",
            EventName::Error => "error",
            EventName::AudioReceived => "audioReceived",
            EventName::MessageProcessed => "messageProcessed",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session (or one of its sockets) went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called
    Requested,
    /// The carrier sent a `stop` event
    CarrierStop,
    /// A socket closed on its own
    SocketClosed(ConnectionSide),
}

/// A notification from a bridge session.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// A side's connection is open
    Connected { side: ConnectionSide },
    /// Emitted once per session
    Disconnected { reason: DisconnectReason },
    /// A non-fatal error was recorded
    Error {
        category: ErrorCategory,
        message: String,
    },
    /// Audio arrived from a side; `bytes` is the decoded PCM length
    AudioReceived { side: ConnectionSide, bytes: usize },
    /// A non-audio message was handled
    MessageProcessed {
        side: ConnectionSide,
        kind: String,
        /// Tag-specific detail, e.g. the DTMF digit
        detail: Option<String>,
    },
}

impl BridgeEvent {
    pub fn name(&self) -> EventName {
        match self {
            BridgeEvent::Connected { .. } => EventName::Connected,
            BridgeEvent::Disconnected { .. } => EventName::Disconnected,
            BridgeEvent::Error { .. } => EventName::Error,
            BridgeEvent::AudioReceived { .. } => EventName::AudioReceived,
            BridgeEvent::MessageProcessed { .. } => EventName::MessageProcessed,
        }
    }
}

/// Callback type for bridge events.
pub type EventHandler = Arc<dyn Fn(&BridgeEvent) + Send + Sync>;

/// Handlers keyed by event name.
#[derive(Default)]
pub struct EventRegistry {
    handlers: RwLock<HashMap<EventName, Vec<EventHandler>>>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("EventRegistry")
            .field("channels", &handlers.len())
            .finish()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; it runs after previously registered ones.
    pub fn on<F>(&self, name: EventName, handler: F)
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        self.handlers.write().entry(name).or_default().push(handler);
    }

    /// Remove every handler for `name`.
    pub fn clear(&self, name: EventName) {
        self.handlers.write().remove(&name);
    }

    pub fn handler_count(&self, name: EventName) -> usize {
        self.handlers.read().get(&name).map_or(0, Vec::len)
    }

    /// Run every handler registered for the event's name.
    ///
    /// The handler list is copied before invoking, so handlers may register
    /// further handlers without deadlocking.
    pub fn emit(&self, event: &BridgeEvent) {
        let handlers = match self.handlers.read().get(&event.name()) {
            Some(list) => list.clone(),
            None => return,
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::warn!("Handler for '{}' panicked; continuing", event.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_handlers_run_in_registration_order() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = seen.clone();
            registry.on(EventName::Connected, move |_| seen.lock().push(i));
        }

        registry.emit(&BridgeEvent::Connected {
            side: ConnectionSide::Backend,
        });
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let registry = EventRegistry::new();
        let calls = Arc::new(Mutex::new(0));

        registry.on(EventName::Error, |_| panic!("handler failure"));
        let c = calls.clone();
        registry.on(EventName::Error, move |_| *c.lock() += 1);

        registry.emit(&BridgeEvent::Error {
            category: ErrorCategory::Protocol,
            message: "bad frame".into(),
        });
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn test_emit_only_reaches_matching_channel() {
        let registry = EventRegistry::new();
        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        registry.on(EventName::Disconnected, move |_| *c.lock() += 1);

        registry.emit(&BridgeEvent::AudioReceived {
            side: ConnectionSide::Carrier,
            bytes: 10,
        });
        assert_eq!(*calls.lock(), 0);

        registry.emit(&BridgeEvent::Disconnected {
            reason: DisconnectReason::Requested,
        });
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn test_handler_may_register_during_emit() {
        let registry = Arc::new(EventRegistry::new());
        let r = registry.clone();
        registry.on(EventName::Connected, move |_| {
            r.on(EventName::Error, |_| {});
        });

        registry.emit(&BridgeEvent::Connected {
            side: ConnectionSide::Carrier,
        });
        assert_eq!(registry.handler_count(EventName::Error), 1);

        registry.clear(EventName::Error);
        assert_eq!(registry.handler_count(EventName::Error), 0);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(EventName::AudioReceived.to_string(), "audioReceived");
        assert_eq!(EventName::MessageProcessed.as_str(), "messageProcessed");
    }
}
