//! Event sink: how hosts observe envelope mutations

use std::sync::Mutex;

use envelope_types::EnvelopeEvent;

/// Host-implemented subscriber for the envelope event stream.
///
/// The orchestrator publishes while the envelope's record lock is held,
/// so events for one envelope arrive in mutation order. Implementations
/// should hand off quickly rather than block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &EnvelopeEvent);
}

/// Discards every event; the default when the host does not subscribe
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn publish(&self, _event: &EnvelopeEvent) {}
}

/// Buffers published events for inspection in tests
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<EnvelopeEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far
    pub fn events(&self) -> Vec<EnvelopeEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Wire names of everything published so far, in publish order
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.name()).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.events.lock() {
            guard.clear();
        }
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, event: &EnvelopeEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envelope_types::EnvelopeId;

    #[test]
    fn test_recording_sink_keeps_publish_order() {
        let sink = RecordingEventSink::new();
        sink.publish(&EnvelopeEvent::EnvelopeLocked {
            envelope_id: EnvelopeId::new("env-1"),
        });
        sink.publish(&EnvelopeEvent::EnvelopeSettled {
            envelope_id: EnvelopeId::new("env-1"),
        });

        assert_eq!(sink.names(), vec!["envelope_locked", "envelope_settled"]);

        sink.clear();
        assert!(sink.events().is_empty());
    }
}
