//! Change notifications
//!
//! Observers surface human-readable change notifications through an
//! [`EventRecorder`]. One event is emitted per logical change category,
//! never per field.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// Sink for change notifications
pub trait EventRecorder: Send + Sync {
    /// Record one event; `reason` names the emitting observer
    fn event(&self, reason: &str, message: &str);
}

/// A recorded event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedEvent {
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Recorder that keeps events in memory
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Messages recorded so far, in order
    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|event| event.message.clone())
            .collect()
    }

    /// Drop recorded events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventRecorder for InMemoryRecorder {
    fn event(&self, reason: &str, message: &str) {
        self.events.lock().push(RecordedEvent {
            reason: reason.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// Recorder that forwards events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRecorder;

impl EventRecorder for LoggingRecorder {
    fn event(&self, reason: &str, message: &str) {
        info!(reason = %reason, "{}", message);
    }
}

/// Forward every event to both recorders
impl<A: EventRecorder, B: EventRecorder> EventRecorder for (A, B) {
    fn event(&self, reason: &str, message: &str) {
        self.0.event(reason, message);
        self.1.event(reason, message);
    }
}
