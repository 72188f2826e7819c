//! Event recorders.
//!
//! The operator records events through the [`EventRecorder`] trait. The
//! [`MemoryRecorder`] keeps a bounded ring of recent events for the HTTP
//! surface and mirrors every event into the tracing log.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::{info, warn};

use crate::{Event, EventType, ObjectRef};

/// Sink for operator events.
pub trait EventRecorder: Send + Sync {
    /// Record an event. Must not fail and must not block for long.
    fn record(&self, event: Event);

    fn normal(&self, object: ObjectRef, reason: &str, message: String) {
        self.record(Event::normal(object, reason, message));
    }

    fn warning(&self, object: ObjectRef, reason: &str, message: String) {
        self.record(Event::warning(object, reason, message));
    }
}

/// Default number of events kept by [`MemoryRecorder`].
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Bounded in-memory recorder.
pub struct MemoryRecorder {
    capacity: usize,
    inner: Mutex<RecorderInner>,
}

struct RecorderInner {
    next_sequence: u64,
    events: VecDeque<Event>,
}

impl MemoryRecorder {
    /// Create a recorder keeping at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(RecorderInner {
                next_sequence: 1,
                events: VecDeque::new(),
            }),
        }
    }

    /// Snapshot of the retained events, oldest first.
    pub fn events(&self) -> Vec<Event> {
        match self.inner.lock() {
            Ok(inner) => inner.events.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().events.iter().cloned().collect(),
        }
    }

    /// Retained events about one record, oldest first.
    pub fn events_for(&self, object: &ObjectRef) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| &e.object == object)
            .collect()
    }

    /// Retained events with the given reason.
    pub fn with_reason(&self, reason: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.reason == reason)
            .collect()
    }
}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, mut event: Event) {
        match event.event_type {
            EventType::Normal => info!(
                object = %event.object,
                reason = %event.reason,
                message = %event.message,
                "event"
            ),
            EventType::Warning => warn!(
                object = %event.object,
                reason = %event.reason,
                message = %event.message,
                "event"
            ),
        }

        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        event.sequence = inner.next_sequence;
        inner.next_sequence += 1;
        if inner.events.len() == self.capacity {
            inner.events.pop_front();
        }
        inner.events.push_back(event);
    }
}
