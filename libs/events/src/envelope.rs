//! Event envelope - the record of one thing that happened to one record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EventType, ObjectRef};

/// A single operator event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Recorder-assigned, monotonic sequence number.
    pub sequence: u64,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    /// Normal or Warning.
    pub event_type: EventType,

    /// Machine-readable reason (see [`crate::reasons`]).
    pub reason: String,

    /// Human-readable message.
    pub message: String,

    /// The record this event is about.
    pub object: ObjectRef,
}

impl Event {
    /// Create a Normal event. The recorder assigns the sequence.
    pub fn normal(object: ObjectRef, reason: &str, message: impl Into<String>) -> Self {
        Self::new(EventType::Normal, object, reason, message)
    }

    /// Create a Warning event. The recorder assigns the sequence.
    pub fn warning(object: ObjectRef, reason: &str, message: impl Into<String>) -> Self {
        Self::new(EventType::Warning, object, reason, message)
    }

    fn new(
        event_type: EventType,
        object: ObjectRef,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            sequence: 0,
            occurred_at: Utc::now(),
            event_type,
            reason: reason.to_string(),
            message: message.into(),
            object,
        }
    }

    pub fn is_warning(&self) -> bool {
        self.event_type == EventType::Warning
    }
}
