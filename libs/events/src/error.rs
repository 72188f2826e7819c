use thiserror::Error;

/// Failure to parse an event field from its wire form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("event type must be Normal or Warning, got {0:?}")]
    UnknownEventType(String),
}
