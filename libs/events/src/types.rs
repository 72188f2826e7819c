//! Event types, reasons and the involved-record reference.

use serde::{Deserialize, Serialize};

use crate::EventError;

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EventType {
    /// Progress worth telling an operator about.
    #[default]
    Normal,
    /// Something failed or is blocked and may need a human.
    Warning,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(EventType::Normal),
            "warning" => Ok(EventType::Warning),
            _ => Err(EventError::UnknownEventType(s.to_string())),
        }
    }
}

/// Reference to the record an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Record kind, e.g. `Workspace`.
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

// =============================================================================
// Reason Constants
// =============================================================================

/// All event reasons as constants.
pub mod reasons {
    // Convergence
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    pub const CREATED: &str = "Created";
    pub const RECREATED: &str = "Recreated";
    pub const UPDATED: &str = "Updated";

    // Deletion
    pub const RETAINED: &str = "Retained";
    pub const DELETED: &str = "Deleted";
    pub const DELETION_BLOCKED: &str = "DeletionBlocked";
    pub const DELETION_FAILED: &str = "DeletionFailed";
    pub const DESTROY_RUN_STARTED: &str = "DestroyRunStarted";
    pub const DESTROY_RUN_UNSUCCESSFUL: &str = "DestroyRunUnsuccessful";

    // Runs
    pub const RUN_STARTED: &str = "RunStarted";
    pub const RUN_UNSUCCESSFUL: &str = "RunUnsuccessful";
    pub const RUN_RETRIED: &str = "RunRetried";
    pub const OUTPUTS_COLLECTED: &str = "OutputsCollected";
    pub const RETRY_LIMIT_REACHED: &str = "RetryLimitReached";

    // Autoscaling
    pub const SCALED: &str = "Scaled";
    pub const SCALING_DEFERRED: &str = "ScalingDeferred";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_parse() {
        assert_eq!("Warning".parse::<EventType>().unwrap(), EventType::Warning);
        assert_eq!("normal".parse::<EventType>().unwrap(), EventType::Normal);
        assert!(matches!(
            "fatal".parse::<EventType>(),
            Err(EventError::UnknownEventType(_))
        ));
    }

    #[test]
    fn test_object_ref_display() {
        let object = ObjectRef::new("Workspace", "default", "networking");
        assert_eq!(object.to_string(), "Workspace/default/networking");
    }
}
