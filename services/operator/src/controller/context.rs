use std::sync::Arc;

use tfo_events::EventRecorder;

use crate::fleet::WorkerFleet;
use crate::metrics::Metrics;
use crate::remote::ClientFactory;
use crate::resources::DeletionPolicy;
use crate::secrets::SecretStore;

/// Operator-wide settings the reconcilers consult.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Applied when a record declares no deletion policy.
    pub default_deletion_policy: DeletionPolicy,

    /// Cool-down for pools that configure none.
    pub autoscaling_cooldown_seconds: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_deletion_policy: DeletionPolicy::Retain,
            autoscaling_cooldown_seconds: tfo_reconcile::DEFAULT_COOLDOWN_SECONDS,
        }
    }
}

/// Collaborators shared by every controller.
#[derive(Clone)]
pub struct Context {
    pub clients: Arc<dyn ClientFactory>,
    pub secrets: Arc<dyn SecretStore>,
    pub fleet: Arc<dyn WorkerFleet>,
    pub recorder: Arc<dyn EventRecorder>,
    pub metrics: Arc<Metrics>,
    pub settings: Settings,
}
