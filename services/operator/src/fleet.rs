//! Agent worker fleet interface and in-memory implementation.
//!
//! The fleet interface abstracts the deployment that runs agents against a
//! pool:
//! - Creating or updating the deployment
//! - Reading and patching its replica count
//! - Removing it
//!
//! An in-memory implementation is provided for testing and development.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use thiserror::Error;
use tfo_id::AgentPoolId;
use tokio::sync::RwLock;
use tracing::info;

use crate::resources::RecordKey;

pub const DEFAULT_AGENT_IMAGE: &str = "hashicorp/tfc-agent:latest";

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("agent deployment for {0} not found")]
    NotFound(RecordKey),

    #[error("fleet backend error: {0}")]
    Backend(String),
}

pub type FleetResult<T> = Result<T, FleetError>;

/// Desired shape of a pool's agent deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetSpec {
    pub pool_id: AgentPoolId,
    pub image: String,
    pub labels: BTreeMap<String, String>,

    /// Secret holding the agent token values.
    pub token_secret: String,

    /// `None` leaves the current replica count alone.
    pub replicas: Option<i32>,
}

/// Deployment name for a pool record.
pub fn deployment_name(key: &RecordKey) -> String {
    format!("agents-of-{}", key.name)
}

#[async_trait]
pub trait WorkerFleet: Send + Sync {
    /// Create or update the deployment.
    async fn ensure(&self, key: &RecordKey, spec: &FleetSpec) -> FleetResult<()>;

    /// Current replica count, `None` when no deployment exists.
    async fn replicas(&self, key: &RecordKey) -> FleetResult<Option<i32>>;

    async fn scale(&self, key: &RecordKey, replicas: i32) -> FleetResult<()>;

    /// Remove the deployment; a missing deployment is not an error.
    async fn delete(&self, key: &RecordKey) -> FleetResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deployment {
    pub name: String,
    pub spec: FleetSpec,
    pub replicas: i32,
}

/// In-memory fleet for testing and development.
#[derive(Default)]
pub struct MemoryFleet {
    deployments: RwLock<HashMap<RecordKey, Deployment>>,
}

impl MemoryFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn deployment(&self, key: &RecordKey) -> Option<Deployment> {
        self.deployments.read().await.get(key).cloned()
    }
}

#[async_trait]
impl WorkerFleet for MemoryFleet {
    async fn ensure(&self, key: &RecordKey, spec: &FleetSpec) -> FleetResult<()> {
        let mut deployments = self.deployments.write().await;
        match deployments.get_mut(key) {
            Some(deployment) => {
                if let Some(replicas) = spec.replicas {
                    deployment.replicas = replicas;
                }
                deployment.spec = spec.clone();
            }
            None => {
                let name = deployment_name(key);
                info!(
                    deployment = %name,
                    pool_id = %spec.pool_id,
                    image = %spec.image,
                    "[MEMORY] Creating agent deployment"
                );
                deployments.insert(
                    key.clone(),
                    Deployment {
                        name,
                        spec: spec.clone(),
                        replicas: spec.replicas.unwrap_or(1),
                    },
                );
            }
        }
        Ok(())
    }

    async fn replicas(&self, key: &RecordKey) -> FleetResult<Option<i32>> {
        Ok(self
            .deployments
            .read()
            .await
            .get(key)
            .map(|deployment| deployment.replicas))
    }

    async fn scale(&self, key: &RecordKey, replicas: i32) -> FleetResult<()> {
        let mut deployments = self.deployments.write().await;
        let deployment = deployments
            .get_mut(key)
            .ok_or_else(|| FleetError::NotFound(key.clone()))?;
        info!(
            deployment = %deployment.name,
            from = deployment.replicas,
            to = replicas,
            "[MEMORY] Scaling agent deployment"
        );
        deployment.replicas = replicas;
        Ok(())
    }

    async fn delete(&self, key: &RecordKey) -> FleetResult<()> {
        if let Some(deployment) = self.deployments.write().await.remove(key) {
            info!(deployment = %deployment.name, "[MEMORY] Deleted agent deployment");
        }
        Ok(())
    }
}
