use serde::{Deserialize, Serialize};
use tfo_id::AgentPoolId;

use super::{
    AgentPoolRef, DeletionPolicy, IdOrName, RecordStatus, ResourceKind, SecretKeyRef, Spec,
    ValidationError,
};

/// Publishes pending-run gauges for one agent pool. Owns no remote object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunsCollectorSpec {
    pub organization: String,
    pub token: SecretKeyRef,
    pub agent_pool: IdOrName<AgentPoolId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunsCollectorStatus {
    pub observed_generation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_pool: Option<AgentPoolRef>,
}

impl RecordStatus for RunsCollectorStatus {
    fn observed_generation(&self) -> u64 {
        self.observed_generation
    }

    fn set_observed_generation(&mut self, generation: u64) {
        self.observed_generation = generation;
    }
}

impl Spec for RunsCollectorSpec {
    type Status = RunsCollectorStatus;

    const KIND: ResourceKind = ResourceKind::RunsCollector;
    const DELETION_POLICIES: &'static [DeletionPolicy] = &[DeletionPolicy::Retain];

    fn organization(&self) -> &str {
        &self.organization
    }

    fn credentials(&self) -> &SecretKeyRef {
        &self.token
    }

    fn deletion_policy(&self) -> Option<DeletionPolicy> {
        None
    }

    fn validate(&self) -> Result<(), ValidationError> {
        self.agent_pool.check("agentPool")
    }
}
