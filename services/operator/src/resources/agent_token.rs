use serde::{Deserialize, Serialize};
use tfo_id::AgentPoolId;

use super::agent_pool::{AgentTokenDeclaration, TokenStatus};
use super::{
    AgentPoolRef, DeletionPolicy, IdOrName, RecordStatus, ResourceKind, SecretKeyRef, Spec,
    ValidationError,
};

/// Who owns the pool's token set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagementPolicy {
    /// Only tokens this record created are touched.
    #[default]
    Merge,

    /// Tokens not declared here are deleted from the pool.
    Owner,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTokenSpec {
    pub organization: String,
    pub token: SecretKeyRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    pub agent_pool: IdOrName<AgentPoolId>,
    pub agent_tokens: Vec<AgentTokenDeclaration>,
    #[serde(default)]
    pub management_policy: ManagementPolicy,

    /// Secret the token values are written to.
    pub secret_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTokenStatus {
    pub observed_generation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_pool: Option<AgentPoolRef>,
    #[serde(default)]
    pub agent_tokens: Vec<TokenStatus>,
}

impl RecordStatus for AgentTokenStatus {
    fn observed_generation(&self) -> u64 {
        self.observed_generation
    }

    fn set_observed_generation(&mut self, generation: u64) {
        self.observed_generation = generation;
    }
}

impl Spec for AgentTokenSpec {
    type Status = AgentTokenStatus;

    const KIND: ResourceKind = ResourceKind::AgentToken;
    const DELETION_POLICIES: &'static [DeletionPolicy] =
        &[DeletionPolicy::Retain, DeletionPolicy::Destroy];

    fn organization(&self) -> &str {
        &self.organization
    }

    fn credentials(&self) -> &SecretKeyRef {
        &self.token
    }

    fn deletion_policy(&self) -> Option<DeletionPolicy> {
        self.deletion_policy
    }

    fn validate(&self) -> Result<(), ValidationError> {
        self.agent_pool.check("agentPool")?;
        if self.secret_name.is_empty() {
            return Err(ValidationError::new("secretName", "must not be empty"));
        }
        if self.agent_tokens.is_empty() {
            return Err(ValidationError::new(
                "agentTokens",
                "at least one token must be declared",
            ));
        }
        super::agent_pool::check_token_names(&self.agent_tokens)
    }
}
