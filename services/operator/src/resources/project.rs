use serde::{Deserialize, Serialize};
use tfo_id::{ProjectId, TeamId};

use super::{
    DeletionPolicy, IdOrName, RecordStatus, ResourceKind, SecretKeyRef, Spec, ValidationError,
};
use crate::remote::ProjectAccess;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    pub name: String,
    pub organization: String,
    pub token: SecretKeyRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(default)]
    pub team_access: Vec<ProjectTeamAccessSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectTeamAccessSpec {
    pub team: IdOrName<TeamId>,
    pub access: ProjectAccess,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    pub observed_generation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub name: String,
}

impl RecordStatus for ProjectStatus {
    fn observed_generation(&self) -> u64 {
        self.observed_generation
    }

    fn set_observed_generation(&mut self, generation: u64) {
        self.observed_generation = generation;
    }
}

impl Spec for ProjectSpec {
    type Status = ProjectStatus;

    const KIND: ResourceKind = ResourceKind::Project;
    const DELETION_POLICIES: &'static [DeletionPolicy] =
        &[DeletionPolicy::Retain, DeletionPolicy::Soft];

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
        if self.name.is_empty() {
            return Err(ValidationError::new("name", "must not be empty"));
        }
        for (i, entry) in self.team_access.iter().enumerate() {
            entry.team.check(&format!("teamAccess[{i}].team"))?;
        }
        Ok(())
    }
}
