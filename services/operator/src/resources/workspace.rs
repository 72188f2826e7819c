//! Workspace records.
//!
//! A workspace record owns the remote workspace and its settings: tags,
//! variables, team access, run triggers, notifications and variable set
//! attachments. It can also start runs on demand and mirrors outputs of
//! applied runs into the record's namespace.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tfo_id::{AgentPoolId, ProjectId, TeamId, VariableSetId, WorkspaceId};
use tfo_reconcile::{RetryPolicy, RetryStatus};

use super::{
    check_retry_policy, DeletionPolicy, IdOrName, RecordStatus, ResourceKind, RunRecord,
    SecretKeyRef, Spec, ValidationError,
};
use crate::remote::{ExecutionMode, NotificationDestination, WorkspaceAccess};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMethod {
    Auto,
    #[default]
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    pub name: String,
    pub organization: String,
    pub token: SecretKeyRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_version: Option<String>,
    #[serde(default)]
    pub working_directory: String,
    #[serde(default)]
    pub apply_method: ApplyMethod,
    #[serde(default = "default_true")]
    pub allow_destroy_plan: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_pool: Option<IdOrName<AgentPoolId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<IdOrName<ProjectId>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub terraform_variables: Vec<VariableSpec>,
    #[serde(default)]
    pub environment_variables: Vec<VariableSpec>,
    #[serde(default)]
    pub run_triggers: Vec<IdOrName<WorkspaceId>>,
    #[serde(default)]
    pub notifications: Vec<NotificationSpec>,
    #[serde(default)]
    pub team_access: Vec<TeamAccessSpec>,
    #[serde(default)]
    pub variable_sets: Vec<IdOrName<VariableSetId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Read the value from a secret key instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<SecretKeyRef>,
    #[serde(default)]
    pub hcl: bool,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub destination_type: NotificationDestination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub triggers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamAccessSpec {
    pub team: IdOrName<TeamId>,
    pub access: WorkspaceAccess,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    pub observed_generation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_version: Option<String>,

    /// Latest apply-class run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunRecord>,

    /// Latest plan-only run started by a command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<RunRecord>,

    /// Destroy run started on teardown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroy_run: Option<RunRecord>,
    #[serde(default)]
    pub retry: RetryStatus,
}

impl RecordStatus for WorkspaceStatus {
    fn observed_generation(&self) -> u64 {
        self.observed_generation
    }

    fn set_observed_generation(&mut self, generation: u64) {
        self.observed_generation = generation;
    }
}

impl Spec for WorkspaceSpec {
    type Status = WorkspaceStatus;

    const KIND: ResourceKind = ResourceKind::Workspace;
    const DELETION_POLICIES: &'static [DeletionPolicy] = &[
        DeletionPolicy::Retain,
        DeletionPolicy::Soft,
        DeletionPolicy::Destroy,
        DeletionPolicy::Force,
    ];

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
        match (&self.agent_pool, self.execution_mode) {
            (Some(pool), ExecutionMode::Agent) => pool.check("agentPool")?,
            (None, ExecutionMode::Agent) => {
                return Err(ValidationError::new(
                    "agentPool",
                    "required when executionMode is agent",
                ))
            }
            (Some(_), _) => {
                return Err(ValidationError::new(
                    "agentPool",
                    "only allowed when executionMode is agent",
                ))
            }
            (None, _) => {}
        }
        if let Some(project) = &self.project {
            project.check("project")?;
        }

        let mut seen = BTreeSet::new();
        for (field, variables) in [
            ("terraformVariables", &self.terraform_variables),
            ("environmentVariables", &self.environment_variables),
        ] {
            seen.clear();
            for (i, variable) in variables.iter().enumerate() {
                if variable.name.is_empty() || !seen.insert(variable.name.as_str()) {
                    return Err(ValidationError::new(
                        format!("{field}[{i}].name"),
                        "must be non-empty and unique",
                    ));
                }
                if variable.value.is_some() && variable.value_from.is_some() {
                    return Err(ValidationError::new(
                        format!("{field}[{i}]"),
                        "value and valueFrom are mutually exclusive",
                    ));
                }
            }
        }

        for (i, trigger) in self.run_triggers.iter().enumerate() {
            trigger.check(&format!("runTriggers[{i}]"))?;
        }
        for (i, set) in self.variable_sets.iter().enumerate() {
            set.check(&format!("variableSets[{i}]"))?;
        }
        for (i, access) in self.team_access.iter().enumerate() {
            access.team.check(&format!("teamAccess[{i}].team"))?;
        }

        let mut names = BTreeSet::new();
        for (i, notification) in self.notifications.iter().enumerate() {
            if !names.insert(notification.name.as_str()) {
                return Err(ValidationError::new(
                    format!("notifications[{i}].name"),
                    "must be unique",
                ));
            }
            if notification.destination_type != NotificationDestination::Email
                && notification.url.is_none()
            {
                return Err(ValidationError::new(
                    format!("notifications[{i}].url"),
                    "required for this destination type",
                ));
            }
        }

        check_retry_policy(self.retry_policy.as_ref())
    }
}
