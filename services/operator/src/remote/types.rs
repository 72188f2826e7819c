//! Remote object shapes.
//!
//! These mirror the subset of the platform's objects the convergence loops
//! read and write.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tfo_id::{
    AgentPoolId, AgentTokenId, ConfigurationVersionId, NotificationId, ProjectId,
    ProjectTeamAccessId, RunId, RunTriggerId, StateVersionOutputId, TeamAccessId, TeamId,
    VariableId, VariableSetId, WorkspaceId,
};

// =============================================================================
// Pagination
// =============================================================================

/// One page of a list call.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,

    /// Page number to request next, `None` on the last page.
    pub next_page: Option<u32>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page: None,
        }
    }
}

// =============================================================================
// Runs
// =============================================================================

/// Run lifecycle status as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Fetching,
    FetchingCompleted,
    PrePlanRunning,
    PrePlanCompleted,
    Queuing,
    PlanQueued,
    Planning,
    Planned,
    CostEstimating,
    CostEstimated,
    PolicyChecking,
    PolicyOverride,
    PolicySoftFailed,
    PolicyChecked,
    Confirmed,
    PostPlanRunning,
    PostPlanCompleted,
    PostPlanAwaitingDecision,
    PlannedAndFinished,
    PlannedAndSaved,
    ApplyQueued,
    QueuingApply,
    PreApplyRunning,
    PreApplyCompleted,
    Applying,
    Applied,
    Discarded,
    Errored,
    Canceled,
    ForceCanceled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Fetching => "fetching",
            RunStatus::FetchingCompleted => "fetching_completed",
            RunStatus::PrePlanRunning => "pre_plan_running",
            RunStatus::PrePlanCompleted => "pre_plan_completed",
            RunStatus::Queuing => "queuing",
            RunStatus::PlanQueued => "plan_queued",
            RunStatus::Planning => "planning",
            RunStatus::Planned => "planned",
            RunStatus::CostEstimating => "cost_estimating",
            RunStatus::CostEstimated => "cost_estimated",
            RunStatus::PolicyChecking => "policy_checking",
            RunStatus::PolicyOverride => "policy_override",
            RunStatus::PolicySoftFailed => "policy_soft_failed",
            RunStatus::PolicyChecked => "policy_checked",
            RunStatus::Confirmed => "confirmed",
            RunStatus::PostPlanRunning => "post_plan_running",
            RunStatus::PostPlanCompleted => "post_plan_completed",
            RunStatus::PostPlanAwaitingDecision => "post_plan_awaiting_decision",
            RunStatus::PlannedAndFinished => "planned_and_finished",
            RunStatus::PlannedAndSaved => "planned_and_saved",
            RunStatus::ApplyQueued => "apply_queued",
            RunStatus::QueuingApply => "queuing_apply",
            RunStatus::PreApplyRunning => "pre_apply_running",
            RunStatus::PreApplyCompleted => "pre_apply_completed",
            RunStatus::Applying => "applying",
            RunStatus::Applied => "applied",
            RunStatus::Discarded => "discarded",
            RunStatus::Errored => "errored",
            RunStatus::Canceled => "canceled",
            RunStatus::ForceCanceled => "force_canceled",
        }
    }

    /// The run finished and did what it was asked to do.
    pub fn is_successful(&self) -> bool {
        matches!(
            self,
            RunStatus::Applied | RunStatus::PlannedAndFinished | RunStatus::PlannedAndSaved
        )
    }

    /// The run finished without doing what it was asked to do.
    pub fn is_unsuccessful(&self) -> bool {
        matches!(
            self,
            RunStatus::Errored
                | RunStatus::Canceled
                | RunStatus::ForceCanceled
                | RunStatus::Discarded
        )
    }

    pub fn is_final(&self) -> bool {
        self.is_successful() || self.is_unsuccessful()
    }

    /// The run is parked until a human confirms, overrides or discards it.
    pub fn awaits_user(&self) -> bool {
        matches!(
            self,
            RunStatus::Planned
                | RunStatus::CostEstimated
                | RunStatus::PolicyChecked
                | RunStatus::PolicyOverride
                | RunStatus::PolicySoftFailed
                | RunStatus::PostPlanAwaitingDecision
                | RunStatus::PostPlanCompleted
        )
    }

    /// Statuses that mark a workspace's current run as queued or executing
    /// on platforms without run-level filtering.
    pub const QUEUED_OR_RUNNING: [RunStatus; 5] = [
        RunStatus::Pending,
        RunStatus::PlanQueued,
        RunStatus::Planning,
        RunStatus::ApplyQueued,
        RunStatus::Applying,
    ];
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse status filter for run listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatusGroup {
    NonFinal,
    Final,
}

impl RunStatusGroup {
    pub fn contains(&self, status: RunStatus) -> bool {
        match self {
            RunStatusGroup::NonFinal => !status.is_final(),
            RunStatusGroup::Final => status.is_final(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub workspace_id: WorkspaceId,
    pub status: RunStatus,
    pub is_destroy: bool,
    pub plan_only: bool,
    pub refresh_only: bool,
    pub configuration_version_id: Option<ConfigurationVersionId>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub workspace_id: WorkspaceId,
    pub is_destroy: bool,
    pub plan_only: bool,
    pub refresh_only: bool,
    pub auto_apply: Option<bool>,
    pub configuration_version_id: Option<ConfigurationVersionId>,
    pub terraform_version: Option<String>,
    pub message: String,
}

impl RunOptions {
    /// A plain apply-class run against the workspace's latest configuration.
    pub fn new(workspace_id: WorkspaceId, message: impl Into<String>) -> Self {
        Self {
            workspace_id,
            is_destroy: false,
            plan_only: false,
            refresh_only: false,
            auto_apply: None,
            configuration_version_id: None,
            terraform_version: None,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunListOptions {
    pub organization: String,

    /// Only runs executing on these agent pools.
    pub agent_pool_names: Vec<String>,

    /// Only runs of this workspace.
    pub workspace_id: Option<WorkspaceId>,

    pub status_group: Option<RunStatusGroup>,
    pub page: u32,
}

// =============================================================================
// Agent Pools
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPool {
    pub id: AgentPoolId,
    pub name: String,
    pub organization: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentToken {
    pub id: AgentTokenId,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,

    /// Secret value, only present in the create response.
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

// =============================================================================
// Workspaces
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Remote,
    Local,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub organization: String,
    pub description: String,
    pub execution_mode: ExecutionMode,
    pub terraform_version: String,
    pub working_directory: String,
    pub auto_apply: bool,
    pub allow_destroy_plan: bool,
    pub agent_pool_id: Option<AgentPoolId>,
    pub project_id: Option<ProjectId>,
    pub tag_names: Vec<String>,
    pub current_run: Option<Run>,

    /// Number of resources under management in current state.
    pub resource_count: u32,
}

impl Workspace {
    pub fn has_run_history(&self) -> bool {
        self.current_run.is_some()
    }
}

/// Desired workspace settings. Create and update take the same shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceOptions {
    pub name: String,
    pub description: String,
    pub execution_mode: ExecutionMode,

    /// `None` leaves the platform default in place.
    pub terraform_version: Option<String>,
    pub working_directory: String,
    pub auto_apply: bool,
    pub allow_destroy_plan: bool,
    pub agent_pool_id: Option<AgentPoolId>,
    pub project_id: Option<ProjectId>,
}

impl WorkspaceOptions {
    /// True when `workspace` already carries these settings.
    pub fn matches(&self, workspace: &Workspace) -> bool {
        workspace.name == self.name
            && workspace.description == self.description
            && workspace.execution_mode == self.execution_mode
            && self
                .terraform_version
                .as_deref()
                .is_none_or(|version| version == workspace.terraform_version)
            && workspace.working_directory == self.working_directory
            && workspace.auto_apply == self.auto_apply
            && workspace.allow_destroy_plan == self.allow_destroy_plan
            && workspace.agent_pool_id == self.agent_pool_id
            && (self.project_id.is_none() || workspace.project_id == self.project_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceListOptions {
    /// Only workspaces whose current run has one of these statuses.
    pub current_run_statuses: Vec<RunStatus>,

    /// Only workspaces assigned to this pool.
    pub agent_pool_id: Option<AgentPoolId>,

    pub page: u32,
}

// =============================================================================
// Workspace Settings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableCategory {
    Terraform,
    Env,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: VariableId,
    pub key: String,

    /// `None` for sensitive variables; the platform never returns them.
    pub value: Option<String>,
    pub category: VariableCategory,
    pub hcl: bool,
    pub sensitive: bool,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableOptions {
    pub key: String,
    pub value: String,
    pub category: VariableCategory,
    pub hcl: bool,
    pub sensitive: bool,
    pub description: String,
}

impl VariableOptions {
    /// True when `variable` already carries these settings. Sensitive values
    /// cannot be read back, so only their metadata is compared.
    pub fn matches(&self, variable: &Variable) -> bool {
        variable.key == self.key
            && variable.category == self.category
            && variable.hcl == self.hcl
            && variable.sensitive == self.sensitive
            && variable.description == self.description
            && (self.sensitive || variable.value.as_deref() == Some(self.value.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceAccess {
    Read,
    Plan,
    Write,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamAccess {
    pub id: TeamAccessId,
    pub team_id: TeamId,
    pub access: WorkspaceAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationDestination {
    Generic,
    Email,
    Slack,
    #[serde(rename = "microsoft-teams")]
    MicrosoftTeams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfiguration {
    pub id: NotificationId,
    pub name: String,
    pub destination_type: NotificationDestination,
    pub url: Option<String>,
    pub enabled: bool,
    pub triggers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationOptions {
    pub name: String,
    pub destination_type: NotificationDestination,
    pub url: Option<String>,
    pub enabled: bool,
    pub triggers: Vec<String>,
}

impl NotificationOptions {
    pub fn matches(&self, notification: &NotificationConfiguration) -> bool {
        notification.name == self.name
            && notification.destination_type == self.destination_type
            && notification.url == self.url
            && notification.enabled == self.enabled
            && notification.triggers == self.triggers
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTrigger {
    pub id: RunTriggerId,
    pub workspace_id: WorkspaceId,
    pub sourceable_id: WorkspaceId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSet {
    pub id: VariableSetId,
    pub name: String,
    pub global: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateOutput {
    pub id: StateVersionOutputId,
    pub name: String,
    pub value: serde_json::Value,
    pub sensitive: bool,
}

// =============================================================================
// Configuration Versions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationStatus {
    Pending,
    Fetching,
    Uploaded,
    Archived,
    Errored,
}

impl ConfigurationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigurationStatus::Pending => "pending",
            ConfigurationStatus::Fetching => "fetching",
            ConfigurationStatus::Uploaded => "uploaded",
            ConfigurationStatus::Archived => "archived",
            ConfigurationStatus::Errored => "errored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationVersion {
    pub id: ConfigurationVersionId,
    pub workspace_id: WorkspaceId,
    pub status: ConfigurationStatus,
    pub auto_queue_runs: bool,

    /// Uploaded files, path to contents.
    #[serde(skip)]
    pub files: BTreeMap<String, String>,
}

// =============================================================================
// Projects
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub organization: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectAccess {
    Read,
    Write,
    Maintain,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectTeamAccess {
    pub id: ProjectTeamAccessId,
    pub team_id: TeamId,
    pub access: ProjectAccess,
}
