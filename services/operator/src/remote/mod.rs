//! Remote platform client seam.
//!
//! The convergence loops talk to the platform only through [`RemoteClient`].
//! A client is obtained per pass from a [`ClientFactory`] so credentials are
//! always resolved fresh from the record's secret.
//!
//! Two error values are part of the contract rather than failures:
//! [`RemoteError::NotFound`] (the object is already absent) and
//! [`RemoteError::NotSafeToDelete`] (dependents still exist).

mod factory;
mod memory;
mod types;

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use tfo_id::{
    AgentPoolId, AgentTokenId, ConfigurationVersionId, NotificationId, ProjectId,
    ProjectTeamAccessId, RunId, RunTriggerId, TeamAccessId, TeamId, VariableId, VariableSetId,
    WorkspaceId,
};
use thiserror::Error;

pub use factory::{ClientError, ClientFactory, ClientOptions, InMemoryClientFactory};
pub use memory::InMemoryRemote;
pub use types::*;

/// Errors returned by the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("resource not found")]
    NotFound,

    #[error("resource is not safe to delete: {0}")]
    NotSafeToDelete(String),

    #[error("name has already been taken: {0}")]
    NameTaken(String),

    #[error("unprocessable request: {0}")]
    Unprocessable(String),

    #[error("rate limited by the platform")]
    RateLimited,

    #[error("transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound)
    }

    pub fn is_not_safe_to_delete(&self) -> bool {
        matches!(self, RemoteError::NotSafeToDelete(_))
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Folds [`RemoteError::NotFound`] into `Ok(None)`.
pub trait RemoteResultExt<T> {
    fn found(self) -> RemoteResult<Option<T>>;
}

impl<T> RemoteResultExt<T> for RemoteResult<T> {
    fn found(self) -> RemoteResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(RemoteError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Drain a paginated list call, starting at page 1.
pub async fn collect_pages<T, F, Fut>(mut fetch: F) -> RemoteResult<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RemoteResult<Page<T>>>,
{
    let mut items = Vec::new();
    let mut page = 1;
    loop {
        let current = fetch(page).await?;
        items.extend(current.items);
        match current.next_page {
            Some(next) if next > page => page = next,
            _ => break,
        }
    }
    Ok(items)
}

/// Typed operations against the remote platform.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Platform release string, `None` when the platform does not report one.
    async fn platform_version(&self) -> RemoteResult<Option<String>>;

    // -------------------------------------------------------------------------
    // Agent pools and tokens
    // -------------------------------------------------------------------------

    async fn create_agent_pool(&self, organization: &str, name: &str) -> RemoteResult<AgentPool>;
    async fn read_agent_pool(&self, id: &AgentPoolId) -> RemoteResult<AgentPool>;
    async fn update_agent_pool(&self, id: &AgentPoolId, name: &str) -> RemoteResult<AgentPool>;
    async fn delete_agent_pool(&self, id: &AgentPoolId) -> RemoteResult<()>;
    async fn list_agent_pools(&self, organization: &str, page: u32)
        -> RemoteResult<Page<AgentPool>>;

    async fn create_agent_token(
        &self,
        pool: &AgentPoolId,
        description: &str,
    ) -> RemoteResult<AgentToken>;
    async fn list_agent_tokens(&self, pool: &AgentPoolId, page: u32)
        -> RemoteResult<Page<AgentToken>>;
    async fn delete_agent_token(&self, id: &AgentTokenId) -> RemoteResult<()>;

    // -------------------------------------------------------------------------
    // Workspaces
    // -------------------------------------------------------------------------

    async fn create_workspace(
        &self,
        organization: &str,
        options: &WorkspaceOptions,
    ) -> RemoteResult<Workspace>;
    async fn read_workspace(&self, id: &WorkspaceId) -> RemoteResult<Workspace>;
    async fn read_workspace_by_name(&self, organization: &str, name: &str)
        -> RemoteResult<Workspace>;
    async fn update_workspace(
        &self,
        id: &WorkspaceId,
        options: &WorkspaceOptions,
    ) -> RemoteResult<Workspace>;

    /// Delete regardless of managed resources.
    async fn delete_workspace(&self, id: &WorkspaceId) -> RemoteResult<()>;

    /// Delete only when no resources are under management.
    async fn safe_delete_workspace(&self, id: &WorkspaceId) -> RemoteResult<()>;

    async fn list_workspaces(
        &self,
        organization: &str,
        options: &WorkspaceListOptions,
    ) -> RemoteResult<Page<Workspace>>;

    async fn add_workspace_tags(&self, id: &WorkspaceId, tags: &[String]) -> RemoteResult<()>;
    async fn remove_workspace_tags(&self, id: &WorkspaceId, tags: &[String]) -> RemoteResult<()>;

    // -------------------------------------------------------------------------
    // Variables
    // -------------------------------------------------------------------------

    async fn list_variables(&self, workspace: &WorkspaceId) -> RemoteResult<Vec<Variable>>;
    async fn create_variable(
        &self,
        workspace: &WorkspaceId,
        options: &VariableOptions,
    ) -> RemoteResult<Variable>;
    async fn update_variable(
        &self,
        workspace: &WorkspaceId,
        id: &VariableId,
        options: &VariableOptions,
    ) -> RemoteResult<Variable>;
    async fn delete_variable(&self, workspace: &WorkspaceId, id: &VariableId) -> RemoteResult<()>;

    // -------------------------------------------------------------------------
    // Teams and access
    // -------------------------------------------------------------------------

    async fn list_teams(&self, organization: &str, page: u32) -> RemoteResult<Page<Team>>;

    async fn list_team_access(&self, workspace: &WorkspaceId) -> RemoteResult<Vec<TeamAccess>>;
    async fn add_team_access(
        &self,
        workspace: &WorkspaceId,
        team: &TeamId,
        access: WorkspaceAccess,
    ) -> RemoteResult<TeamAccess>;
    async fn update_team_access(
        &self,
        id: &TeamAccessId,
        access: WorkspaceAccess,
    ) -> RemoteResult<TeamAccess>;
    async fn remove_team_access(&self, id: &TeamAccessId) -> RemoteResult<()>;

    // -------------------------------------------------------------------------
    // Notifications, run triggers, variable sets
    // -------------------------------------------------------------------------

    async fn list_notifications(
        &self,
        workspace: &WorkspaceId,
    ) -> RemoteResult<Vec<NotificationConfiguration>>;
    async fn create_notification(
        &self,
        workspace: &WorkspaceId,
        options: &NotificationOptions,
    ) -> RemoteResult<NotificationConfiguration>;
    async fn update_notification(
        &self,
        id: &NotificationId,
        options: &NotificationOptions,
    ) -> RemoteResult<NotificationConfiguration>;
    async fn delete_notification(&self, id: &NotificationId) -> RemoteResult<()>;

    async fn list_run_triggers(&self, workspace: &WorkspaceId) -> RemoteResult<Vec<RunTrigger>>;
    async fn create_run_trigger(
        &self,
        workspace: &WorkspaceId,
        source: &WorkspaceId,
    ) -> RemoteResult<RunTrigger>;
    async fn delete_run_trigger(&self, id: &RunTriggerId) -> RemoteResult<()>;

    async fn list_variable_sets(&self, organization: &str, page: u32)
        -> RemoteResult<Page<VariableSet>>;
    async fn list_workspace_variable_sets(
        &self,
        workspace: &WorkspaceId,
    ) -> RemoteResult<Vec<VariableSet>>;
    async fn apply_variable_set(
        &self,
        set: &VariableSetId,
        workspace: &WorkspaceId,
    ) -> RemoteResult<()>;
    async fn remove_variable_set(
        &self,
        set: &VariableSetId,
        workspace: &WorkspaceId,
    ) -> RemoteResult<()>;

    // -------------------------------------------------------------------------
    // Runs, state and configuration
    // -------------------------------------------------------------------------

    async fn create_run(&self, options: &RunOptions) -> RemoteResult<Run>;
    async fn read_run(&self, id: &RunId) -> RemoteResult<Run>;
    async fn list_runs(&self, options: &RunListOptions) -> RemoteResult<Page<Run>>;

    async fn read_current_outputs(&self, workspace: &WorkspaceId)
        -> RemoteResult<Vec<StateOutput>>;

    async fn create_configuration_version(
        &self,
        workspace: &WorkspaceId,
    ) -> RemoteResult<ConfigurationVersion>;
    async fn upload_configuration(
        &self,
        id: &ConfigurationVersionId,
        files: &BTreeMap<String, String>,
    ) -> RemoteResult<()>;
    async fn read_configuration_version(
        &self,
        id: &ConfigurationVersionId,
    ) -> RemoteResult<ConfigurationVersion>;

    // -------------------------------------------------------------------------
    // Projects
    // -------------------------------------------------------------------------

    async fn create_project(&self, organization: &str, name: &str) -> RemoteResult<Project>;
    async fn read_project(&self, id: &ProjectId) -> RemoteResult<Project>;
    async fn update_project(&self, id: &ProjectId, name: &str) -> RemoteResult<Project>;

    /// Fails with [`RemoteError::NotSafeToDelete`] while workspaces remain.
    async fn delete_project(&self, id: &ProjectId) -> RemoteResult<()>;
    async fn list_projects(&self, organization: &str, page: u32) -> RemoteResult<Page<Project>>;

    async fn list_project_team_access(
        &self,
        project: &ProjectId,
    ) -> RemoteResult<Vec<ProjectTeamAccess>>;
    async fn add_project_team_access(
        &self,
        project: &ProjectId,
        team: &TeamId,
        access: ProjectAccess,
    ) -> RemoteResult<ProjectTeamAccess>;
    async fn update_project_team_access(
        &self,
        id: &ProjectTeamAccessId,
        access: ProjectAccess,
    ) -> RemoteResult<ProjectTeamAccess>;
    async fn remove_project_team_access(&self, id: &ProjectTeamAccessId) -> RemoteResult<()>;
}
