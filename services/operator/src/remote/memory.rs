//! In-process platform backend.
//!
//! Implements [`RemoteClient`] over plain maps. The binary uses it until a
//! networked client is wired in, and the integration tests use it to observe
//! exactly which mutating calls a convergence pass made.
//!
//! Runs never progress on their own unless auto-completion is enabled; tests
//! drive them with [`InMemoryRemote::set_run_status`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tfo_id::{
    AgentPoolId, AgentTokenId, ConfigurationVersionId, NotificationId, ProjectId,
    ProjectTeamAccessId, RunId, RunTriggerId, StateVersionOutputId, TeamAccessId, TeamId,
    Ulid, VariableId, VariableSetId, WorkspaceId,
};
use tracing::debug;

use super::*;

const DEFAULT_PAGE_SIZE: usize = 20;
const DEFAULT_TERRAFORM_VERSION: &str = "1.9.5";

#[derive(Default)]
struct Backend {
    platform_version: Option<String>,
    agent_pools: BTreeMap<AgentPoolId, AgentPool>,
    agent_tokens: BTreeMap<AgentTokenId, (AgentPoolId, AgentToken)>,
    workspaces: BTreeMap<WorkspaceId, Workspace>,
    current_runs: HashMap<WorkspaceId, RunId>,
    variables: BTreeMap<VariableId, (WorkspaceId, Variable)>,
    teams: BTreeMap<TeamId, (String, Team)>,
    team_access: BTreeMap<TeamAccessId, (WorkspaceId, TeamAccess)>,
    notifications: BTreeMap<NotificationId, (WorkspaceId, NotificationConfiguration)>,
    run_triggers: BTreeMap<RunTriggerId, RunTrigger>,
    variable_sets: BTreeMap<VariableSetId, (String, VariableSet)>,
    variable_set_links: BTreeSet<(VariableSetId, WorkspaceId)>,
    runs: BTreeMap<RunId, Run>,
    outputs: HashMap<WorkspaceId, Vec<StateOutput>>,
    configuration_versions: BTreeMap<ConfigurationVersionId, ConfigurationVersion>,
    projects: BTreeMap<ProjectId, Project>,
    project_team_access: BTreeMap<ProjectTeamAccessId, (ProjectId, ProjectTeamAccess)>,
}

impl Backend {
    fn workspace(&self, id: &WorkspaceId) -> RemoteResult<Workspace> {
        let mut workspace = self.workspaces.get(id).cloned().ok_or(RemoteError::NotFound)?;
        workspace.current_run = self
            .current_runs
            .get(id)
            .and_then(|run_id| self.runs.get(run_id))
            .cloned();
        Ok(workspace)
    }

    fn require_workspace(&self, id: &WorkspaceId) -> RemoteResult<()> {
        if self.workspaces.contains_key(id) {
            Ok(())
        } else {
            Err(RemoteError::NotFound)
        }
    }

    fn workspace_name_taken(&self, organization: &str, name: &str, except: Option<&WorkspaceId>) -> bool {
        self.workspaces.values().any(|ws| {
            ws.organization == organization && ws.name == name && Some(&ws.id) != except
        })
    }

    fn pool_name(&self, id: &AgentPoolId) -> Option<&str> {
        self.agent_pools.get(id).map(|pool| pool.name.as_str())
    }

    fn apply_run_effects(&mut self, run: &Run) {
        if run.status != RunStatus::Applied {
            return;
        }
        if let Some(workspace) = self.workspaces.get_mut(&run.workspace_id) {
            if run.is_destroy {
                workspace.resource_count = 0;
            } else if !run.plan_only && !run.refresh_only {
                workspace.resource_count = workspace.resource_count.max(1);
            }
        }
    }

    fn drop_workspace(&mut self, id: &WorkspaceId) {
        self.workspaces.remove(id);
        self.current_runs.remove(id);
        self.outputs.remove(id);
        self.variables.retain(|_, (ws, _)| ws != id);
        self.team_access.retain(|_, (ws, _)| ws != id);
        self.notifications.retain(|_, (ws, _)| ws != id);
        self.run_triggers
            .retain(|_, trigger| &trigger.workspace_id != id && &trigger.sourceable_id != id);
        self.variable_set_links.retain(|(_, ws)| ws != id);
    }
}

/// In-process [`RemoteClient`] that counts mutating calls.
pub struct InMemoryRemote {
    backend: Mutex<Backend>,
    page_size: usize,
    auto_complete_runs: AtomicBool,
    mutations: AtomicU64,
    calls: Mutex<Vec<&'static str>>,
    failures: Mutex<HashMap<&'static str, RemoteError>>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Backend whose list calls return at most `page_size` items per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            backend: Mutex::new(Backend::default()),
            page_size: page_size.max(1),
            auto_complete_runs: AtomicBool::new(false),
            mutations: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn backend(&self) -> MutexGuard<'_, Backend> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn injected(&self, op: &'static str) -> RemoteResult<()> {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        match failures.remove(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn read(&self, op: &'static str) -> RemoteResult<()> {
        self.injected(op)
    }

    fn mutate(&self, op: &'static str) -> RemoteResult<()> {
        self.injected(op)?;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(op);
        debug!(op, "[MEMORY] Remote mutation");
        Ok(())
    }

    fn paginate<T>(&self, items: Vec<T>, page: u32) -> Page<T> {
        let page = page.max(1);
        let start = (page as usize - 1) * self.page_size;
        let total = items.len();
        let items: Vec<T> = items.into_iter().skip(start).take(self.page_size).collect();
        let next_page = (start + self.page_size < total).then_some(page + 1);
        Page { items, next_page }
    }

    // -------------------------------------------------------------------------
    // Inspection and fault injection
    // -------------------------------------------------------------------------

    /// Number of successful mutating calls so far.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Names of successful mutating calls, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_of(&self, op: &str) -> usize {
        self.calls().into_iter().filter(|call| *call == op).count()
    }

    /// Fail the next call of `op` with `err`.
    pub fn fail_next(&self, op: &'static str, err: RemoteError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op, err);
    }

    /// Create runs directly in their successful terminal status.
    pub fn set_auto_complete_runs(&self, enabled: bool) {
        self.auto_complete_runs.store(enabled, Ordering::SeqCst);
    }

    pub fn set_platform_version(&self, version: Option<&str>) {
        self.backend().platform_version = version.map(str::to_string);
    }

    /// Advance a run as the platform would.
    pub fn set_run_status(&self, id: &RunId, status: RunStatus) {
        let mut backend = self.backend();
        let Some(run) = backend.runs.get_mut(id) else {
            return;
        };
        run.status = status;
        let run = run.clone();
        backend.apply_run_effects(&run);
    }

    /// Record a run that some other actor started.
    pub fn insert_run(&self, workspace: &WorkspaceId, status: RunStatus, plan_only: bool) -> Run {
        let run = Run {
            id: RunId::generate(),
            workspace_id: workspace.clone(),
            status,
            is_destroy: false,
            plan_only,
            refresh_only: false,
            configuration_version_id: None,
            message: "Queued manually".to_string(),
            created_at: Utc::now(),
        };
        let mut backend = self.backend();
        if !plan_only {
            backend.current_runs.insert(workspace.clone(), run.id.clone());
        }
        backend.runs.insert(run.id.clone(), run.clone());
        backend.apply_run_effects(&run);
        run
    }

    /// Create a workspace outside of any record.
    pub fn seed_workspace(&self, organization: &str, name: &str) -> Workspace {
        let workspace = new_workspace(
            organization,
            &WorkspaceOptions {
                name: name.to_string(),
                allow_destroy_plan: true,
                ..Default::default()
            },
        );
        self.backend()
            .workspaces
            .insert(workspace.id.clone(), workspace.clone());
        workspace
    }

    pub fn set_workspace_agent_pool(&self, workspace: &WorkspaceId, pool: Option<AgentPoolId>) {
        if let Some(ws) = self.backend().workspaces.get_mut(workspace) {
            ws.agent_pool_id = pool;
            ws.execution_mode = ExecutionMode::Agent;
        }
    }

    pub fn set_workspace_project(&self, workspace: &WorkspaceId, project: Option<ProjectId>) {
        if let Some(ws) = self.backend().workspaces.get_mut(workspace) {
            ws.project_id = project;
        }
    }

    pub fn set_resource_count(&self, workspace: &WorkspaceId, count: u32) {
        if let Some(ws) = self.backend().workspaces.get_mut(workspace) {
            ws.resource_count = count;
        }
    }

    pub fn seed_team(&self, organization: &str, name: &str) -> Team {
        let team = Team {
            id: TeamId::generate(),
            name: name.to_string(),
        };
        self.backend()
            .teams
            .insert(team.id.clone(), (organization.to_string(), team.clone()));
        team
    }

    pub fn seed_variable_set(&self, organization: &str, name: &str) -> VariableSet {
        let set = VariableSet {
            id: VariableSetId::generate(),
            name: name.to_string(),
            global: false,
        };
        self.backend()
            .variable_sets
            .insert(set.id.clone(), (organization.to_string(), set.clone()));
        set
    }

    /// Replace a workspace's current state outputs.
    pub fn set_outputs(&self, workspace: &WorkspaceId, outputs: &[(&str, serde_json::Value, bool)]) {
        let outputs = outputs
            .iter()
            .map(|(name, value, sensitive)| StateOutput {
                id: StateVersionOutputId::generate(),
                name: name.to_string(),
                value: value.clone(),
                sensitive: *sensitive,
            })
            .collect();
        self.backend().outputs.insert(workspace.clone(), outputs);
    }

    pub fn agent_pool(&self, id: &AgentPoolId) -> Option<AgentPool> {
        self.backend().agent_pools.get(id).cloned()
    }

    pub fn agent_tokens(&self, pool: &AgentPoolId) -> Vec<AgentToken> {
        self.backend()
            .agent_tokens
            .values()
            .filter(|(owner, _)| owner == pool)
            .map(|(_, token)| token.clone())
            .collect()
    }

    pub fn workspace(&self, id: &WorkspaceId) -> Option<Workspace> {
        self.backend().workspace(id).ok()
    }

    pub fn project(&self, id: &ProjectId) -> Option<Project> {
        self.backend().projects.get(id).cloned()
    }

    pub fn runs_for(&self, workspace: &WorkspaceId) -> Vec<Run> {
        let mut runs: Vec<Run> = self
            .backend()
            .runs
            .values()
            .filter(|run| &run.workspace_id == workspace)
            .cloned()
            .collect();
        runs.sort_by_key(|run| run.created_at);
        runs
    }

    pub fn variables_for(&self, workspace: &WorkspaceId) -> Vec<Variable> {
        self.backend()
            .variables
            .values()
            .filter(|(ws, _)| ws == workspace)
            .map(|(_, variable)| variable.clone())
            .collect()
    }

    pub fn configuration_version(&self, id: &ConfigurationVersionId) -> Option<ConfigurationVersion> {
        self.backend().configuration_versions.get(id).cloned()
    }
}

fn new_workspace(organization: &str, options: &WorkspaceOptions) -> Workspace {
    Workspace {
        id: WorkspaceId::generate(),
        name: options.name.clone(),
        organization: organization.to_string(),
        description: options.description.clone(),
        execution_mode: options.execution_mode,
        terraform_version: options
            .terraform_version
            .clone()
            .unwrap_or_else(|| DEFAULT_TERRAFORM_VERSION.to_string()),
        working_directory: options.working_directory.clone(),
        auto_apply: options.auto_apply,
        allow_destroy_plan: options.allow_destroy_plan,
        agent_pool_id: options.agent_pool_id.clone(),
        project_id: options.project_id.clone(),
        tag_names: Vec::new(),
        current_run: None,
        resource_count: 0,
    }
}

#[async_trait]
impl RemoteClient for InMemoryRemote {
    async fn platform_version(&self) -> RemoteResult<Option<String>> {
        self.read("platform_version")?;
        Ok(self.backend().platform_version.clone())
    }

    async fn create_agent_pool(&self, organization: &str, name: &str) -> RemoteResult<AgentPool> {
        let mut backend = self.backend();
        if backend
            .agent_pools
            .values()
            .any(|pool| pool.organization == organization && pool.name == name)
        {
            return Err(RemoteError::NameTaken(name.to_string()));
        }
        self.mutate("create_agent_pool")?;
        let pool = AgentPool {
            id: AgentPoolId::generate(),
            name: name.to_string(),
            organization: organization.to_string(),
        };
        backend.agent_pools.insert(pool.id.clone(), pool.clone());
        Ok(pool)
    }

    async fn read_agent_pool(&self, id: &AgentPoolId) -> RemoteResult<AgentPool> {
        self.read("read_agent_pool")?;
        self.backend()
            .agent_pools
            .get(id)
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    async fn update_agent_pool(&self, id: &AgentPoolId, name: &str) -> RemoteResult<AgentPool> {
        let mut backend = self.backend();
        let organization = match backend.agent_pools.get(id) {
            Some(pool) => pool.organization.clone(),
            None => return Err(RemoteError::NotFound),
        };
        if backend
            .agent_pools
            .values()
            .any(|pool| pool.organization == organization && pool.name == name && &pool.id != id)
        {
            return Err(RemoteError::NameTaken(name.to_string()));
        }
        self.mutate("update_agent_pool")?;
        let pool = backend.agent_pools.get_mut(id).ok_or(RemoteError::NotFound)?;
        pool.name = name.to_string();
        Ok(pool.clone())
    }

    async fn delete_agent_pool(&self, id: &AgentPoolId) -> RemoteResult<()> {
        let mut backend = self.backend();
        if !backend.agent_pools.contains_key(id) {
            return Err(RemoteError::NotFound);
        }
        if backend
            .workspaces
            .values()
            .any(|ws| ws.agent_pool_id.as_ref() == Some(id))
        {
            return Err(RemoteError::Unprocessable(
                "agent pool is still assigned to workspaces".to_string(),
            ));
        }
        self.mutate("delete_agent_pool")?;
        backend.agent_pools.remove(id);
        backend.agent_tokens.retain(|_, (pool, _)| pool != id);
        Ok(())
    }

    async fn list_agent_pools(&self, organization: &str, page: u32) -> RemoteResult<Page<AgentPool>> {
        self.read("list_agent_pools")?;
        let pools: Vec<AgentPool> = self
            .backend()
            .agent_pools
            .values()
            .filter(|pool| pool.organization == organization)
            .cloned()
            .collect();
        Ok(self.paginate(pools, page))
    }

    async fn create_agent_token(
        &self,
        pool: &AgentPoolId,
        description: &str,
    ) -> RemoteResult<AgentToken> {
        let mut backend = self.backend();
        if !backend.agent_pools.contains_key(pool) {
            return Err(RemoteError::NotFound);
        }
        self.mutate("create_agent_token")?;
        let token = AgentToken {
            id: AgentTokenId::generate(),
            description: description.to_string(),
            created_at: Utc::now(),
            last_used_at: None,
            token: Some(format!("{}.atlasv1.{}", Ulid::new(), Ulid::new())),
        };
        let stored = AgentToken {
            token: None,
            ..token.clone()
        };
        backend
            .agent_tokens
            .insert(token.id.clone(), (pool.clone(), stored));
        Ok(token)
    }

    async fn list_agent_tokens(&self, pool: &AgentPoolId, page: u32) -> RemoteResult<Page<AgentToken>> {
        self.read("list_agent_tokens")?;
        let backend = self.backend();
        if !backend.agent_pools.contains_key(pool) {
            return Err(RemoteError::NotFound);
        }
        let tokens: Vec<AgentToken> = backend
            .agent_tokens
            .values()
            .filter(|(owner, _)| owner == pool)
            .map(|(_, token)| token.clone())
            .collect();
        drop(backend);
        Ok(self.paginate(tokens, page))
    }

    async fn delete_agent_token(&self, id: &AgentTokenId) -> RemoteResult<()> {
        let mut backend = self.backend();
        if !backend.agent_tokens.contains_key(id) {
            return Err(RemoteError::NotFound);
        }
        self.mutate("delete_agent_token")?;
        backend.agent_tokens.remove(id);
        Ok(())
    }

    async fn create_workspace(
        &self,
        organization: &str,
        options: &WorkspaceOptions,
    ) -> RemoteResult<Workspace> {
        let mut backend = self.backend();
        if backend.workspace_name_taken(organization, &options.name, None) {
            return Err(RemoteError::NameTaken(options.name.clone()));
        }
        self.mutate("create_workspace")?;
        let workspace = new_workspace(organization, options);
        backend
            .workspaces
            .insert(workspace.id.clone(), workspace.clone());
        Ok(workspace)
    }

    async fn read_workspace(&self, id: &WorkspaceId) -> RemoteResult<Workspace> {
        self.read("read_workspace")?;
        self.backend().workspace(id)
    }

    async fn read_workspace_by_name(&self, organization: &str, name: &str) -> RemoteResult<Workspace> {
        self.read("read_workspace_by_name")?;
        let backend = self.backend();
        let id = backend
            .workspaces
            .values()
            .find(|ws| ws.organization == organization && ws.name == name)
            .map(|ws| ws.id.clone())
            .ok_or(RemoteError::NotFound)?;
        backend.workspace(&id)
    }

    async fn update_workspace(
        &self,
        id: &WorkspaceId,
        options: &WorkspaceOptions,
    ) -> RemoteResult<Workspace> {
        let mut backend = self.backend();
        let organization = match backend.workspaces.get(id) {
            Some(ws) => ws.organization.clone(),
            None => return Err(RemoteError::NotFound),
        };
        if backend.workspace_name_taken(&organization, &options.name, Some(id)) {
            return Err(RemoteError::NameTaken(options.name.clone()));
        }
        self.mutate("update_workspace")?;
        let ws = backend.workspaces.get_mut(id).ok_or(RemoteError::NotFound)?;
        ws.name = options.name.clone();
        ws.description = options.description.clone();
        ws.execution_mode = options.execution_mode;
        if let Some(version) = &options.terraform_version {
            ws.terraform_version = version.clone();
        }
        ws.working_directory = options.working_directory.clone();
        ws.auto_apply = options.auto_apply;
        ws.allow_destroy_plan = options.allow_destroy_plan;
        ws.agent_pool_id = options.agent_pool_id.clone();
        if options.project_id.is_some() {
            ws.project_id = options.project_id.clone();
        }
        backend.workspace(id)
    }

    async fn delete_workspace(&self, id: &WorkspaceId) -> RemoteResult<()> {
        let mut backend = self.backend();
        backend.require_workspace(id)?;
        self.mutate("delete_workspace")?;
        backend.drop_workspace(id);
        Ok(())
    }

    async fn safe_delete_workspace(&self, id: &WorkspaceId) -> RemoteResult<()> {
        let mut backend = self.backend();
        let resources = backend
            .workspaces
            .get(id)
            .map(|ws| ws.resource_count)
            .ok_or(RemoteError::NotFound)?;
        if resources > 0 {
            return Err(RemoteError::NotSafeToDelete(format!(
                "workspace still manages {resources} resources"
            )));
        }
        self.mutate("safe_delete_workspace")?;
        backend.drop_workspace(id);
        Ok(())
    }

    async fn list_workspaces(
        &self,
        organization: &str,
        options: &WorkspaceListOptions,
    ) -> RemoteResult<Page<Workspace>> {
        self.read("list_workspaces")?;
        let backend = self.backend();
        let mut matching = Vec::new();
        for id in backend.workspaces.keys() {
            let workspace = backend.workspace(id)?;
            if workspace.organization != organization {
                continue;
            }
            if options.agent_pool_id.is_some() && workspace.agent_pool_id != options.agent_pool_id {
                continue;
            }
            if !options.current_run_statuses.is_empty() {
                let pending = workspace
                    .current_run
                    .as_ref()
                    .is_some_and(|run| options.current_run_statuses.contains(&run.status));
                if !pending {
                    continue;
                }
            }
            matching.push(workspace);
        }
        drop(backend);
        Ok(self.paginate(matching, options.page))
    }

    async fn add_workspace_tags(&self, id: &WorkspaceId, tags: &[String]) -> RemoteResult<()> {
        let mut backend = self.backend();
        backend.require_workspace(id)?;
        self.mutate("add_workspace_tags")?;
        if let Some(ws) = backend.workspaces.get_mut(id) {
            for tag in tags {
                if !ws.tag_names.contains(tag) {
                    ws.tag_names.push(tag.clone());
                }
            }
        }
        Ok(())
    }

    async fn remove_workspace_tags(&self, id: &WorkspaceId, tags: &[String]) -> RemoteResult<()> {
        let mut backend = self.backend();
        backend.require_workspace(id)?;
        self.mutate("remove_workspace_tags")?;
        if let Some(ws) = backend.workspaces.get_mut(id) {
            ws.tag_names.retain(|tag| !tags.contains(tag));
        }
        Ok(())
    }

    async fn list_variables(&self, workspace: &WorkspaceId) -> RemoteResult<Vec<Variable>> {
        self.read("list_variables")?;
        let backend = self.backend();
        backend.require_workspace(workspace)?;
        Ok(backend
            .variables
            .values()
            .filter(|(ws, _)| ws == workspace)
            .map(|(_, variable)| Variable {
                value: if variable.sensitive {
                    None
                } else {
                    variable.value.clone()
                },
                ..variable.clone()
            })
            .collect())
    }

    async fn create_variable(
        &self,
        workspace: &WorkspaceId,
        options: &VariableOptions,
    ) -> RemoteResult<Variable> {
        let mut backend = self.backend();
        backend.require_workspace(workspace)?;
        if backend
            .variables
            .values()
            .any(|(ws, v)| ws == workspace && v.key == options.key && v.category == options.category)
        {
            return Err(RemoteError::NameTaken(options.key.clone()));
        }
        self.mutate("create_variable")?;
        let variable = variable_from(VariableId::generate(), options);
        backend
            .variables
            .insert(variable.id.clone(), (workspace.clone(), variable.clone()));
        Ok(variable)
    }

    async fn update_variable(
        &self,
        workspace: &WorkspaceId,
        id: &VariableId,
        options: &VariableOptions,
    ) -> RemoteResult<Variable> {
        let mut backend = self.backend();
        match backend.variables.get(id) {
            Some((ws, _)) if ws == workspace => {}
            _ => return Err(RemoteError::NotFound),
        }
        self.mutate("update_variable")?;
        let variable = variable_from(id.clone(), options);
        backend
            .variables
            .insert(id.clone(), (workspace.clone(), variable.clone()));
        Ok(variable)
    }

    async fn delete_variable(&self, workspace: &WorkspaceId, id: &VariableId) -> RemoteResult<()> {
        let mut backend = self.backend();
        match backend.variables.get(id) {
            Some((ws, _)) if ws == workspace => {}
            _ => return Err(RemoteError::NotFound),
        }
        self.mutate("delete_variable")?;
        backend.variables.remove(id);
        Ok(())
    }

    async fn list_teams(&self, organization: &str, page: u32) -> RemoteResult<Page<Team>> {
        self.read("list_teams")?;
        let teams: Vec<Team> = self
            .backend()
            .teams
            .values()
            .filter(|(org, _)| org == organization)
            .map(|(_, team)| team.clone())
            .collect();
        Ok(self.paginate(teams, page))
    }

    async fn list_team_access(&self, workspace: &WorkspaceId) -> RemoteResult<Vec<TeamAccess>> {
        self.read("list_team_access")?;
        let backend = self.backend();
        backend.require_workspace(workspace)?;
        Ok(backend
            .team_access
            .values()
            .filter(|(ws, _)| ws == workspace)
            .map(|(_, access)| access.clone())
            .collect())
    }

    async fn add_team_access(
        &self,
        workspace: &WorkspaceId,
        team: &TeamId,
        access: WorkspaceAccess,
    ) -> RemoteResult<TeamAccess> {
        let mut backend = self.backend();
        backend.require_workspace(workspace)?;
        if !backend.teams.contains_key(team) {
            return Err(RemoteError::NotFound);
        }
        self.mutate("add_team_access")?;
        let entry = TeamAccess {
            id: TeamAccessId::generate(),
            team_id: team.clone(),
            access,
        };
        backend
            .team_access
            .insert(entry.id.clone(), (workspace.clone(), entry.clone()));
        Ok(entry)
    }

    async fn update_team_access(
        &self,
        id: &TeamAccessId,
        access: WorkspaceAccess,
    ) -> RemoteResult<TeamAccess> {
        let mut backend = self.backend();
        if !backend.team_access.contains_key(id) {
            return Err(RemoteError::NotFound);
        }
        self.mutate("update_team_access")?;
        let (_, entry) = backend.team_access.get_mut(id).ok_or(RemoteError::NotFound)?;
        entry.access = access;
        Ok(entry.clone())
    }

    async fn remove_team_access(&self, id: &TeamAccessId) -> RemoteResult<()> {
        let mut backend = self.backend();
        if !backend.team_access.contains_key(id) {
            return Err(RemoteError::NotFound);
        }
        self.mutate("remove_team_access")?;
        backend.team_access.remove(id);
        Ok(())
    }

    async fn list_notifications(
        &self,
        workspace: &WorkspaceId,
    ) -> RemoteResult<Vec<NotificationConfiguration>> {
        self.read("list_notifications")?;
        let backend = self.backend();
        backend.require_workspace(workspace)?;
        Ok(backend
            .notifications
            .values()
            .filter(|(ws, _)| ws == workspace)
            .map(|(_, notification)| notification.clone())
            .collect())
    }

    async fn create_notification(
        &self,
        workspace: &WorkspaceId,
        options: &NotificationOptions,
    ) -> RemoteResult<NotificationConfiguration> {
        let mut backend = self.backend();
        backend.require_workspace(workspace)?;
        if options.destination_type != NotificationDestination::Email && options.url.is_none() {
            return Err(RemoteError::Unprocessable(format!(
                "notification {} requires a url",
                options.name
            )));
        }
        self.mutate("create_notification")?;
        let notification = notification_from(NotificationId::generate(), options);
        backend
            .notifications
            .insert(notification.id.clone(), (workspace.clone(), notification.clone()));
        Ok(notification)
    }

    async fn update_notification(
        &self,
        id: &NotificationId,
        options: &NotificationOptions,
    ) -> RemoteResult<NotificationConfiguration> {
        let mut backend = self.backend();
        let workspace = match backend.notifications.get(id) {
            Some((ws, _)) => ws.clone(),
            None => return Err(RemoteError::NotFound),
        };
        self.mutate("update_notification")?;
        let notification = notification_from(id.clone(), options);
        backend
            .notifications
            .insert(id.clone(), (workspace, notification.clone()));
        Ok(notification)
    }

    async fn delete_notification(&self, id: &NotificationId) -> RemoteResult<()> {
        let mut backend = self.backend();
        if !backend.notifications.contains_key(id) {
            return Err(RemoteError::NotFound);
        }
        self.mutate("delete_notification")?;
        backend.notifications.remove(id);
        Ok(())
    }

    async fn list_run_triggers(&self, workspace: &WorkspaceId) -> RemoteResult<Vec<RunTrigger>> {
        self.read("list_run_triggers")?;
        let backend = self.backend();
        backend.require_workspace(workspace)?;
        Ok(backend
            .run_triggers
            .values()
            .filter(|trigger| &trigger.workspace_id == workspace)
            .cloned()
            .collect())
    }

    async fn create_run_trigger(
        &self,
        workspace: &WorkspaceId,
        source: &WorkspaceId,
    ) -> RemoteResult<RunTrigger> {
        let mut backend = self.backend();
        backend.require_workspace(workspace)?;
        backend.require_workspace(source)?;
        self.mutate("create_run_trigger")?;
        let trigger = RunTrigger {
            id: RunTriggerId::generate(),
            workspace_id: workspace.clone(),
            sourceable_id: source.clone(),
        };
        backend.run_triggers.insert(trigger.id.clone(), trigger.clone());
        Ok(trigger)
    }

    async fn delete_run_trigger(&self, id: &RunTriggerId) -> RemoteResult<()> {
        let mut backend = self.backend();
        if !backend.run_triggers.contains_key(id) {
            return Err(RemoteError::NotFound);
        }
        self.mutate("delete_run_trigger")?;
        backend.run_triggers.remove(id);
        Ok(())
    }

    async fn list_variable_sets(&self, organization: &str, page: u32) -> RemoteResult<Page<VariableSet>> {
        self.read("list_variable_sets")?;
        let sets: Vec<VariableSet> = self
            .backend()
            .variable_sets
            .values()
            .filter(|(org, _)| org == organization)
            .map(|(_, set)| set.clone())
            .collect();
        Ok(self.paginate(sets, page))
    }

    async fn list_workspace_variable_sets(
        &self,
        workspace: &WorkspaceId,
    ) -> RemoteResult<Vec<VariableSet>> {
        self.read("list_workspace_variable_sets")?;
        let backend = self.backend();
        backend.require_workspace(workspace)?;
        Ok(backend
            .variable_set_links
            .iter()
            .filter(|(_, ws)| ws == workspace)
            .filter_map(|(set, _)| backend.variable_sets.get(set))
            .map(|(_, set)| set.clone())
            .collect())
    }

    async fn apply_variable_set(&self, set: &VariableSetId, workspace: &WorkspaceId) -> RemoteResult<()> {
        let mut backend = self.backend();
        backend.require_workspace(workspace)?;
        if !backend.variable_sets.contains_key(set) {
            return Err(RemoteError::NotFound);
        }
        self.mutate("apply_variable_set")?;
        backend
            .variable_set_links
            .insert((set.clone(), workspace.clone()));
        Ok(())
    }

    async fn remove_variable_set(&self, set: &VariableSetId, workspace: &WorkspaceId) -> RemoteResult<()> {
        let mut backend = self.backend();
        let link = (set.clone(), workspace.clone());
        if !backend.variable_set_links.contains(&link) {
            return Err(RemoteError::NotFound);
        }
        self.mutate("remove_variable_set")?;
        backend.variable_set_links.remove(&link);
        Ok(())
    }

    async fn create_run(&self, options: &RunOptions) -> RemoteResult<Run> {
        let mut backend = self.backend();
        let allow_destroy_plan = backend
            .workspaces
            .get(&options.workspace_id)
            .map(|ws| ws.allow_destroy_plan)
            .ok_or(RemoteError::NotFound)?;
        if options.is_destroy && !allow_destroy_plan {
            return Err(RemoteError::Unprocessable(
                "destroy plans are not allowed on this workspace".to_string(),
            ));
        }
        if let Some(cv) = &options.configuration_version_id {
            match backend.configuration_versions.get(cv) {
                Some(version) if version.status == ConfigurationStatus::Uploaded => {}
                Some(_) => {
                    return Err(RemoteError::Unprocessable(
                        "configuration version has not been uploaded".to_string(),
                    ))
                }
                None => return Err(RemoteError::NotFound),
            }
        }
        self.mutate("create_run")?;

        let status = if self.auto_complete_runs.load(Ordering::SeqCst) {
            if options.plan_only {
                RunStatus::PlannedAndFinished
            } else {
                RunStatus::Applied
            }
        } else {
            RunStatus::Pending
        };
        let run = Run {
            id: RunId::generate(),
            workspace_id: options.workspace_id.clone(),
            status,
            is_destroy: options.is_destroy,
            plan_only: options.plan_only,
            refresh_only: options.refresh_only,
            configuration_version_id: options.configuration_version_id.clone(),
            message: options.message.clone(),
            created_at: Utc::now(),
        };
        if !run.plan_only {
            backend
                .current_runs
                .insert(run.workspace_id.clone(), run.id.clone());
        }
        backend.runs.insert(run.id.clone(), run.clone());
        backend.apply_run_effects(&run);
        Ok(run)
    }

    async fn read_run(&self, id: &RunId) -> RemoteResult<Run> {
        self.read("read_run")?;
        self.backend().runs.get(id).cloned().ok_or(RemoteError::NotFound)
    }

    async fn list_runs(&self, options: &RunListOptions) -> RemoteResult<Page<Run>> {
        self.read("list_runs")?;
        let backend = self.backend();
        let runs: Vec<Run> = backend
            .runs
            .values()
            .filter(|run| {
                let Some(ws) = backend.workspaces.get(&run.workspace_id) else {
                    return false;
                };
                if ws.organization != options.organization {
                    return false;
                }
                if options
                    .workspace_id
                    .as_ref()
                    .is_some_and(|id| id != &run.workspace_id)
                {
                    return false;
                }
                if !options.agent_pool_names.is_empty() {
                    let pool_name = ws.agent_pool_id.as_ref().and_then(|id| backend.pool_name(id));
                    if !pool_name.is_some_and(|name| options.agent_pool_names.iter().any(|n| n == name)) {
                        return false;
                    }
                }
                options
                    .status_group
                    .is_none_or(|group| group.contains(run.status))
            })
            .cloned()
            .collect();
        drop(backend);
        Ok(self.paginate(runs, options.page))
    }

    async fn read_current_outputs(&self, workspace: &WorkspaceId) -> RemoteResult<Vec<StateOutput>> {
        self.read("read_current_outputs")?;
        let backend = self.backend();
        backend.require_workspace(workspace)?;
        Ok(backend.outputs.get(workspace).cloned().unwrap_or_default())
    }

    async fn create_configuration_version(
        &self,
        workspace: &WorkspaceId,
    ) -> RemoteResult<ConfigurationVersion> {
        let mut backend = self.backend();
        backend.require_workspace(workspace)?;
        self.mutate("create_configuration_version")?;
        let version = ConfigurationVersion {
            id: ConfigurationVersionId::generate(),
            workspace_id: workspace.clone(),
            status: ConfigurationStatus::Pending,
            auto_queue_runs: false,
            files: BTreeMap::new(),
        };
        backend
            .configuration_versions
            .insert(version.id.clone(), version.clone());
        Ok(version)
    }

    async fn upload_configuration(
        &self,
        id: &ConfigurationVersionId,
        files: &BTreeMap<String, String>,
    ) -> RemoteResult<()> {
        let mut backend = self.backend();
        if !backend.configuration_versions.contains_key(id) {
            return Err(RemoteError::NotFound);
        }
        self.mutate("upload_configuration")?;
        if let Some(version) = backend.configuration_versions.get_mut(id) {
            version.files = files.clone();
            version.status = ConfigurationStatus::Uploaded;
        }
        Ok(())
    }

    async fn read_configuration_version(
        &self,
        id: &ConfigurationVersionId,
    ) -> RemoteResult<ConfigurationVersion> {
        self.read("read_configuration_version")?;
        self.backend()
            .configuration_versions
            .get(id)
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    async fn create_project(&self, organization: &str, name: &str) -> RemoteResult<Project> {
        let mut backend = self.backend();
        if backend
            .projects
            .values()
            .any(|p| p.organization == organization && p.name == name)
        {
            return Err(RemoteError::NameTaken(name.to_string()));
        }
        self.mutate("create_project")?;
        let project = Project {
            id: ProjectId::generate(),
            name: name.to_string(),
            organization: organization.to_string(),
        };
        backend.projects.insert(project.id.clone(), project.clone());
        Ok(project)
    }

    async fn read_project(&self, id: &ProjectId) -> RemoteResult<Project> {
        self.read("read_project")?;
        self.backend()
            .projects
            .get(id)
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    async fn update_project(&self, id: &ProjectId, name: &str) -> RemoteResult<Project> {
        let mut backend = self.backend();
        let organization = match backend.projects.get(id) {
            Some(project) => project.organization.clone(),
            None => return Err(RemoteError::NotFound),
        };
        if backend
            .projects
            .values()
            .any(|p| p.organization == organization && p.name == name && &p.id != id)
        {
            return Err(RemoteError::NameTaken(name.to_string()));
        }
        self.mutate("update_project")?;
        let project = backend.projects.get_mut(id).ok_or(RemoteError::NotFound)?;
        project.name = name.to_string();
        Ok(project.clone())
    }

    async fn delete_project(&self, id: &ProjectId) -> RemoteResult<()> {
        let mut backend = self.backend();
        if !backend.projects.contains_key(id) {
            return Err(RemoteError::NotFound);
        }
        let remaining = backend
            .workspaces
            .values()
            .filter(|ws| ws.project_id.as_ref() == Some(id))
            .count();
        if remaining > 0 {
            return Err(RemoteError::NotSafeToDelete(format!(
                "project still contains {remaining} workspaces"
            )));
        }
        self.mutate("delete_project")?;
        backend.projects.remove(id);
        backend.project_team_access.retain(|_, (project, _)| project != id);
        Ok(())
    }

    async fn list_projects(&self, organization: &str, page: u32) -> RemoteResult<Page<Project>> {
        self.read("list_projects")?;
        let projects: Vec<Project> = self
            .backend()
            .projects
            .values()
            .filter(|p| p.organization == organization)
            .cloned()
            .collect();
        Ok(self.paginate(projects, page))
    }

    async fn list_project_team_access(
        &self,
        project: &ProjectId,
    ) -> RemoteResult<Vec<ProjectTeamAccess>> {
        self.read("list_project_team_access")?;
        let backend = self.backend();
        if !backend.projects.contains_key(project) {
            return Err(RemoteError::NotFound);
        }
        Ok(backend
            .project_team_access
            .values()
            .filter(|(p, _)| p == project)
            .map(|(_, access)| access.clone())
            .collect())
    }

    async fn add_project_team_access(
        &self,
        project: &ProjectId,
        team: &TeamId,
        access: ProjectAccess,
    ) -> RemoteResult<ProjectTeamAccess> {
        let mut backend = self.backend();
        if !backend.projects.contains_key(project) || !backend.teams.contains_key(team) {
            return Err(RemoteError::NotFound);
        }
        self.mutate("add_project_team_access")?;
        let entry = ProjectTeamAccess {
            id: ProjectTeamAccessId::generate(),
            team_id: team.clone(),
            access,
        };
        backend
            .project_team_access
            .insert(entry.id.clone(), (project.clone(), entry.clone()));
        Ok(entry)
    }

    async fn update_project_team_access(
        &self,
        id: &ProjectTeamAccessId,
        access: ProjectAccess,
    ) -> RemoteResult<ProjectTeamAccess> {
        let mut backend = self.backend();
        if !backend.project_team_access.contains_key(id) {
            return Err(RemoteError::NotFound);
        }
        self.mutate("update_project_team_access")?;
        let (_, entry) = backend
            .project_team_access
            .get_mut(id)
            .ok_or(RemoteError::NotFound)?;
        entry.access = access;
        Ok(entry.clone())
    }

    async fn remove_project_team_access(&self, id: &ProjectTeamAccessId) -> RemoteResult<()> {
        let mut backend = self.backend();
        if !backend.project_team_access.contains_key(id) {
            return Err(RemoteError::NotFound);
        }
        self.mutate("remove_project_team_access")?;
        backend.project_team_access.remove(id);
        Ok(())
    }
}

fn variable_from(id: VariableId, options: &VariableOptions) -> Variable {
    Variable {
        id,
        key: options.key.clone(),
        value: Some(options.value.clone()),
        category: options.category,
        hcl: options.hcl,
        sensitive: options.sensitive,
        description: options.description.clone(),
    }
}

fn notification_from(id: NotificationId, options: &NotificationOptions) -> NotificationConfiguration {
    NotificationConfiguration {
        id,
        name: options.name.clone(),
        destination_type: options.destination_type,
        url: options.url.clone(),
        enabled: options.enabled,
        triggers: options.triggers.clone(),
    }
}
