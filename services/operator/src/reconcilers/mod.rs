//! Per-kind convergence steps and teardown strategies.
//!
//! Each reconciler implements [`Reconciler`](crate::controller::Reconciler)
//! and [`DeletionStrategy`](crate::controller::DeletionStrategy) for one
//! record kind. Shared lookups of referenced remote objects live here.

mod agent_pool;
mod agent_token;
mod module;
mod outputs;
mod project;
mod runs_collector;
mod tokens;
mod workspace;

#[cfg(test)]
pub(crate) mod testing;

use tfo_id::{AgentPoolId, TeamId, WorkspaceId};

use crate::controller::{ReconcileError, ReconcileResult};
use crate::remote::{collect_pages, AgentPool, RemoteClient, RemoteResultExt, Workspace};
use crate::resources::{AgentPoolRef, IdOrName};

pub use agent_pool::{AgentPoolReconciler, Demand};
pub use agent_token::AgentTokenReconciler;
pub use module::{render_module_configuration, ModuleReconciler};
pub use project::ProjectReconciler;
pub use runs_collector::RunsCollectorReconciler;
pub use workspace::WorkspaceReconciler;

/// Suffix of the secret holding a pool record's token values.
pub const AGENT_POOL_SECRET_SUFFIX: &str = "-agent-pool";

/// Suffix of the config map and secret holding collected outputs.
pub const OUTPUTS_SUFFIX: &str = "-outputs";

/// Look up an agent pool by ID or by name.
pub(crate) async fn resolve_agent_pool(
    client: &dyn RemoteClient,
    organization: &str,
    reference: &IdOrName<AgentPoolId>,
) -> ReconcileResult<AgentPoolRef> {
    if let Some(id) = &reference.id {
        return match client.read_agent_pool(id).await.found()? {
            Some(pool) => Ok(pool_ref(pool)),
            None => Err(ReconcileError::unresolved("agent pool", id.to_string())),
        };
    }

    let name = reference.name.as_deref().unwrap_or_default();
    let pools = collect_pages(|page| client.list_agent_pools(organization, page)).await?;
    pools
        .into_iter()
        .find(|pool| pool.name == name)
        .map(pool_ref)
        .ok_or_else(|| ReconcileError::unresolved("agent pool", name))
}

fn pool_ref(pool: AgentPool) -> AgentPoolRef {
    AgentPoolRef {
        id: pool.id,
        name: pool.name,
    }
}

/// Look up a workspace by ID or by name.
pub(crate) async fn resolve_workspace(
    client: &dyn RemoteClient,
    organization: &str,
    reference: &IdOrName<WorkspaceId>,
) -> ReconcileResult<Workspace> {
    let found = match (&reference.id, reference.name.as_deref()) {
        (Some(id), _) => client.read_workspace(id).await.found()?,
        (None, Some(name)) => client
            .read_workspace_by_name(organization, name)
            .await
            .found()?,
        (None, None) => None,
    };
    found.ok_or_else(|| ReconcileError::unresolved("workspace", describe(reference)))
}

/// Resolve team references, listing the organization's teams only when a
/// reference is by name.
pub(crate) async fn resolve_teams(
    client: &dyn RemoteClient,
    organization: &str,
    references: &[&IdOrName<TeamId>],
) -> ReconcileResult<Vec<TeamId>> {
    let teams = if references.iter().any(|team| team.id.is_none()) {
        collect_pages(|page| client.list_teams(organization, page)).await?
    } else {
        Vec::new()
    };

    references
        .iter()
        .map(|reference| match (&reference.id, reference.name.as_deref()) {
            (Some(id), _) => Ok(id.clone()),
            (None, name) => teams
                .iter()
                .find(|team| Some(team.name.as_str()) == name)
                .map(|team| team.id.clone())
                .ok_or_else(|| ReconcileError::unresolved("team", describe(reference))),
        })
        .collect()
}

fn describe<I: std::fmt::Display>(reference: &IdOrName<I>) -> String {
    match (&reference.id, &reference.name) {
        (Some(id), _) => id.to_string(),
        (None, Some(name)) => name.clone(),
        (None, None) => String::new(),
    }
}
