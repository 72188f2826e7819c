//! Agent demand signal.
//!
//! Two ways of counting how many agents a pool needs right now, picked from
//! the platform's reported release:
//!
//! - Modern: list the organization's non-final runs on the pool. Plan-only
//!   runs each need an agent; every other run needs one agent per workspace.
//!   Runs parked on a human decision need none.
//! - Legacy: list workspaces on the pool whose current run is queued or
//!   running, optionally narrowed by target selectors.

use std::collections::BTreeSet;

use tfo_reconcile::{match_wildcard_name, DemandAlgorithm};
use tracing::debug;

use crate::controller::ReconcileResult;
use crate::remote::{
    collect_pages, RemoteClient, Run, RunListOptions, RunStatus, RunStatusGroup, Workspace,
    WorkspaceListOptions,
};
use crate::resources::agent_pool::TargetWorkspace;
use crate::resources::AgentPoolRef;

/// Agents wanted by a pool, and how that was worked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Demand {
    pub algorithm: DemandAlgorithm,
    pub agents: i32,
}

/// Count the agents `pool` needs.
pub async fn pending_demand(
    client: &dyn RemoteClient,
    organization: &str,
    pool: &AgentPoolRef,
    targets: Option<&[TargetWorkspace]>,
) -> ReconcileResult<Demand> {
    let version = client.platform_version().await?;
    let algorithm = DemandAlgorithm::for_platform(version.as_deref());

    let agents = match algorithm {
        DemandAlgorithm::Modern => {
            let runs = collect_pages(|page| {
                let options = RunListOptions {
                    organization: organization.to_string(),
                    agent_pool_names: vec![pool.name.clone()],
                    workspace_id: None,
                    status_group: Some(RunStatusGroup::NonFinal),
                    page,
                };
                async move { client.list_runs(&options).await }
            })
            .await?;
            count_runs(&runs)
        }
        DemandAlgorithm::Legacy => {
            let workspaces = collect_pages(|page| {
                let options = WorkspaceListOptions {
                    current_run_statuses: RunStatus::QUEUED_OR_RUNNING.to_vec(),
                    agent_pool_id: Some(pool.id.clone()),
                    page,
                };
                async move { client.list_workspaces(organization, &options).await }
            })
            .await?;
            count_workspaces(&workspaces, targets)
        }
    };

    debug!(
        pool_id = %pool.id,
        platform_version = ?version,
        ?algorithm,
        agents,
        "Computed agent demand"
    );
    Ok(Demand { algorithm, agents })
}

/// Modern demand: distinct apply-class workspaces plus plan-only runs.
pub fn count_runs(runs: &[Run]) -> i32 {
    let mut workspaces = BTreeSet::new();
    let mut plan_only = 0usize;

    for run in runs {
        if run.status.is_final() || run.status.awaits_user() {
            continue;
        }
        if run.plan_only {
            plan_only += 1;
        } else {
            workspaces.insert(&run.workspace_id);
        }
    }
    saturate(workspaces.len() + plan_only)
}

/// Legacy demand over workspaces with queued or running work.
///
/// Each workspace counts at most once, even when several selectors match it.
pub fn count_workspaces(workspaces: &[Workspace], targets: Option<&[TargetWorkspace]>) -> i32 {
    let Some(targets) = targets.filter(|targets| !targets.is_empty()) else {
        return saturate(workspaces.len());
    };

    let mut candidates: Vec<&Workspace> = workspaces.iter().collect();
    let mut matched = 0usize;
    for target in targets {
        let before = candidates.len();
        if let Some(id) = &target.id {
            if let Some(pos) = candidates.iter().position(|ws| &ws.id == id) {
                candidates.remove(pos);
            }
        } else if let Some(name) = &target.name {
            if let Some(pos) = candidates.iter().position(|ws| &ws.name == name) {
                candidates.remove(pos);
            }
        } else if let Some(pattern) = &target.wildcard_name {
            candidates.retain(|ws| !match_wildcard_name(pattern, &ws.name));
        }
        matched += before - candidates.len();
    }
    saturate(matched)
}

fn saturate(count: usize) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}
