//! Project convergence.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tfo_events::reasons;
use tfo_id::{ProjectId, TeamId};
use tracing::{debug, info, instrument, warn};

use super::resolve_teams;
use crate::controller::deletion::safely_deleted;
use crate::controller::{DeletionStrategy, Pass, Progress, ReconcileResult, Reconciler, Teardown};
use crate::remote::{Project, ProjectAccess, RemoteResultExt};
use crate::resources::ProjectSpec;

pub struct ProjectReconciler;

#[async_trait]
impl Reconciler<ProjectSpec> for ProjectReconciler {
    #[instrument(skip(self, pass), fields(key = %pass.key()))]
    async fn converge(&self, pass: &mut Pass<'_, ProjectSpec>) -> ReconcileResult<Progress> {
        let mut project = ensure_project(pass).await?;

        if pass.generation_changed() && project.name != pass.spec().name {
            project = pass
                .client
                .update_project(&project.id, &pass.spec().name)
                .await?;
            info!(project_id = %project.id, name = %project.name, "Renamed project");
            pass.normal(reasons::UPDATED, format!("Renamed project to {}", project.name));
        }
        pass.status_mut().name = project.name.clone();

        sync_team_access(pass, &project.id).await?;
        Ok(Progress::Converged)
    }
}

#[async_trait]
impl DeletionStrategy<ProjectSpec> for ProjectReconciler {
    async fn soft_delete(&self, pass: &mut Pass<'_, ProjectSpec>) -> ReconcileResult<Teardown> {
        let Some(id) = pass.status().project_id.clone() else {
            return Ok(Teardown::Complete);
        };
        let result = pass.client.delete_project(&id).await;
        safely_deleted(pass, result)
    }
}

/// Read the tracked project, creating it when there is none yet or it
/// vanished remotely.
async fn ensure_project(pass: &mut Pass<'_, ProjectSpec>) -> ReconcileResult<Project> {
    let Some(id) = pass.status().project_id.clone() else {
        let project = create_project(pass).await?;
        pass.normal(reasons::CREATED, format!("Created project {}", project.id));
        return Ok(project);
    };

    if let Some(project) = pass.client.read_project(&id).await.found()? {
        return Ok(project);
    }

    warn!(project_id = %id, "Project disappeared remotely, recreating");
    let project = create_project(pass).await?;
    pass.normal(
        reasons::RECREATED,
        format!("Project {id} was gone, created {}", project.id),
    );
    Ok(project)
}

async fn create_project(pass: &mut Pass<'_, ProjectSpec>) -> ReconcileResult<Project> {
    let project = pass
        .client
        .create_project(&pass.spec().organization, &pass.spec().name)
        .await?;
    info!(project_id = %project.id, "Created project");

    // The ID must survive a failure in any later step.
    pass.status_mut().project_id = Some(project.id.clone());
    pass.status_mut().name = project.name.clone();
    pass.checkpoint().await?;
    Ok(project)
}

async fn sync_team_access(pass: &Pass<'_, ProjectSpec>, project: &ProjectId) -> ReconcileResult<()> {
    let spec = pass.spec();
    let client = pass.client.as_ref();

    let references: Vec<_> = spec.team_access.iter().map(|entry| &entry.team).collect();
    let teams = resolve_teams(client, &spec.organization, &references).await?;
    let desired: BTreeMap<TeamId, ProjectAccess> = teams
        .into_iter()
        .zip(spec.team_access.iter().map(|entry| entry.access))
        .collect();

    let current = client.list_project_team_access(project).await?;
    for entry in &current {
        match desired.get(&entry.team_id) {
            Some(access) if *access == entry.access => {}
            Some(access) => {
                client.update_project_team_access(&entry.id, *access).await?;
                debug!(team_id = %entry.team_id, "Updated project team access");
            }
            None => {
                client.remove_project_team_access(&entry.id).await.found()?;
                debug!(team_id = %entry.team_id, "Removed project team access");
            }
        }
    }

    for (team, access) in &desired {
        if !current.iter().any(|entry| &entry.team_id == team) {
            client.add_project_team_access(project, team, *access).await?;
            debug!(team_id = %team, "Added project team access");
        }
    }
    Ok(())
}
