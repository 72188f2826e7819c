//! Workspace convergence.
//!
//! The workspace itself is created, repaired and updated first. The
//! sub-resources follow in a fixed order: tags, variables, team access, run
//! triggers, notifications and variable sets. Runs come last: the tracked
//! run is followed (adopting newer upstream runs and retrying failures),
//! outputs of applied runs are published, and a queued run command is
//! started.
//!
//! All four deletion policies apply:
//! - retain leaves the workspace
//! - soft deletes it only once it manages no resources
//! - destroy runs a destroy plan first, then deletes it
//! - force deletes it outright

mod runs;
mod settings;

use async_trait::async_trait;
use tfo_events::reasons;
use tfo_id::ProjectId;
use tfo_reconcile::RetryStatus;
use tracing::{info, instrument, warn};

use super::outputs::remove_outputs;
use super::resolve_agent_pool;
use crate::controller::deletion::{
    deleted, drive_destroy_run, safely_deleted, DestroyOutcome, DestroyTracking,
};
use crate::controller::{
    DeletionStrategy, Pass, Progress, ReconcileError, ReconcileResult, Reconciler, Teardown,
};
use crate::remote::{collect_pages, RemoteClient, RemoteResultExt, Workspace, WorkspaceOptions};
use crate::resources::workspace::ApplyMethod;
use crate::resources::{IdOrName, RunRecord, WorkspaceSpec, WorkspaceStatus};

impl DestroyTracking for WorkspaceStatus {
    fn destroy_run(&mut self) -> &mut Option<RunRecord> {
        &mut self.destroy_run
    }

    fn retry(&mut self) -> &mut RetryStatus {
        &mut self.retry
    }
}

pub struct WorkspaceReconciler;

#[async_trait]
impl Reconciler<WorkspaceSpec> for WorkspaceReconciler {
    #[instrument(skip(self, pass), fields(key = %pass.key()))]
    async fn converge(&self, pass: &mut Pass<'_, WorkspaceSpec>) -> ReconcileResult<Progress> {
        let options = desired_options(pass).await?;
        let workspace = ensure_workspace(pass, &options).await?;
        pass.status_mut().terraform_version = Some(workspace.terraform_version.clone());

        settings::sync_tags(pass, &workspace).await?;
        settings::sync_variables(pass, &workspace.id).await?;
        settings::sync_team_access(pass, &workspace.id).await?;
        settings::sync_run_triggers(pass, &workspace.id).await?;
        settings::sync_notifications(pass, &workspace.id).await?;
        settings::sync_variable_sets(pass, &workspace.id).await?;

        let progress = runs::track_runs(pass, &workspace).await?;
        let started = runs::run_command(pass, &workspace).await?;
        Ok(if started { Progress::Waiting } else { progress })
    }
}

#[async_trait]
impl DeletionStrategy<WorkspaceSpec> for WorkspaceReconciler {
    async fn retain(&self, pass: &mut Pass<'_, WorkspaceSpec>) -> ReconcileResult<Teardown> {
        remove_outputs(pass).await?;
        Ok(Teardown::Complete)
    }

    async fn soft_delete(&self, pass: &mut Pass<'_, WorkspaceSpec>) -> ReconcileResult<Teardown> {
        let Some(id) = pass.status().workspace_id.clone() else {
            return Ok(Teardown::Complete);
        };
        let result = pass.client.safe_delete_workspace(&id).await;
        finish(pass, safely_deleted(pass, result)?).await
    }

    async fn destroy(&self, pass: &mut Pass<'_, WorkspaceSpec>) -> ReconcileResult<Teardown> {
        let Some(id) = pass.status().workspace_id.clone() else {
            return Ok(Teardown::Complete);
        };
        let policy = pass.spec().retry_policy;

        let teardown = match drive_destroy_run(pass, &id, policy).await? {
            DestroyOutcome::Pending => Teardown::Pending,
            DestroyOutcome::Gone => Teardown::Complete,
            DestroyOutcome::Finished | DestroyOutcome::NothingToDestroy => {
                let result = pass.client.delete_workspace(&id).await;
                deleted(result)?
            }
        };
        finish(pass, teardown).await
    }

    async fn force_delete(&self, pass: &mut Pass<'_, WorkspaceSpec>) -> ReconcileResult<Teardown> {
        let Some(id) = pass.status().workspace_id.clone() else {
            return Ok(Teardown::Complete);
        };
        let result = pass.client.delete_workspace(&id).await;
        finish(pass, deleted(result)?).await
    }
}

async fn finish(
    pass: &Pass<'_, WorkspaceSpec>,
    teardown: Teardown,
) -> ReconcileResult<Teardown> {
    if teardown == Teardown::Complete {
        remove_outputs(pass).await?;
    }
    Ok(teardown)
}

/// Settings the workspace should carry, with references resolved.
async fn desired_options(pass: &Pass<'_, WorkspaceSpec>) -> ReconcileResult<WorkspaceOptions> {
    let spec = pass.spec();
    let client = pass.client.as_ref();

    let agent_pool_id = match &spec.agent_pool {
        Some(reference) => Some(
            resolve_agent_pool(client, &spec.organization, reference)
                .await?
                .id,
        ),
        None => None,
    };
    let project_id = match &spec.project {
        Some(reference) => Some(resolve_project(client, &spec.organization, reference).await?),
        None => None,
    };

    Ok(WorkspaceOptions {
        name: spec.name.clone(),
        description: spec.description.clone(),
        execution_mode: spec.execution_mode,
        terraform_version: spec.terraform_version.clone(),
        working_directory: spec.working_directory.clone(),
        auto_apply: spec.apply_method == ApplyMethod::Auto,
        allow_destroy_plan: spec.allow_destroy_plan,
        agent_pool_id,
        project_id,
    })
}

async fn resolve_project(
    client: &dyn RemoteClient,
    organization: &str,
    reference: &IdOrName<ProjectId>,
) -> ReconcileResult<ProjectId> {
    if let Some(id) = &reference.id {
        return match client.read_project(id).await.found()? {
            Some(project) => Ok(project.id),
            None => Err(ReconcileError::unresolved("project", id.to_string())),
        };
    }
    let name = reference.name.as_deref().unwrap_or_default();
    let projects = collect_pages(|page| client.list_projects(organization, page)).await?;
    projects
        .into_iter()
        .find(|project| project.name == name)
        .map(|project| project.id)
        .ok_or_else(|| ReconcileError::unresolved("project", name))
}

/// Read the tracked workspace, creating it when there is none yet or it
/// vanished remotely, and update it when the spec changed.
async fn ensure_workspace(
    pass: &mut Pass<'_, WorkspaceSpec>,
    options: &WorkspaceOptions,
) -> ReconcileResult<Workspace> {
    let Some(id) = pass.status().workspace_id.clone() else {
        let workspace = create_workspace(pass, options).await?;
        pass.normal(
            reasons::CREATED,
            format!("Created workspace {}", workspace.id),
        );
        return Ok(workspace);
    };

    let Some(workspace) = pass.client.read_workspace(&id).await.found()? else {
        warn!(workspace_id = %id, "Workspace disappeared remotely, recreating");
        let workspace = create_workspace(pass, options).await?;
        pass.normal(
            reasons::RECREATED,
            format!("Workspace {id} was gone, created {}", workspace.id),
        );
        return Ok(workspace);
    };

    if pass.generation_changed() && !options.matches(&workspace) {
        let updated = pass.client.update_workspace(&workspace.id, options).await?;
        info!(workspace_id = %updated.id, "Updated workspace settings");
        pass.normal(reasons::UPDATED, "Updated workspace settings");
        return Ok(updated);
    }
    Ok(workspace)
}

async fn create_workspace(
    pass: &mut Pass<'_, WorkspaceSpec>,
    options: &WorkspaceOptions,
) -> ReconcileResult<Workspace> {
    let workspace = pass
        .client
        .create_workspace(&pass.spec().organization, options)
        .await?;
    info!(workspace_id = %workspace.id, "Created workspace");

    // Runs of a previous incarnation mean nothing for this one.
    let status = pass.status_mut();
    status.workspace_id = Some(workspace.id.clone());
    status.run = None;
    status.plan = None;
    status.retry = RetryStatus::default();
    pass.checkpoint().await?;
    Ok(workspace)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::controller::Action;
    use crate::reconcilers::testing::{Harness, NAMESPACE, ORGANIZATION};
    use crate::remote::{NotificationDestination, RunStatus, VariableCategory, WorkspaceAccess};
    use crate::resources::workspace::{NotificationSpec, TeamAccessSpec, VariableSpec};
    use crate::resources::{Command, DeletionPolicy, RunType, SecretKeyRef};
    use crate::secrets::{ObjectClass, SecretStore};
    use crate::store::IntentStore;

    fn spec() -> WorkspaceSpec {
        serde_json::from_value(json!({
            "name": "net",
            "organization": ORGANIZATION,
            "token": {"name": "tfc", "key": "token"},
            "deletionPolicy": "force"
        }))
        .unwrap()
    }

    fn variable(name: &str, value: &str) -> VariableSpec {
        VariableSpec {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
            hcl: false,
            sensitive: false,
            description: String::new(),
        }
    }

    fn workspace_id(record: &crate::resources::Record<WorkspaceSpec>) -> tfo_id::WorkspaceId {
        record.status.workspace_id.clone().unwrap()
    }

    #[tokio::test]
    async fn test_creates_workspace_with_settings() {
        let harness = Harness::new(WorkspaceReconciler).await;
        let team = harness.remote.seed_team(ORGANIZATION, "ops");
        let set = harness.remote.seed_variable_set(ORGANIZATION, "aws-creds");
        let upstream = harness.remote.seed_workspace(ORGANIZATION, "vpc");
        harness
            .secrets
            .put(
                ObjectClass::Secret,
                NAMESPACE,
                "db",
                [("password".to_string(), "s3cret".to_string())].into(),
            )
            .await
            .unwrap();

        let mut spec = spec();
        spec.tags = vec!["net".to_string(), "prod".to_string()];
        spec.terraform_variables = vec![variable("region", "eu-west-1")];
        spec.environment_variables = vec![VariableSpec {
            value: None,
            value_from: Some(SecretKeyRef {
                name: "db".to_string(),
                key: "password".to_string(),
            }),
            sensitive: true,
            ..variable("DB_PASSWORD", "")
        }];
        spec.team_access = vec![TeamAccessSpec {
            team: IdOrName::by_name("ops"),
            access: WorkspaceAccess::Write,
        }];
        spec.run_triggers = vec![IdOrName::by_name("vpc")];
        spec.notifications = vec![NotificationSpec {
            name: "alerts".to_string(),
            destination_type: NotificationDestination::Email,
            url: None,
            enabled: true,
            triggers: vec!["run:errored".to_string()],
        }];
        spec.variable_sets = vec![IdOrName::by_name("aws-creds")];
        let key = harness.declare("net", spec).await;

        assert_eq!(
            harness.reconcile(&key).await,
            Action::Requeue(harness.engine.config().sync_interval)
        );

        let id = workspace_id(&harness.record(&key).await);
        let workspace = harness.remote.workspace(&id).unwrap();
        assert_eq!(workspace.tag_names.len(), 2);

        let variables = harness.remote.variables_for(&id);
        assert_eq!(variables.len(), 2);
        let password = variables
            .iter()
            .find(|v| v.key == "DB_PASSWORD")
            .unwrap();
        assert_eq!(password.category, VariableCategory::Env);
        assert_eq!(password.value.as_deref(), Some("s3cret"));

        let access = harness.remote.list_team_access(&id).await.unwrap();
        assert_eq!(access[0].team_id, team.id);
        let triggers = harness.remote.list_run_triggers(&id).await.unwrap();
        assert_eq!(triggers[0].sourceable_id, upstream.id);
        assert_eq!(harness.remote.list_notifications(&id).await.unwrap().len(), 1);
        let sets = harness.remote.list_workspace_variable_sets(&id).await.unwrap();
        assert_eq!(sets[0].id, set.id);

        let mutations = harness.remote.mutation_count();
        harness.reconcile(&key).await;
        assert_eq!(harness.remote.mutation_count(), mutations);
    }

    #[tokio::test]
    async fn test_removed_settings_are_removed_remotely() {
        let harness = Harness::new(WorkspaceReconciler).await;
        let mut spec = spec();
        spec.tags = vec!["net".to_string(), "prod".to_string()];
        spec.terraform_variables = vec![variable("region", "eu-west-1"), variable("az", "a")];
        let key = harness.declare("net", spec.clone()).await;
        harness.reconcile(&key).await;

        spec.tags = vec!["net".to_string()];
        spec.terraform_variables = vec![variable("region", "eu-central-1")];
        harness.store.apply(&key, spec).await.unwrap();
        harness.reconcile(&key).await;

        let id = workspace_id(&harness.record(&key).await);
        assert_eq!(harness.remote.workspace(&id).unwrap().tag_names, vec!["net"]);
        let variables = harness.remote.variables_for(&id);
        assert_eq!(variables.len(), 1);
        assert_eq!(variables[0].value.as_deref(), Some("eu-central-1"));
    }

    #[tokio::test]
    async fn test_missing_variable_secret_keeps_workspace_id() {
        let harness = Harness::new(WorkspaceReconciler).await;
        let mut spec = spec();
        spec.terraform_variables = vec![VariableSpec {
            value: None,
            value_from: Some(SecretKeyRef {
                name: "absent".to_string(),
                key: "value".to_string(),
            }),
            ..variable("region", "")
        }];
        let key = harness.declare("net", spec).await;

        harness.reconcile(&key).await;

        let record = harness.record(&key).await;
        assert!(record.status.workspace_id.is_some());
        assert_eq!(record.status.observed_generation, 0);
        assert!(harness
            .reasons()
            .contains(&reasons::RECONCILE_FAILED.to_string()));
    }

    #[tokio::test]
    async fn test_settings_change_updates_workspace() {
        let harness = Harness::new(WorkspaceReconciler).await;
        let key = harness.declare("net", spec()).await;
        harness.reconcile(&key).await;

        let mut changed = spec();
        changed.description = "core network".to_string();
        changed.apply_method = ApplyMethod::Auto;
        harness.store.apply(&key, changed).await.unwrap();
        harness.reconcile(&key).await;

        let id = workspace_id(&harness.record(&key).await);
        let workspace = harness.remote.workspace(&id).unwrap();
        assert_eq!(workspace.description, "core network");
        assert!(workspace.auto_apply);
        assert!(harness.reasons().contains(&reasons::UPDATED.to_string()));
    }

    #[tokio::test]
    async fn test_run_command_and_outputs() {
        let harness = Harness::new(WorkspaceReconciler).await;
        let key = harness.declare("net", spec()).await;
        harness.reconcile(&key).await;
        let id = workspace_id(&harness.record(&key).await);

        harness
            .store
            .push_command(
                &key,
                Command::Run {
                    run_type: RunType::Apply,
                    terraform_version: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(
            harness.reconcile(&key).await,
            Action::Requeue(harness.engine.config().retry_interval)
        );
        let run = harness.record(&key).await.status.run.unwrap();
        assert_eq!(run.status, RunStatus::Pending);

        harness
            .remote
            .set_outputs(&id, &[("subnet", json!("10.0.1.0/24"), false)]);
        harness.remote.set_run_status(&run.id, RunStatus::Applied);
        harness.reconcile(&key).await;

        let tracked = harness.record(&key).await.status.run.unwrap();
        assert_eq!(tracked.status, RunStatus::Applied);
        assert_eq!(tracked.output_run_id, Some(run.id));
        let config = harness
            .secrets
            .get(ObjectClass::Config, NAMESPACE, "net-outputs")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(config.get("subnet").map(String::as_str), Some("10.0.1.0/24"));
    }

    #[tokio::test]
    async fn test_plan_command_is_tracked_separately() {
        let harness = Harness::new(WorkspaceReconciler).await;
        let key = harness.declare("net", spec()).await;
        harness.reconcile(&key).await;

        harness
            .store
            .push_command(
                &key,
                Command::Run {
                    run_type: RunType::Plan,
                    terraform_version: Some("1.9.0".to_string()),
                },
            )
            .await
            .unwrap();
        harness.reconcile(&key).await;

        let record = harness.record(&key).await;
        assert!(record.status.plan.is_some());
        assert!(record.status.run.is_none());
    }

    #[tokio::test]
    async fn test_upstream_run_is_adopted() {
        let harness = Harness::new(WorkspaceReconciler).await;
        let key = harness.declare("net", spec()).await;
        harness.reconcile(&key).await;
        let id = workspace_id(&harness.record(&key).await);

        let upstream = harness.remote.insert_run(&id, RunStatus::Planning, false);
        harness.reconcile(&key).await;

        assert_eq!(harness.record(&key).await.status.run.unwrap().id, upstream.id);
    }

    #[tokio::test]
    async fn test_destroy_without_history_deletes_directly() {
        let harness = Harness::new(WorkspaceReconciler).await;
        let mut spec = spec();
        spec.deletion_policy = Some(DeletionPolicy::Destroy);
        let key = harness.declare("net", spec).await;
        harness.reconcile(&key).await;
        let id = workspace_id(&harness.record(&key).await);

        harness.request_deletion(&key).await;
        harness.reconcile(&key).await;

        assert!(!harness.exists(&key).await);
        assert!(harness.remote.workspace(&id).is_none());
        assert!(!harness
            .reasons()
            .contains(&reasons::DESTROY_RUN_STARTED.to_string()));
    }
}
