//! Module convergence.
//!
//! A module record runs a registry or VCS module inside an existing
//! workspace. Each pass takes one short step:
//!
//! 1. Resolve the workspace
//! 2. On a new spec generation or a restart command, upload a generated
//!    wrapper configuration as a fresh configuration version
//! 3. Once uploaded, start a run against that configuration version
//! 4. Track the run; retry unsuccessful runs per the retry policy and
//!    collect outputs from successful ones
//!
//! Tearing down never deletes the workspace. Destroy runs a destroy plan
//! against it and finishes when that succeeds.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tfo_events::reasons;
use tfo_id::{ConfigurationVersionId, WorkspaceId};
use tfo_reconcile::{RetryDecision, RetryStatus};
use tracing::{debug, info, instrument, warn};

use super::outputs::{publish_outputs, remove_outputs};
use super::resolve_workspace;
use crate::controller::deletion::{drive_destroy_run, DestroyOutcome, DestroyTracking};
use crate::controller::{DeletionStrategy, Pass, Progress, ReconcileResult, Reconciler, Teardown};
use crate::remote::{ConfigurationStatus, RemoteResultExt, Run, RunOptions};
use crate::resources::module::ConfigurationVersionRecord;
use crate::resources::{Command, ModuleSpec, ModuleStatus, RunRecord};

/// File name of the generated wrapper configuration.
pub const MODULE_CONFIGURATION_FILE: &str = "main.tf";

impl DestroyTracking for ModuleStatus {
    fn destroy_run(&mut self) -> &mut Option<RunRecord> {
        &mut self.destroy_run
    }

    fn retry(&mut self) -> &mut RetryStatus {
        &mut self.retry
    }
}

/// Generate the configuration that wraps the module.
///
/// Declared variables are passed through from workspace variables of the
/// same name; declared outputs are re-exported from the module.
pub fn render_module_configuration(spec: &ModuleSpec) -> BTreeMap<String, String> {
    let mut main = String::new();

    main.push_str(&format!("module \"{}\" {{\n", spec.name));
    main.push_str(&format!("  source = \"{}\"\n", spec.module.source));
    if let Some(version) = &spec.module.version {
        main.push_str(&format!("  version = \"{version}\"\n"));
    }
    for variable in &spec.variables {
        main.push_str(&format!("  {0} = var.{0}\n", variable.name));
    }
    main.push_str("}\n");

    for variable in &spec.variables {
        main.push_str(&format!("\nvariable \"{}\" {{}}\n", variable.name));
    }

    for output in &spec.outputs {
        main.push_str(&format!("\noutput \"{}\" {{\n", output.name));
        main.push_str(&format!("  value = module.{}.{}\n", spec.name, output.name));
        if output.sensitive {
            main.push_str("  sensitive = true\n");
        }
        main.push_str("}\n");
    }

    BTreeMap::from([(MODULE_CONFIGURATION_FILE.to_string(), main)])
}

pub struct ModuleReconciler;

#[async_trait]
impl Reconciler<ModuleSpec> for ModuleReconciler {
    #[instrument(skip(self, pass), fields(key = %pass.key()))]
    async fn converge(&self, pass: &mut Pass<'_, ModuleSpec>) -> ReconcileResult<Progress> {
        let workspace = resolve_workspace(
            pass.client.as_ref(),
            &pass.spec().organization,
            &pass.spec().workspace,
        )
        .await?;

        if pass.status().workspace_id.as_ref() != Some(&workspace.id) {
            if let Some(previous) = &pass.status().workspace_id {
                info!(from = %previous, to = %workspace.id, "Module moved to another workspace");
            }
            let status = pass.status_mut();
            status.workspace_id = Some(workspace.id.clone());
            status.configuration_version = None;
            status.run = None;
        }

        let restart = match pass.take_command().await? {
            Some(Command::Restart) => true,
            Some(other) => {
                warn!(command = ?other, "Modules only accept restart commands");
                false
            }
            None => false,
        };

        let generation = pass.record.meta.generation;
        let outdated = pass
            .status()
            .configuration_version
            .as_ref()
            .is_none_or(|cv| cv.generation != generation);
        if outdated || restart {
            upload(pass, &workspace.id, generation).await?;
        }

        let Some(cv) = pass.status().configuration_version.clone() else {
            return Ok(Progress::Waiting);
        };
        if cv.status != ConfigurationStatus::Uploaded {
            let current = pass.client.read_configuration_version(&cv.id).await?;
            if let Some(record) = pass.status_mut().configuration_version.as_mut() {
                record.status = current.status;
            }
            if current.status != ConfigurationStatus::Uploaded {
                debug!(configuration_version = %cv.id, status = %current.status.as_str(), "Waiting for upload");
                return Ok(Progress::Waiting);
            }
        }

        track_run(pass, &workspace.id, &cv.id).await
    }
}

#[async_trait]
impl DeletionStrategy<ModuleSpec> for ModuleReconciler {
    async fn retain(&self, pass: &mut Pass<'_, ModuleSpec>) -> ReconcileResult<Teardown> {
        remove_outputs(pass).await?;
        Ok(Teardown::Complete)
    }

    async fn destroy(&self, pass: &mut Pass<'_, ModuleSpec>) -> ReconcileResult<Teardown> {
        let Some(workspace) = pass.status().workspace_id.clone() else {
            return Ok(Teardown::Complete);
        };
        let policy = pass.spec().retry_policy;

        match drive_destroy_run(pass, &workspace, policy).await? {
            DestroyOutcome::Pending => Ok(Teardown::Pending),
            DestroyOutcome::Finished | DestroyOutcome::NothingToDestroy | DestroyOutcome::Gone => {
                remove_outputs(pass).await?;
                Ok(Teardown::Complete)
            }
        }
    }
}

/// Upload the wrapper configuration as a new configuration version.
///
/// The version is recorded only once its files are uploaded, so a failed
/// upload leaves the record outdated and the next pass starts over.
async fn upload(
    pass: &mut Pass<'_, ModuleSpec>,
    workspace: &WorkspaceId,
    generation: u64,
) -> ReconcileResult<()> {
    let version = pass.client.create_configuration_version(workspace).await?;
    let files = render_module_configuration(pass.spec());
    pass.client.upload_configuration(&version.id, &files).await?;
    let uploaded = pass.client.read_configuration_version(&version.id).await?;

    let status = pass.status_mut();
    status.configuration_version = Some(ConfigurationVersionRecord {
        id: version.id.clone(),
        status: uploaded.status,
        generation,
    });
    status.run = None;
    info!(
        configuration_version = %version.id,
        generation,
        status = %uploaded.status.as_str(),
        "Uploaded module configuration"
    );
    Ok(())
}

async fn start_run(
    pass: &Pass<'_, ModuleSpec>,
    workspace: &WorkspaceId,
    configuration_version: &ConfigurationVersionId,
) -> ReconcileResult<Run> {
    let mut options = RunOptions::new(workspace.clone(), "Module run triggered by the operator");
    options.configuration_version_id = Some(configuration_version.clone());
    Ok(pass.client.create_run(&options).await?)
}

async fn track_run(
    pass: &mut Pass<'_, ModuleSpec>,
    workspace: &WorkspaceId,
    configuration_version: &ConfigurationVersionId,
) -> ReconcileResult<Progress> {
    let tracked = pass
        .status()
        .run
        .clone()
        .filter(|run| run.configuration_version.as_ref() == Some(configuration_version));
    let Some(tracked) = tracked else {
        let run = start_run(pass, workspace, configuration_version).await?;
        info!(run_id = %run.id, "Started module run");
        pass.normal(reasons::RUN_STARTED, format!("Started run {}", run.id));
        pass.status_mut().run = Some(RunRecord::observed(&run));
        return Ok(Progress::Waiting);
    };

    let Some(run) = pass.client.read_run(&tracked.id).await.found()? else {
        warn!(run_id = %tracked.id, "Tracked run disappeared");
        pass.status_mut().run = None;
        return Ok(Progress::Waiting);
    };
    pass.status_mut().run = Some(RunRecord {
        output_run_id: tracked.output_run_id.clone(),
        ..RunRecord::observed(&run)
    });

    if run.status.is_successful() {
        pass.status_mut().retry.on_success();
        if tracked.output_run_id.as_ref() != Some(&run.id) {
            let outputs = pass.client.read_current_outputs(workspace).await?;
            let plain = publish_outputs(pass, &outputs).await?;
            let status = pass.status_mut();
            status.outputs = plain;
            if let Some(record) = status.run.as_mut() {
                record.output_run_id = Some(run.id.clone());
            }
            info!(run_id = %run.id, outputs = outputs.len(), "Collected module outputs");
            pass.normal(
                reasons::OUTPUTS_COLLECTED,
                format!("Collected {} outputs from run {}", outputs.len(), run.id),
            );
        }
        return Ok(Progress::Converged);
    }

    if !run.status.is_unsuccessful() {
        debug!(run_id = %run.id, status = %run.status, "Module run in progress");
        return Ok(Progress::Waiting);
    }
    if tracked.status.is_unsuccessful() {
        // Decided in an earlier pass.
        return Ok(Progress::Converged);
    }

    let policy = pass.spec().retry_policy;
    let mut retry_status = pass.status().retry;
    let decision = retry_status.on_unsuccessful(policy.as_ref());
    match decision {
        RetryDecision::Retry { attempt } => {
            let retry = match start_run(pass, workspace, configuration_version).await {
                Ok(retry) => retry,
                Err(e) => {
                    // Keep the last decided run so the next pass decides again.
                    pass.status_mut().run = Some(tracked);
                    return Err(e);
                }
            };
            pass.status_mut().retry = retry_status;
            info!(run_id = %retry.id, attempt, "Retrying module run");
            pass.normal(
                reasons::RUN_RETRIED,
                format!(
                    "Run {} ended {}, started {} (retry {attempt})",
                    run.id, run.status, retry.id
                ),
            );
            pass.status_mut().run = Some(RunRecord::observed(&retry));
            Ok(Progress::Waiting)
        }
        RetryDecision::Exhausted => {
            warn!(run_id = %run.id, status = %run.status, "Module run retries exhausted");
            pass.warning(
                reasons::RETRY_LIMIT_REACHED,
                format!("Run {} ended {} and the retry limit is reached", run.id, run.status),
            );
            Ok(Progress::Converged)
        }
        RetryDecision::Disabled => {
            warn!(run_id = %run.id, status = %run.status, "Module run unsuccessful");
            pass.warning(
                reasons::RUN_UNSUCCESSFUL,
                format!("Run {} ended {}", run.id, run.status),
            );
            Ok(Progress::Converged)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tfo_reconcile::RetryPolicy;

    use super::*;
    use crate::controller::Action;
    use crate::reconcilers::testing::{credentials, Harness, NAMESPACE, ORGANIZATION};
    use crate::remote::{RemoteError, RunStatus, Workspace};
    use crate::resources::module::{ModuleOutput, ModuleSource, ModuleVariable};
    use crate::resources::{DeletionPolicy, IdOrName, RecordKey};
    use crate::secrets::{ObjectClass, SecretStore};
    use crate::store::IntentStore;

    fn spec() -> ModuleSpec {
        ModuleSpec {
            organization: ORGANIZATION.to_string(),
            token: credentials(),
            deletion_policy: Some(DeletionPolicy::Destroy),
            module: ModuleSource {
                source: "app.terraform.io/acme/vpc/aws".to_string(),
                version: Some("1.2.0".to_string()),
            },
            workspace: IdOrName::by_name("net"),
            name: "this".to_string(),
            variables: vec![ModuleVariable {
                name: "cidr".to_string(),
            }],
            outputs: vec![
                ModuleOutput {
                    name: "vpc_id".to_string(),
                    sensitive: false,
                },
                ModuleOutput {
                    name: "secret".to_string(),
                    sensitive: true,
                },
            ],
            retry_policy: None,
        }
    }

    async fn setup(spec: ModuleSpec) -> (Harness<ModuleSpec>, Workspace, RecordKey) {
        let harness = Harness::new(ModuleReconciler).await;
        let workspace = harness.remote.seed_workspace(ORGANIZATION, "net");
        let key = harness.declare("vpc", spec).await;
        (harness, workspace, key)
    }

    fn tracked_run(record: &crate::resources::Record<ModuleSpec>) -> RunRecord {
        record.status.run.clone().unwrap()
    }

    #[test]
    fn test_render_wrapper_configuration() {
        let files = render_module_configuration(&spec());
        let main = &files[MODULE_CONFIGURATION_FILE];

        assert!(main.contains("module \"this\" {"));
        assert!(main.contains("source = \"app.terraform.io/acme/vpc/aws\""));
        assert!(main.contains("version = \"1.2.0\""));
        assert!(main.contains("cidr = var.cidr"));
        assert!(main.contains("variable \"cidr\" {}"));
        assert!(main.contains("value = module.this.vpc_id"));
        assert!(main.contains("output \"secret\" {\n  value = module.this.secret\n  sensitive = true"));
    }

    #[test]
    fn test_render_without_version() {
        let mut spec = spec();
        spec.module.version = None;
        let files = render_module_configuration(&spec);
        assert!(!files[MODULE_CONFIGURATION_FILE].contains("version"));
    }

    #[tokio::test]
    async fn test_uploads_configuration_and_starts_run() {
        let (harness, workspace, key) = setup(spec()).await;

        assert_eq!(
            harness.reconcile(&key).await,
            Action::Requeue(harness.engine.config().retry_interval)
        );

        let record = harness.record(&key).await;
        assert_eq!(record.status.workspace_id, Some(workspace.id.clone()));
        let cv = record.status.configuration_version.clone().unwrap();
        assert_eq!(cv.status, ConfigurationStatus::Uploaded);
        assert_eq!(cv.generation, record.meta.generation);
        assert_eq!(tracked_run(&record).configuration_version, Some(cv.id.clone()));

        let uploaded = harness.remote.configuration_version(&cv.id).unwrap();
        assert!(uploaded.files.contains_key(MODULE_CONFIGURATION_FILE));
        assert_eq!(harness.remote.runs_for(&workspace.id).len(), 1);
        assert!(harness.reasons().contains(&reasons::RUN_STARTED.to_string()));
    }

    #[tokio::test]
    async fn test_successful_run_publishes_outputs_once() {
        let (harness, workspace, key) = setup(spec()).await;
        harness.remote.set_auto_complete_runs(true);
        harness.remote.set_outputs(
            &workspace.id,
            &[
                ("vpc_id", json!("vpc-123"), false),
                ("secret", json!("hunter2"), true),
            ],
        );

        harness.reconcile(&key).await;
        assert_eq!(
            harness.reconcile(&key).await,
            Action::Requeue(harness.engine.config().sync_interval)
        );

        let record = harness.record(&key).await;
        assert_eq!(
            record.status.outputs.get("vpc_id").map(String::as_str),
            Some("vpc-123")
        );
        assert!(!record.status.outputs.contains_key("secret"));
        let run = tracked_run(&record);
        assert_eq!(run.output_run_id, Some(run.id.clone()));

        let config = harness
            .secrets
            .get(ObjectClass::Config, NAMESPACE, "vpc-outputs")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(config.get("vpc_id").map(String::as_str), Some("vpc-123"));
        let secret = harness
            .secrets
            .get(ObjectClass::Secret, NAMESPACE, "vpc-outputs")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(secret.get("secret").map(String::as_str), Some("hunter2"));

        harness.reconcile(&key).await;
        let collected = harness
            .reasons()
            .iter()
            .filter(|reason| *reason == reasons::OUTPUTS_COLLECTED)
            .count();
        assert_eq!(collected, 1);
    }

    #[tokio::test]
    async fn test_spec_change_and_restart_upload_again() {
        let (harness, workspace, key) = setup(spec()).await;
        harness.remote.set_auto_complete_runs(true);
        harness.reconcile(&key).await;
        harness.reconcile(&key).await;
        let first = harness
            .record(&key)
            .await
            .status
            .configuration_version
            .unwrap();

        let mut changed = spec();
        changed.module.version = Some("1.3.0".to_string());
        harness.store.apply(&key, changed).await.unwrap();
        harness.reconcile(&key).await;

        let second = harness
            .record(&key)
            .await
            .status
            .configuration_version
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.generation, first.generation + 1);

        harness.reconcile(&key).await;
        harness
            .store
            .push_command(&key, Command::Restart)
            .await
            .unwrap();
        harness.reconcile(&key).await;

        let third = harness
            .record(&key)
            .await
            .status
            .configuration_version
            .unwrap();
        assert_ne!(second.id, third.id);
        assert_eq!(third.generation, second.generation);
        assert_eq!(harness.remote.runs_for(&workspace.id).len(), 3);
    }

    #[tokio::test]
    async fn test_unsuccessful_runs_are_retried_up_to_the_limit() {
        let mut spec = spec();
        spec.retry_policy = Some(RetryPolicy::new(1));
        let (harness, workspace, key) = setup(spec).await;

        harness.reconcile(&key).await;
        let first = tracked_run(&harness.record(&key).await);
        harness.remote.set_run_status(&first.id, RunStatus::Errored);
        harness.reconcile(&key).await;

        let record = harness.record(&key).await;
        let second = tracked_run(&record);
        assert_ne!(first.id, second.id);
        assert_eq!(record.status.retry.failed_count, 1);
        assert!(harness.reasons().contains(&reasons::RUN_RETRIED.to_string()));

        harness.remote.set_run_status(&second.id, RunStatus::Errored);
        harness.reconcile(&key).await;
        harness.reconcile(&key).await;

        assert_eq!(harness.remote.runs_for(&workspace.id).len(), 2);
        let limits = harness
            .reasons()
            .iter()
            .filter(|reason| *reason == reasons::RETRY_LIMIT_REACHED)
            .count();
        assert_eq!(limits, 1);
    }

    #[tokio::test]
    async fn test_failed_upload_starts_over_with_fresh_version() {
        let (harness, workspace, key) = setup(spec()).await;
        harness
            .remote
            .fail_next("upload_configuration", RemoteError::RateLimited);

        assert_eq!(
            harness.reconcile(&key).await,
            Action::Requeue(harness.engine.config().retry_interval)
        );
        assert!(harness
            .record(&key)
            .await
            .status
            .configuration_version
            .is_none());

        harness.reconcile(&key).await;

        let record = harness.record(&key).await;
        let cv = record.status.configuration_version.clone().unwrap();
        assert_eq!(cv.status, ConfigurationStatus::Uploaded);
        assert_eq!(tracked_run(&record).configuration_version, Some(cv.id));
        assert_eq!(harness.remote.calls_of("create_configuration_version"), 2);
        assert_eq!(harness.remote.runs_for(&workspace.id).len(), 1);
    }

    #[tokio::test]
    async fn test_retry_survives_failed_run_creation() {
        let mut spec = spec();
        spec.retry_policy = Some(RetryPolicy::new(3));
        let (harness, workspace, key) = setup(spec).await;

        harness.reconcile(&key).await;
        let first = tracked_run(&harness.record(&key).await);
        harness.remote.set_run_status(&first.id, RunStatus::Errored);
        harness.remote.fail_next("create_run", RemoteError::RateLimited);

        assert_eq!(
            harness.reconcile(&key).await,
            Action::Requeue(harness.engine.config().retry_interval)
        );
        let record = harness.record(&key).await;
        assert_eq!(tracked_run(&record).id, first.id);
        assert_eq!(record.status.retry.failed_count, 0);

        harness.reconcile(&key).await;

        let record = harness.record(&key).await;
        let second = tracked_run(&record);
        assert_ne!(second.id, first.id);
        assert_eq!(record.status.retry.failed_count, 1);
        assert_eq!(harness.remote.runs_for(&workspace.id).len(), 2);
        assert!(harness.reasons().contains(&reasons::RUN_RETRIED.to_string()));
    }

    #[tokio::test]
    async fn test_missing_workspace_fails_pass() {
        let harness = Harness::new(ModuleReconciler).await;
        let key = harness.declare("vpc", spec()).await;

        harness.reconcile(&key).await;

        assert!(harness.record(&key).await.status.workspace_id.is_none());
        assert!(harness
            .reasons()
            .contains(&reasons::RECONCILE_FAILED.to_string()));
    }

    #[tokio::test]
    async fn test_destroy_runs_destroy_plan_and_keeps_workspace() {
        let (harness, workspace, key) = setup(spec()).await;
        harness.remote.set_auto_complete_runs(true);
        harness.reconcile(&key).await;
        harness.reconcile(&key).await;

        harness.request_deletion(&key).await;
        harness.reconcile(&key).await;
        assert!(harness.exists(&key).await);
        assert!(harness
            .reasons()
            .contains(&reasons::DESTROY_RUN_STARTED.to_string()));

        harness.reconcile(&key).await;
        assert!(!harness.exists(&key).await);
        let remaining = harness.remote.workspace(&workspace.id).unwrap();
        assert_eq!(remaining.resource_count, 0);
        assert!(harness
            .secrets
            .get(ObjectClass::Config, NAMESPACE, "vpc-outputs")
            .await
            .unwrap()
            .is_none());
    }
}
