//! Workspace runs: commands, tracking, retries and outputs.

use tfo_events::reasons;
use tfo_reconcile::RetryDecision;
use tracing::{debug, info, warn};

use crate::controller::{Pass, Progress, ReconcileResult};
use crate::reconcilers::outputs::publish_outputs;
use crate::remote::{RemoteResultExt, Run, RunOptions, Workspace};
use crate::resources::{Command, RunRecord, RunType, WorkspaceSpec};

/// Start the run a queued command asks for. Returns true when a run was
/// started.
pub(super) async fn run_command(
    pass: &mut Pass<'_, WorkspaceSpec>,
    workspace: &Workspace,
) -> ReconcileResult<bool> {
    let Some(command) = pass.take_command().await? else {
        return Ok(false);
    };
    let Command::Run {
        run_type,
        terraform_version,
    } = command
    else {
        warn!(command = ?command, "Workspaces only accept run commands");
        return Ok(false);
    };

    let mut options = RunOptions::new(workspace.id.clone(), "Run requested through the operator");
    options.plan_only = run_type == RunType::Plan;
    options.refresh_only = run_type == RunType::Refresh;
    options.terraform_version = terraform_version;

    let run = pass.client.create_run(&options).await?;
    info!(run_id = %run.id, ?run_type, "Started run");
    let kind = match run_type {
        RunType::Plan => "plan",
        RunType::Apply => "apply",
        RunType::Refresh => "refresh",
    };
    pass.normal(reasons::RUN_STARTED, format!("Started {kind} run {}", run.id));

    let record = Some(RunRecord::observed(&run));
    if run.plan_only {
        pass.status_mut().plan = record;
    } else {
        pass.status_mut().run = record;
    }
    Ok(true)
}

/// Follow the latest apply-class run and the latest plan-only run.
pub(super) async fn track_runs(
    pass: &mut Pass<'_, WorkspaceSpec>,
    workspace: &Workspace,
) -> ReconcileResult<Progress> {
    let plan = track_plan(pass).await?;
    let run = track_run(pass, workspace).await?;
    Ok(match (plan, run) {
        (Progress::Converged, Progress::Converged) => Progress::Converged,
        _ => Progress::Waiting,
    })
}

async fn track_plan(pass: &mut Pass<'_, WorkspaceSpec>) -> ReconcileResult<Progress> {
    let Some(tracked) = pass.status().plan.clone() else {
        return Ok(Progress::Converged);
    };
    if tracked.status.is_final() {
        return Ok(Progress::Converged);
    }
    let Some(run) = pass.client.read_run(&tracked.id).await.found()? else {
        pass.status_mut().plan = None;
        return Ok(Progress::Converged);
    };
    pass.status_mut().plan = Some(RunRecord::observed(&run));
    Ok(progress_of(&run))
}

async fn track_run(
    pass: &mut Pass<'_, WorkspaceSpec>,
    workspace: &Workspace,
) -> ReconcileResult<Progress> {
    let tracked = pass.status().run.clone();

    // The workspace only exposes its latest run; any other run there was
    // started after ours and supersedes it.
    if let Some(current) = workspace.current_run.as_ref().filter(|run| !run.is_destroy) {
        if tracked.as_ref().is_none_or(|t| t.id != current.id) {
            if let Some(t) = &tracked {
                info!(from = %t.id, to = %current.id, "Adopting run started upstream");
            }
            pass.status_mut().run = Some(RunRecord::observed(current));
            return settle(pass, workspace, current, None).await;
        }
    }

    let Some(tracked) = tracked else {
        return Ok(Progress::Converged);
    };
    let Some(run) = pass.client.read_run(&tracked.id).await.found()? else {
        warn!(run_id = %tracked.id, "Tracked run disappeared");
        pass.status_mut().run = None;
        return Ok(Progress::Converged);
    };
    pass.status_mut().run = Some(RunRecord {
        output_run_id: tracked.output_run_id.clone(),
        ..RunRecord::observed(&run)
    });
    settle(pass, workspace, &run, Some(&tracked)).await
}

/// Act on the observed state of the tracked run.
async fn settle(
    pass: &mut Pass<'_, WorkspaceSpec>,
    workspace: &Workspace,
    run: &Run,
    previous: Option<&RunRecord>,
) -> ReconcileResult<Progress> {
    if run.status.is_successful() {
        pass.status_mut().retry.on_success();
        let collected = previous.and_then(|p| p.output_run_id.as_ref()) == Some(&run.id);
        if !collected && !run.plan_only && !run.refresh_only {
            collect_outputs(pass, workspace, run).await?;
        }
        return Ok(Progress::Converged);
    }
    if !run.status.is_unsuccessful() {
        debug!(run_id = %run.id, status = %run.status, "Run in progress");
        return Ok(progress_of(run));
    }
    if previous.is_none_or(|p| p.status.is_unsuccessful()) {
        // Adopted as failed, or decided in an earlier pass.
        return Ok(Progress::Converged);
    }

    let policy = pass.spec().retry_policy;
    let mut retry_status = pass.status().retry;
    let decision = retry_status.on_unsuccessful(policy.as_ref());
    match decision {
        RetryDecision::Retry { attempt } => {
            let mut options = RunOptions::new(workspace.id.clone(), "Retry triggered by the operator");
            options.refresh_only = run.refresh_only;
            let retry = match pass.client.create_run(&options).await {
                Ok(retry) => retry,
                Err(e) => {
                    // Keep the last decided run so the next pass decides again.
                    pass.status_mut().run = previous.cloned();
                    return Err(e.into());
                }
            };
            pass.status_mut().retry = retry_status;
            info!(run_id = %retry.id, attempt, "Retrying run");
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
            warn!(run_id = %run.id, status = %run.status, "Run retries exhausted");
            pass.warning(
                reasons::RETRY_LIMIT_REACHED,
                format!("Run {} ended {} and the retry limit is reached", run.id, run.status),
            );
            Ok(Progress::Converged)
        }
        RetryDecision::Disabled => {
            pass.warning(
                reasons::RUN_UNSUCCESSFUL,
                format!("Run {} ended {}", run.id, run.status),
            );
            Ok(Progress::Converged)
        }
    }
}

async fn collect_outputs(
    pass: &mut Pass<'_, WorkspaceSpec>,
    workspace: &Workspace,
    run: &Run,
) -> ReconcileResult<()> {
    let outputs = pass.client.read_current_outputs(&workspace.id).await?;
    publish_outputs(pass, &outputs).await?;
    if let Some(record) = pass.status_mut().run.as_mut() {
        record.output_run_id = Some(run.id.clone());
    }
    info!(run_id = %run.id, outputs = outputs.len(), "Collected workspace outputs");
    pass.normal(
        reasons::OUTPUTS_COLLECTED,
        format!("Collected {} outputs from run {}", outputs.len(), run.id),
    );
    Ok(())
}

/// Runs parked on a human decision do not need frequent polling.
fn progress_of(run: &Run) -> Progress {
    if run.status.is_final() || run.status.awaits_user() {
        Progress::Converged
    } else {
        Progress::Waiting
    }
}
