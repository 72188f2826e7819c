//! Deletion policy executor.
//!
//! Teardown is dispatched on the effective [`DeletionPolicy`] to one method
//! of the kind's [`DeletionStrategy`]. Each method either finishes
//! ([`Teardown::Complete`], the guard may go) or asks to be called again
//! ([`Teardown::Pending`]).
//!
//! Destroy-with-run is shared by workspaces and modules through
//! [`drive_destroy_run`]: start a destroy run on the workspace, track it
//! across passes, retry it per the record's retry policy, and report when
//! the workspace's infrastructure is gone.

use async_trait::async_trait;
use tfo_events::reasons;
use tfo_id::WorkspaceId;
use tfo_reconcile::{RetryDecision, RetryPolicy, RetryStatus};
use tracing::{debug, info, instrument, warn};

use super::{Pass, ReconcileError, ReconcileResult};
use crate::remote::{RemoteError, RemoteResult, RemoteResultExt, Run, RunOptions};
use crate::resources::{DeletionPolicy, RecordStatus, RunRecord, Spec};

/// Result of one teardown attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The remote object is deleted, retained or already absent.
    Complete,

    /// Not done yet; keep the guard and try again later.
    Pending,
}

/// Per-kind teardown, one method per policy.
///
/// Kinds override the policies they allow; validation keeps records from
/// declaring any other.
#[async_trait]
pub trait DeletionStrategy<S: Spec>: Send + Sync {
    async fn retain(&self, _pass: &mut Pass<'_, S>) -> ReconcileResult<Teardown> {
        Ok(Teardown::Complete)
    }

    async fn soft_delete(&self, _pass: &mut Pass<'_, S>) -> ReconcileResult<Teardown> {
        Err(unsupported::<S>(DeletionPolicy::Soft))
    }

    async fn destroy(&self, _pass: &mut Pass<'_, S>) -> ReconcileResult<Teardown> {
        Err(unsupported::<S>(DeletionPolicy::Destroy))
    }

    async fn force_delete(&self, _pass: &mut Pass<'_, S>) -> ReconcileResult<Teardown> {
        Err(unsupported::<S>(DeletionPolicy::Force))
    }
}

fn unsupported<S: Spec>(policy: DeletionPolicy) -> ReconcileError {
    ReconcileError::UnsupportedPolicy {
        kind: S::KIND,
        policy,
    }
}

/// Run the strategy method for `policy`.
#[instrument(skip(strategy, pass), fields(kind = %S::KIND, key = %pass.key()))]
pub async fn execute<S, D>(
    strategy: &D,
    policy: DeletionPolicy,
    pass: &mut Pass<'_, S>,
) -> ReconcileResult<Teardown>
where
    S: Spec,
    D: DeletionStrategy<S> + ?Sized,
{
    debug!(policy = %policy, "Tearing down");
    match policy {
        DeletionPolicy::Retain => strategy.retain(pass).await,
        DeletionPolicy::Soft => strategy.soft_delete(pass).await,
        DeletionPolicy::Destroy => strategy.destroy(pass).await,
        DeletionPolicy::Force => strategy.force_delete(pass).await,
    }
}

/// A delete call where an already absent object counts as deleted.
pub fn deleted(result: RemoteResult<()>) -> ReconcileResult<Teardown> {
    match result {
        Ok(()) | Err(RemoteError::NotFound) => Ok(Teardown::Complete),
        Err(e) => Err(e.into()),
    }
}

/// A safe delete call: dependents block the teardown without failing it.
pub fn safely_deleted<S: Spec>(
    pass: &Pass<'_, S>,
    result: RemoteResult<()>,
) -> ReconcileResult<Teardown> {
    match result {
        Err(RemoteError::NotSafeToDelete(reason)) => {
            info!(reason = %reason, "Remote object still has dependents");
            pass.normal(
                reasons::DELETION_BLOCKED,
                format!("Waiting for dependents to go away: {reason}"),
            );
            Ok(Teardown::Pending)
        }
        other => deleted(other),
    }
}

/// Statuses that track a destroy run.
pub trait DestroyTracking: RecordStatus {
    fn destroy_run(&mut self) -> &mut Option<RunRecord>;
    fn retry(&mut self) -> &mut RetryStatus;
}

/// Where a destroy run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// The destroy run succeeded.
    Finished,

    /// The workspace never ran anything, so there is nothing to destroy.
    NothingToDestroy,

    /// The workspace or the run no longer exists.
    Gone,

    /// A run is in flight, or a failed one awaits a human.
    Pending,
}

/// Advance the destroy run for `workspace` by one step.
pub async fn drive_destroy_run<S>(
    pass: &mut Pass<'_, S>,
    workspace: &WorkspaceId,
    policy: Option<RetryPolicy>,
) -> ReconcileResult<DestroyOutcome>
where
    S: Spec,
    S::Status: DestroyTracking,
{
    let Some(tracked) = pass.status_mut().destroy_run().clone() else {
        let Some(current) = pass.client.read_workspace(workspace).await.found()? else {
            return Ok(DestroyOutcome::Gone);
        };
        if !current.has_run_history() {
            debug!(workspace_id = %workspace, "Workspace has no runs, nothing to destroy");
            return Ok(DestroyOutcome::NothingToDestroy);
        }
        let Some(run) = start_destroy_run(pass, workspace).await? else {
            return Ok(DestroyOutcome::Gone);
        };
        pass.normal(
            reasons::DESTROY_RUN_STARTED,
            format!("Started destroy run {}", run.id),
        );
        track(pass, &run);
        pass.checkpoint().await?;
        return Ok(DestroyOutcome::Pending);
    };

    let Some(run) = pass.client.read_run(&tracked.id).await.found()? else {
        return Ok(DestroyOutcome::Gone);
    };
    track(pass, &run);

    if run.status.is_successful() {
        pass.status_mut().retry().on_success();
        info!(run_id = %run.id, "Destroy run finished");
        return Ok(DestroyOutcome::Finished);
    }
    if !run.status.is_unsuccessful() {
        debug!(run_id = %run.id, status = %run.status, "Destroy run in progress");
        return Ok(DestroyOutcome::Pending);
    }

    if tracked.status.is_unsuccessful() {
        // Already decided on this failure in an earlier pass. A destroy run
        // started by someone else supersedes the failed one.
        if let Some(current) = pass.client.read_workspace(workspace).await.found()? {
            if let Some(newer) = current
                .current_run
                .filter(|newer| newer.is_destroy && newer.id != run.id)
            {
                info!(run_id = %newer.id, "Adopting destroy run started upstream");
                track(pass, &newer);
            }
        }
        return Ok(DestroyOutcome::Pending);
    }

    let mut retry_status = *pass.status_mut().retry();
    let decision = retry_status.on_unsuccessful(policy.as_ref());
    match decision {
        RetryDecision::Retry { attempt } => {
            let retry = match start_destroy_run(pass, workspace).await {
                Ok(Some(retry)) => retry,
                Ok(None) => return Ok(DestroyOutcome::Gone),
                Err(e) => {
                    // Keep the last decided run so the next pass decides again.
                    *pass.status_mut().destroy_run() = Some(tracked);
                    return Err(e);
                }
            };
            *pass.status_mut().retry() = retry_status;
            pass.normal(
                reasons::RUN_RETRIED,
                format!(
                    "Destroy run {} ended {}, started {} (retry {attempt})",
                    run.id, run.status, retry.id
                ),
            );
            track(pass, &retry);
        }
        RetryDecision::Exhausted => {
            warn!(run_id = %run.id, status = %run.status, "Destroy run retries exhausted");
            pass.warning(
                reasons::RETRY_LIMIT_REACHED,
                format!(
                    "Destroy run {} ended {} and the retry limit is reached",
                    run.id, run.status
                ),
            );
        }
        RetryDecision::Disabled => {
            warn!(run_id = %run.id, status = %run.status, "Destroy run unsuccessful");
            pass.warning(
                reasons::DESTROY_RUN_UNSUCCESSFUL,
                format!("Destroy run {} ended {}", run.id, run.status),
            );
        }
    }
    pass.checkpoint().await?;
    Ok(DestroyOutcome::Pending)
}

fn track<S>(pass: &mut Pass<'_, S>, run: &Run)
where
    S: Spec,
    S::Status: DestroyTracking,
{
    *pass.status_mut().destroy_run() = Some(RunRecord::observed(run));
}

async fn start_destroy_run<S: Spec>(
    pass: &Pass<'_, S>,
    workspace: &WorkspaceId,
) -> ReconcileResult<Option<Run>> {
    let mut options = RunOptions::new(workspace.clone(), "Destroy run triggered by the operator");
    options.is_destroy = true;
    options.auto_apply = Some(true);
    Ok(pass.client.create_run(&options).await.found()?)
}
