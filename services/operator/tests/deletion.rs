//! Workspace teardown under each deletion policy, and run retries.

mod common;

use common::{TestEnv, ORGANIZATION};
use serde_json::json;
use tfo_events::reasons;
use tfo_operator::controller::Action;
use tfo_operator::reconcilers::WorkspaceReconciler;
use tfo_operator::remote::{RemoteClient, RemoteError, RunStatus};
use tfo_operator::resources::{Command, RecordKey, RunType, WorkspaceSpec};
use tfo_id::{RunId, WorkspaceId};
use tfo_operator::store::IntentStore;

fn workspace(policy: &str, backoff_limit: Option<i64>) -> WorkspaceSpec {
    let mut spec = json!({
        "name": "net",
        "organization": ORGANIZATION,
        "token": {"name": "tfc", "key": "token"},
        "deletionPolicy": policy
    });
    if let Some(limit) = backoff_limit {
        spec["retryPolicy"] = json!({"backoffLimit": limit});
    }
    serde_json::from_value(spec).unwrap()
}

/// Converge the workspace and apply one run so it manages resources.
async fn applied_workspace(
    env: &TestEnv<WorkspaceSpec>,
    spec: WorkspaceSpec,
) -> (RecordKey, WorkspaceId) {
    let key = env.declare("net", spec).await;
    env.settle(&key).await;
    let id = env.record(&key).await.status.workspace_id.unwrap();

    env.store
        .push_command(
            &key,
            Command::Run {
                run_type: RunType::Apply,
                terraform_version: None,
            },
        )
        .await
        .unwrap();
    env.pass(&key).await;
    let run = tracked_run(env, &key).await;
    env.remote.set_run_status(&run, RunStatus::Applied);
    env.pass(&key).await;

    assert_eq!(env.remote.workspace(&id).unwrap().resource_count, 1);
    (key, id)
}

async fn tracked_run(env: &TestEnv<WorkspaceSpec>, key: &RecordKey) -> RunId {
    env.record(key).await.status.run.unwrap().id
}

async fn destroy_run(env: &TestEnv<WorkspaceSpec>, key: &RecordKey) -> RunId {
    env.record(key).await.status.destroy_run.unwrap().id
}

#[tokio::test]
async fn soft_delete_waits_for_resources_to_go() {
    let env = TestEnv::new(WorkspaceReconciler).await;
    let (key, id) = applied_workspace(&env, workspace("soft", None)).await;

    env.request_deletion(&key).await;
    assert_eq!(env.pass(&key).await, env.retry_interval());
    assert!(env.exists(&key).await);
    assert!(env.remote.workspace(&id).is_some());
    assert_eq!(env.count_reason(reasons::DELETION_BLOCKED), 1);

    env.remote.set_resource_count(&id, 0);
    assert_eq!(env.pass(&key).await, Action::AwaitChange);
    assert!(!env.exists(&key).await);
    assert!(env.remote.workspace(&id).is_none());
    assert_eq!(env.count_reason(reasons::DELETED), 1);
}

#[tokio::test]
async fn destroy_runs_a_destroy_plan_before_deleting() {
    let env = TestEnv::new(WorkspaceReconciler).await;
    let (key, id) = applied_workspace(&env, workspace("destroy", None)).await;

    env.request_deletion(&key).await;
    assert_eq!(env.pass(&key).await, env.retry_interval());
    assert_eq!(env.count_reason(reasons::DESTROY_RUN_STARTED), 1);
    let run = destroy_run(&env, &key).await;
    assert!(env.remote.workspace(&id).is_some());

    // In flight: nothing new is started.
    env.remote.set_run_status(&run, RunStatus::Applying);
    assert_eq!(env.pass(&key).await, env.retry_interval());
    assert_eq!(env.count_reason(reasons::DESTROY_RUN_STARTED), 1);

    env.remote.set_run_status(&run, RunStatus::Applied);
    assert_eq!(env.pass(&key).await, Action::AwaitChange);
    assert!(!env.exists(&key).await);
    assert!(env.remote.workspace(&id).is_none());
}

#[tokio::test]
async fn failed_destroy_run_keeps_the_workspace() {
    let env = TestEnv::new(WorkspaceReconciler).await;
    let (key, id) = applied_workspace(&env, workspace("destroy", None)).await;

    env.request_deletion(&key).await;
    env.pass(&key).await;
    let run = destroy_run(&env, &key).await;
    env.remote.set_run_status(&run, RunStatus::Errored);

    env.pass(&key).await;
    env.pass(&key).await;

    assert!(env.exists(&key).await);
    assert!(env.remote.workspace(&id).is_some());
    assert_eq!(env.count_reason(reasons::DESTROY_RUN_UNSUCCESSFUL), 1);
    assert_eq!(env.remote.calls_of("create_run"), 2);
}

#[tokio::test]
async fn destroy_run_is_retried_within_the_limit() {
    let env = TestEnv::new(WorkspaceReconciler).await;
    let (key, _) = applied_workspace(&env, workspace("destroy", Some(1))).await;

    env.request_deletion(&key).await;
    env.pass(&key).await;
    let first = destroy_run(&env, &key).await;
    env.remote.set_run_status(&first, RunStatus::Errored);
    env.pass(&key).await;

    let second = destroy_run(&env, &key).await;
    assert_ne!(first, second);
    assert_eq!(env.count_reason(reasons::RUN_RETRIED), 1);

    env.remote.set_run_status(&second, RunStatus::Applied);
    assert_eq!(env.pass(&key).await, Action::AwaitChange);
    assert!(!env.exists(&key).await);
}

#[tokio::test]
async fn destroy_retry_survives_a_failed_run_creation() {
    let env = TestEnv::new(WorkspaceReconciler).await;
    let (key, id) = applied_workspace(&env, workspace("destroy", Some(3))).await;

    env.request_deletion(&key).await;
    env.pass(&key).await;
    let first = destroy_run(&env, &key).await;
    env.remote.set_run_status(&first, RunStatus::Errored);
    env.remote.fail_next("create_run", RemoteError::RateLimited);

    assert_eq!(env.pass(&key).await, env.retry_interval());
    assert_eq!(env.count_reason(reasons::RECONCILE_FAILED), 1);
    assert_eq!(env.record(&key).await.status.retry.failed_count, 0);

    env.pass(&key).await;
    let second = destroy_run(&env, &key).await;
    assert_ne!(first, second);
    assert_eq!(env.record(&key).await.status.retry.failed_count, 1);
    assert_eq!(env.count_reason(reasons::RUN_RETRIED), 1);

    env.remote.set_run_status(&second, RunStatus::Applied);
    assert_eq!(env.pass(&key).await, Action::AwaitChange);
    assert!(!env.exists(&key).await);
    assert!(env.remote.workspace(&id).is_none());
}

#[tokio::test]
async fn force_deletes_regardless_of_resources() {
    let env = TestEnv::new(WorkspaceReconciler).await;
    let (key, id) = applied_workspace(&env, workspace("force", None)).await;
    let runs = env.remote.calls_of("create_run");

    env.request_deletion(&key).await;
    assert_eq!(env.pass(&key).await, Action::AwaitChange);

    assert!(!env.exists(&key).await);
    assert!(env.remote.workspace(&id).is_none());
    assert_eq!(env.remote.calls_of("create_run"), runs);
}

#[tokio::test]
async fn workspace_removed_upstream_completes_teardown() {
    let env = TestEnv::new(WorkspaceReconciler).await;
    let (key, id) = applied_workspace(&env, workspace("soft", None)).await;
    env.remote.delete_workspace(&id).await.unwrap();

    env.request_deletion(&key).await;
    assert_eq!(env.pass(&key).await, Action::AwaitChange);
    assert!(!env.exists(&key).await);
    assert_eq!(env.count_reason(reasons::DELETION_BLOCKED), 0);
}

#[tokio::test]
async fn backoff_limit_bounds_run_attempts() {
    let env = TestEnv::new(WorkspaceReconciler).await;
    let key = env.declare("net", workspace("force", Some(2))).await;
    env.settle(&key).await;

    env.store
        .push_command(
            &key,
            Command::Run {
                run_type: RunType::Apply,
                terraform_version: None,
            },
        )
        .await
        .unwrap();
    env.pass(&key).await;

    for _ in 0..3 {
        let run = tracked_run(&env, &key).await;
        env.remote.set_run_status(&run, RunStatus::Errored);
        env.pass(&key).await;
    }
    // Further passes do not start anything new.
    env.pass(&key).await;

    assert_eq!(env.remote.calls_of("create_run"), 3);
    assert_eq!(env.count_reason(reasons::RUN_RETRIED), 2);
    assert_eq!(env.count_reason(reasons::RETRY_LIMIT_REACHED), 1);
    assert_eq!(env.record(&key).await.status.retry.failed_count, 2);
}

#[tokio::test]
async fn success_resets_the_retry_counter() {
    let env = TestEnv::new(WorkspaceReconciler).await;
    let key = env.declare("net", workspace("force", Some(3))).await;
    env.settle(&key).await;

    env.store
        .push_command(
            &key,
            Command::Run {
                run_type: RunType::Apply,
                terraform_version: None,
            },
        )
        .await
        .unwrap();
    env.pass(&key).await;
    let run = tracked_run(&env, &key).await;
    env.remote.set_run_status(&run, RunStatus::Errored);
    env.pass(&key).await;
    assert_eq!(env.record(&key).await.status.retry.failed_count, 1);

    let retry = tracked_run(&env, &key).await;
    env.remote.set_run_status(&retry, RunStatus::Applied);
    env.pass(&key).await;
    assert_eq!(env.record(&key).await.status.retry.failed_count, 0);
}

#[tokio::test]
async fn run_retry_survives_a_failed_run_creation() {
    let env = TestEnv::new(WorkspaceReconciler).await;
    let key = env.declare("net", workspace("force", Some(3))).await;
    env.settle(&key).await;

    env.store
        .push_command(
            &key,
            Command::Run {
                run_type: RunType::Apply,
                terraform_version: None,
            },
        )
        .await
        .unwrap();
    env.pass(&key).await;
    let first = tracked_run(&env, &key).await;
    env.remote.set_run_status(&first, RunStatus::Errored);
    env.remote.fail_next("create_run", RemoteError::RateLimited);

    assert_eq!(env.pass(&key).await, env.retry_interval());
    assert_eq!(env.record(&key).await.status.retry.failed_count, 0);

    env.pass(&key).await;
    let second = tracked_run(&env, &key).await;
    assert_ne!(first, second);
    assert_eq!(env.record(&key).await.status.retry.failed_count, 1);
    assert_eq!(env.count_reason(reasons::RUN_RETRIED), 1);
    assert_eq!(env.remote.calls_of("create_run"), 2);
}
