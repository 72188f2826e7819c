//! Pending-run gauges for one agent pool.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::resolve_agent_pool;
use crate::controller::{DeletionStrategy, Pass, Progress, ReconcileResult, Reconciler, Teardown};
use crate::metrics::PoolLabels;
use crate::remote::{collect_pages, RunListOptions, RunStatusGroup};
use crate::resources::RunsCollectorSpec;

pub struct RunsCollectorReconciler;

#[async_trait]
impl Reconciler<RunsCollectorSpec> for RunsCollectorReconciler {
    #[instrument(skip(self, pass), fields(key = %pass.key()))]
    async fn converge(&self, pass: &mut Pass<'_, RunsCollectorSpec>) -> ReconcileResult<Progress> {
        let client = pass.client.clone();
        let organization = pass.spec().organization.clone();
        let pool = resolve_agent_pool(client.as_ref(), &organization, &pass.spec().agent_pool).await?;

        if let Some(previous) = &pass.status().agent_pool {
            if previous.id != pool.id {
                pass.ctx.metrics.clear_pool(&previous.id);
            }
        }

        let runs = collect_pages(|page| {
            let options = RunListOptions {
                organization: organization.clone(),
                agent_pool_names: vec![pool.name.clone()],
                workspace_id: None,
                status_group: Some(RunStatusGroup::NonFinal),
                page,
            };
            let client = client.clone();
            async move { client.list_runs(&options).await }
        })
        .await?;

        let mut counts = BTreeMap::new();
        for run in &runs {
            *counts.entry(run.status).or_insert(0u64) += 1;
        }
        debug!(pool_id = %pool.id, pending = runs.len(), "Collected pending runs");

        pass.ctx.metrics.set_pending_runs(
            PoolLabels {
                id: pool.id.clone(),
                name: pool.name.clone(),
            },
            counts,
        );
        pass.status_mut().agent_pool = Some(pool);
        Ok(Progress::Converged)
    }
}

#[async_trait]
impl DeletionStrategy<RunsCollectorSpec> for RunsCollectorReconciler {
    async fn retain(&self, pass: &mut Pass<'_, RunsCollectorSpec>) -> ReconcileResult<Teardown> {
        if let Some(pool) = &pass.status().agent_pool {
            pass.ctx.metrics.clear_pool(&pool.id);
        }
        Ok(Teardown::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcilers::testing::{credentials, Harness, ORGANIZATION};
    use crate::remote::{RemoteClient, RunStatus};
    use crate::resources::IdOrName;

    fn spec() -> RunsCollectorSpec {
        RunsCollectorSpec {
            organization: ORGANIZATION.to_string(),
            token: credentials(),
            agent_pool: IdOrName::by_name("edge"),
        }
    }

    #[tokio::test]
    async fn test_publishes_pending_runs_by_status() {
        let harness = Harness::new(RunsCollectorReconciler).await;
        let pool = harness
            .remote
            .create_agent_pool(ORGANIZATION, "edge")
            .await
            .unwrap();
        let assigned = harness.remote.seed_workspace(ORGANIZATION, "net");
        harness
            .remote
            .set_workspace_agent_pool(&assigned.id, Some(pool.id.clone()));
        let elsewhere = harness.remote.seed_workspace(ORGANIZATION, "dns");

        harness
            .remote
            .insert_run(&assigned.id, RunStatus::Planning, false);
        harness
            .remote
            .insert_run(&assigned.id, RunStatus::Planning, true);
        harness
            .remote
            .insert_run(&assigned.id, RunStatus::Applied, false);
        harness
            .remote
            .insert_run(&elsewhere.id, RunStatus::Planning, false);

        let key = harness.declare("edge-runs", spec()).await;
        harness.reconcile(&key).await;

        assert_eq!(harness.metrics.pending_runs_total(&pool.id), Some(2));
        let rendered = harness.metrics.render();
        assert!(rendered.contains("status=\"planning\""));
        assert_eq!(harness.remote.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_teardown_clears_series() {
        let harness = Harness::new(RunsCollectorReconciler).await;
        let pool = harness
            .remote
            .create_agent_pool(ORGANIZATION, "edge")
            .await
            .unwrap();
        let key = harness.declare("edge-runs", spec()).await;
        harness.reconcile(&key).await;
        assert_eq!(harness.metrics.pending_runs_total(&pool.id), Some(0));

        harness.request_deletion(&key).await;
        harness.reconcile(&key).await;

        assert!(!harness.exists(&key).await);
        assert_eq!(harness.metrics.pending_runs_total(&pool.id), None);
    }
}
