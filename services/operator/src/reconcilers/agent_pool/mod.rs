//! Agent pool convergence.
//!
//! A pool record owns:
//! - The remote agent pool, created by name and tracked by ID
//! - Its declared agent tokens, whose values land in `<record>-agent-pool`
//! - An optional agent fleet, sized either statically or by the autoscaler
//!
//! Destroying a pool that workspaces still use fails remotely. When that
//! happens the fleet is stopped and the tokens revoked so that no agent keeps
//! picking up work while the pool lingers.

mod autoscaler;
mod demand;

use async_trait::async_trait;
use tfo_events::reasons;
use tracing::{info, instrument, warn};

use super::tokens::{delete_tracked_tokens, sync_tokens, TokenSync};
use super::AGENT_POOL_SECRET_SUFFIX;
use crate::controller::{DeletionStrategy, Pass, Progress, ReconcileResult, Reconciler, Teardown};
use crate::fleet::{FleetSpec, DEFAULT_AGENT_IMAGE};
use crate::remote::{AgentPool, RemoteError, RemoteResultExt};
use crate::resources::{AgentPoolRef, AgentPoolSpec};

pub use demand::Demand;

pub struct AgentPoolReconciler;

#[async_trait]
impl Reconciler<AgentPoolSpec> for AgentPoolReconciler {
    #[instrument(skip(self, pass), fields(key = %pass.key()))]
    async fn converge(&self, pass: &mut Pass<'_, AgentPoolSpec>) -> ReconcileResult<Progress> {
        let mut pool = ensure_pool(pass).await?;

        if pass.generation_changed() && pool.name != pass.spec().name {
            pool = pass
                .client
                .update_agent_pool(&pool.id, &pass.spec().name)
                .await?;
            info!(pool_id = %pool.id, name = %pool.name, "Renamed agent pool");
            pass.normal(reasons::UPDATED, format!("Renamed agent pool to {}", pool.name));
        }
        let pool = AgentPoolRef {
            id: pool.id,
            name: pool.name,
        };

        let secret_name = token_secret_name(pass);
        let declared = pass.spec().agent_tokens.clone();
        sync_tokens(
            pass,
            TokenSync {
                pool: &pool.id,
                declared: &declared,
                secret_name: &secret_name,
                exclusive: false,
            },
        )
        .await?;

        ensure_fleet(pass, &pool, &secret_name).await?;

        match pass.spec().autoscaling.clone() {
            Some(autoscaling) => autoscaler::autoscale(pass, &pool, &autoscaling).await?,
            None => {
                if pass.status_mut().autoscaling.take().is_some() {
                    pass.ctx.metrics.remove_desired_replicas(&pass.key());
                }
            }
        }
        Ok(Progress::Converged)
    }
}

#[async_trait]
impl DeletionStrategy<AgentPoolSpec> for AgentPoolReconciler {
    /// The remote pool stays; the fleet only exists for this record.
    async fn retain(&self, pass: &mut Pass<'_, AgentPoolSpec>) -> ReconcileResult<Teardown> {
        let key = pass.key();
        pass.ctx.fleet.delete(&key).await?;
        pass.ctx.metrics.remove_desired_replicas(&key);
        Ok(Teardown::Complete)
    }

    async fn destroy(&self, pass: &mut Pass<'_, AgentPoolSpec>) -> ReconcileResult<Teardown> {
        let key = pass.key();
        let result = match pass.status().agent_pool_id.clone() {
            Some(id) => pass.client.delete_agent_pool(&id).await,
            None => Ok(()),
        };

        match result {
            Ok(()) | Err(RemoteError::NotFound) => {
                pass.ctx.fleet.delete(&key).await?;
                pass.ctx.metrics.remove_desired_replicas(&key);
                Ok(Teardown::Complete)
            }
            Err(e) => {
                warn!(error = %e, "Failed to delete agent pool, stopping its agents");
                pass.warning(
                    reasons::DELETION_FAILED,
                    format!("Failed to delete agent pool: {e}"),
                );

                // Best effort: the pool delete is retried on the next pass.
                match pass.ctx.fleet.replicas(&key).await {
                    Ok(Some(replicas)) if replicas > 0 => {
                        if let Err(e) = pass.ctx.fleet.scale(&key, 0).await {
                            warn!(error = %e, "Failed to stop agents");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Failed to read agent replicas"),
                }
                if let Err(e) = delete_tracked_tokens(pass).await {
                    warn!(error = %e, "Failed to revoke every agent token");
                }
                Ok(Teardown::Pending)
            }
        }
    }
}

fn token_secret_name(pass: &Pass<'_, AgentPoolSpec>) -> String {
    format!("{}{AGENT_POOL_SECRET_SUFFIX}", pass.key().name)
}

/// Read the tracked pool, creating it when there is none yet or it vanished
/// remotely.
async fn ensure_pool(pass: &mut Pass<'_, AgentPoolSpec>) -> ReconcileResult<AgentPool> {
    let Some(id) = pass.status().agent_pool_id.clone() else {
        let pool = create_pool(pass).await?;
        pass.normal(reasons::CREATED, format!("Created agent pool {}", pool.id));
        return Ok(pool);
    };

    if let Some(pool) = pass.client.read_agent_pool(&id).await.found()? {
        return Ok(pool);
    }

    warn!(pool_id = %id, "Agent pool disappeared remotely, recreating");
    // Tokens of the vanished pool went with it.
    pass.status_mut().agent_tokens.clear();
    let pool = create_pool(pass).await?;
    pass.normal(
        reasons::RECREATED,
        format!("Agent pool {id} was gone, created {}", pool.id),
    );
    Ok(pool)
}

async fn create_pool(pass: &mut Pass<'_, AgentPoolSpec>) -> ReconcileResult<AgentPool> {
    let pool = pass
        .client
        .create_agent_pool(&pass.spec().organization, &pass.spec().name)
        .await?;
    info!(pool_id = %pool.id, "Created agent pool");

    pass.status_mut().agent_pool_id = Some(pool.id.clone());
    pass.checkpoint().await?;
    Ok(pool)
}

async fn ensure_fleet(
    pass: &Pass<'_, AgentPoolSpec>,
    pool: &AgentPoolRef,
    secret_name: &str,
) -> ReconcileResult<()> {
    let key = pass.key();
    let Some(deployment) = &pass.spec().agent_deployment else {
        pass.ctx.fleet.delete(&key).await?;
        return Ok(());
    };

    let spec = FleetSpec {
        pool_id: pool.id.clone(),
        image: deployment
            .image
            .clone()
            .unwrap_or_else(|| DEFAULT_AGENT_IMAGE.to_string()),
        labels: deployment.labels.clone(),
        token_secret: secret_name.to_string(),
        // The autoscaler owns the replica count when enabled.
        replicas: match pass.spec().autoscaling {
            Some(_) => None,
            None => deployment.replicas,
        },
    };
    pass.ctx.fleet.ensure(&key, &spec).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::controller::Action;
    use crate::fleet::WorkerFleet;
    use crate::reconcilers::testing::{credentials, Harness, NAMESPACE, ORGANIZATION};
    use crate::remote::{RemoteClient, RunStatus};
    use crate::resources::agent_pool::{
        AgentDeployment, AgentDeploymentAutoscaling, AgentTokenDeclaration, TargetWorkspace,
    };
    use crate::resources::{DeletionPolicy, RecordKey};
    use crate::secrets::{ObjectClass, SecretStore};
    use crate::store::IntentStore;

    fn spec() -> AgentPoolSpec {
        AgentPoolSpec {
            name: "edge".to_string(),
            organization: ORGANIZATION.to_string(),
            token: credentials(),
            deletion_policy: Some(DeletionPolicy::Destroy),
            agent_tokens: vec![AgentTokenDeclaration {
                name: "ci".to_string(),
            }],
            agent_deployment: None,
            autoscaling: None,
        }
    }

    fn autoscaled(min: i32, max: i32) -> AgentPoolSpec {
        AgentPoolSpec {
            agent_deployment: Some(AgentDeployment {
                replicas: None,
                image: None,
                labels: BTreeMap::new(),
            }),
            autoscaling: Some(AgentDeploymentAutoscaling {
                target_workspaces: None,
                min_replicas: min,
                max_replicas: max,
                cooldown_period_seconds: Some(300),
                cooldown_period: None,
            }),
            ..spec()
        }
    }

    /// Put `count` apply runs on distinct workspaces assigned to `pool`.
    fn queue_runs(harness: &Harness<AgentPoolSpec>, pool: &AgentPoolRef, count: usize) {
        for i in 0..count {
            let ws = harness
                .remote
                .seed_workspace(ORGANIZATION, &format!("ws-{}-{i}", pool.name));
            harness
                .remote
                .set_workspace_agent_pool(&ws.id, Some(pool.id.clone()));
            harness.remote.insert_run(&ws.id, RunStatus::Planning, false);
        }
    }

    async fn pool_of(harness: &Harness<AgentPoolSpec>, key: &RecordKey) -> AgentPoolRef {
        let id = harness.record(key).await.status.agent_pool_id.unwrap();
        let pool = harness.remote.agent_pool(&id).unwrap();
        AgentPoolRef {
            id: pool.id,
            name: pool.name,
        }
    }

    #[tokio::test]
    async fn test_creates_pool_and_token_secret() {
        let harness = Harness::new(AgentPoolReconciler).await;
        let key = harness.declare("edge", spec()).await;

        assert_eq!(
            harness.reconcile(&key).await,
            Action::Requeue(harness.engine.config().sync_interval)
        );

        let record = harness.record(&key).await;
        let id = record.status.agent_pool_id.unwrap();
        assert_eq!(harness.remote.agent_pool(&id).unwrap().name, "edge");
        assert_eq!(record.status.agent_tokens.len(), 1);

        let secret = harness
            .secrets
            .get(ObjectClass::Secret, NAMESPACE, "edge-agent-pool")
            .await
            .unwrap()
            .unwrap();
        assert!(secret.contains_key("ci"));
        assert!(harness.reasons().contains(&reasons::CREATED.to_string()));
    }

    #[tokio::test]
    async fn test_name_taken_fails_without_tracking() {
        let harness = Harness::new(AgentPoolReconciler).await;
        harness
            .remote
            .create_agent_pool(ORGANIZATION, "edge")
            .await
            .unwrap();
        let key = harness.declare("edge", spec()).await;

        harness.reconcile(&key).await;

        assert!(harness.record(&key).await.status.agent_pool_id.is_none());
        assert!(harness
            .reasons()
            .contains(&reasons::RECONCILE_FAILED.to_string()));
    }

    #[tokio::test]
    async fn test_vanished_pool_is_recreated() {
        let harness = Harness::new(AgentPoolReconciler).await;
        let key = harness.declare("edge", spec()).await;
        harness.reconcile(&key).await;
        let first = harness.record(&key).await.status.agent_pool_id.unwrap();

        harness.remote.delete_agent_pool(&first).await.unwrap();
        harness.reconcile(&key).await;

        let record = harness.record(&key).await;
        let second = record.status.agent_pool_id.unwrap();
        assert_ne!(first, second);
        assert_eq!(harness.remote.agent_tokens(&second).len(), 1);
        assert!(harness.reasons().contains(&reasons::RECREATED.to_string()));
    }

    #[tokio::test]
    async fn test_static_fleet_uses_declared_replicas() {
        let harness = Harness::new(AgentPoolReconciler).await;
        let spec = AgentPoolSpec {
            agent_deployment: Some(AgentDeployment {
                replicas: Some(2),
                image: None,
                labels: BTreeMap::new(),
            }),
            ..spec()
        };
        let key = harness.declare("edge", spec).await;
        harness.reconcile(&key).await;

        let deployment = harness.fleet.deployment(&key).await.unwrap();
        assert_eq!(deployment.replicas, 2);
        assert_eq!(deployment.spec.image, DEFAULT_AGENT_IMAGE);
        assert_eq!(deployment.spec.token_secret, "edge-agent-pool");
    }

    #[tokio::test]
    async fn test_first_pass_scales_to_demand() {
        let harness = Harness::new(AgentPoolReconciler).await;
        let key = harness.declare("edge", autoscaled(0, 5)).await;
        harness.reconcile(&key).await;
        let pool = pool_of(&harness, &key).await;

        // Forget the seeded status so the next pass seeds it again.
        queue_runs(&harness, &pool, 3);
        let record = harness.record(&key).await;
        let mut status = record.status.clone();
        status.autoscaling = None;
        harness
            .store
            .update_status(&key, record.meta.resource_version, status)
            .await
            .unwrap();

        harness.reconcile(&key).await;

        assert_eq!(harness.fleet.replicas(&key).await.unwrap(), Some(3));
        let record = harness.record(&key).await;
        assert_eq!(record.status.autoscaling.unwrap().desired_replicas, 3);
        assert_eq!(harness.metrics.desired_replicas(&key), Some(3));
        assert!(harness.reasons().contains(&reasons::SCALED.to_string()));
    }

    #[tokio::test]
    async fn test_demand_is_clamped_to_window() {
        let harness = Harness::new(AgentPoolReconciler).await;
        let key = harness.declare("edge", autoscaled(2, 4)).await;
        harness.reconcile(&key).await;

        assert_eq!(harness.fleet.replicas(&key).await.unwrap(), Some(2));
        assert_eq!(
            harness
                .record(&key)
                .await
                .status
                .autoscaling
                .unwrap()
                .desired_replicas,
            2
        );
    }

    #[tokio::test]
    async fn test_cooldown_defers_then_allows_scaling() {
        let harness = Harness::new(AgentPoolReconciler).await;
        let key = harness.declare("edge", autoscaled(0, 5)).await;
        harness.reconcile(&key).await;
        assert_eq!(harness.fleet.replicas(&key).await.unwrap(), Some(0));

        let pool = pool_of(&harness, &key).await;
        queue_runs(&harness, &pool, 2);
        harness.reconcile(&key).await;

        assert_eq!(harness.fleet.replicas(&key).await.unwrap(), Some(0));
        assert!(harness
            .reasons()
            .contains(&reasons::SCALING_DEFERRED.to_string()));

        let record = harness.record(&key).await;
        let mut status = record.status.clone();
        if let Some(autoscaling) = status.autoscaling.as_mut() {
            autoscaling.last_scaling_event = Some(Utc::now() - Duration::seconds(301));
        }
        harness
            .store
            .update_status(&key, record.meta.resource_version, status)
            .await
            .unwrap();
        harness.reconcile(&key).await;

        assert_eq!(harness.fleet.replicas(&key).await.unwrap(), Some(2));
        assert_eq!(
            harness
                .record(&key)
                .await
                .status
                .autoscaling
                .unwrap()
                .desired_replicas,
            2
        );
    }

    #[tokio::test]
    async fn test_legacy_platform_counts_targeted_workspaces() {
        let harness = Harness::new(AgentPoolReconciler).await;
        harness.remote.set_platform_version(Some("v202401-1"));

        let mut spec = autoscaled(0, 5);
        if let Some(autoscaling) = spec.autoscaling.as_mut() {
            autoscaling.target_workspaces = Some(vec![TargetWorkspace {
                id: None,
                name: None,
                wildcard_name: Some("ws-edge-*".to_string()),
            }]);
        }
        let key = harness.declare("edge", spec).await;
        harness.reconcile(&key).await;
        let pool = pool_of(&harness, &key).await;

        queue_runs(&harness, &pool, 2);
        let other = harness.remote.seed_workspace(ORGANIZATION, "dns");
        harness
            .remote
            .set_workspace_agent_pool(&other.id, Some(pool.id.clone()));
        harness.remote.insert_run(&other.id, RunStatus::Planning, false);

        let record = harness.record(&key).await;
        let mut status = record.status.clone();
        status.autoscaling = None;
        harness
            .store
            .update_status(&key, record.meta.resource_version, status)
            .await
            .unwrap();
        harness.reconcile(&key).await;

        assert_eq!(harness.fleet.replicas(&key).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_failed_destroy_stops_agents_and_revokes_tokens() {
        let harness = Harness::new(AgentPoolReconciler).await;
        let spec = AgentPoolSpec {
            agent_deployment: Some(AgentDeployment {
                replicas: Some(3),
                image: None,
                labels: BTreeMap::new(),
            }),
            ..spec()
        };
        let key = harness.declare("edge", spec).await;
        harness.reconcile(&key).await;
        let pool = pool_of(&harness, &key).await;

        let ws = harness.remote.seed_workspace(ORGANIZATION, "net");
        harness
            .remote
            .set_workspace_agent_pool(&ws.id, Some(pool.id.clone()));

        harness.request_deletion(&key).await;
        harness.reconcile(&key).await;

        assert!(harness.exists(&key).await);
        assert_eq!(harness.fleet.replicas(&key).await.unwrap(), Some(0));
        assert!(harness.remote.agent_tokens(&pool.id).is_empty());
        assert!(harness.record(&key).await.status.agent_tokens.is_empty());
        assert!(harness
            .reasons()
            .contains(&reasons::DELETION_FAILED.to_string()));

        harness.remote.set_workspace_agent_pool(&ws.id, None);
        harness.reconcile(&key).await;

        assert!(!harness.exists(&key).await);
        assert!(harness.remote.agent_pool(&pool.id).is_none());
        assert!(harness.fleet.deployment(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_destroy_revokes_remaining_tokens_after_one_fails() {
        let harness = Harness::new(AgentPoolReconciler).await;
        let spec = AgentPoolSpec {
            agent_tokens: vec![
                AgentTokenDeclaration {
                    name: "ci".to_string(),
                },
                AgentTokenDeclaration {
                    name: "ops".to_string(),
                },
            ],
            agent_deployment: Some(AgentDeployment {
                replicas: Some(2),
                image: None,
                labels: BTreeMap::new(),
            }),
            ..spec()
        };
        let key = harness.declare("edge", spec).await;
        harness.reconcile(&key).await;
        let pool = pool_of(&harness, &key).await;
        assert_eq!(harness.remote.agent_tokens(&pool.id).len(), 2);

        let ws = harness.remote.seed_workspace(ORGANIZATION, "net");
        harness
            .remote
            .set_workspace_agent_pool(&ws.id, Some(pool.id.clone()));
        harness
            .remote
            .fail_next("delete_agent_token", RemoteError::RateLimited);

        harness.request_deletion(&key).await;
        harness.reconcile(&key).await;

        assert!(harness.exists(&key).await);
        assert_eq!(harness.fleet.replicas(&key).await.unwrap(), Some(0));
        assert_eq!(harness.remote.agent_tokens(&pool.id).len(), 1);
        assert_eq!(harness.record(&key).await.status.agent_tokens.len(), 1);
        assert!(harness
            .reasons()
            .contains(&reasons::DELETION_FAILED.to_string()));

        harness.reconcile(&key).await;

        assert!(harness.remote.agent_tokens(&pool.id).is_empty());
        assert!(harness.record(&key).await.status.agent_tokens.is_empty());
    }

    #[tokio::test]
    async fn test_retain_keeps_pool_and_removes_fleet() {
        let harness = Harness::new(AgentPoolReconciler).await;
        let spec = AgentPoolSpec {
            deletion_policy: Some(DeletionPolicy::Retain),
            ..autoscaled(1, 2)
        };
        let key = harness.declare("edge", spec).await;
        harness.reconcile(&key).await;
        let pool = pool_of(&harness, &key).await;
        assert_eq!(harness.metrics.desired_replicas(&key), Some(1));

        harness.request_deletion(&key).await;
        harness.reconcile(&key).await;

        assert!(!harness.exists(&key).await);
        assert!(harness.remote.agent_pool(&pool.id).is_some());
        assert!(harness.fleet.deployment(&key).await.is_none());
        assert_eq!(harness.metrics.desired_replicas(&key), None);
    }
}
