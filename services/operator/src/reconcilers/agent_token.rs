//! Agent token convergence.
//!
//! Manages a set of tokens on a pool the record does not own. The `owner`
//! management policy makes the record authoritative for the pool's whole
//! token set.

use async_trait::async_trait;
use tracing::{info, instrument};

use super::resolve_agent_pool;
use super::tokens::{delete_tracked_tokens, sync_tokens, TokenSync};
use crate::controller::{DeletionStrategy, Pass, Progress, ReconcileResult, Reconciler, Teardown};
use crate::resources::agent_token::ManagementPolicy;
use crate::resources::AgentTokenSpec;
use crate::secrets::ObjectClass;

pub struct AgentTokenReconciler;

#[async_trait]
impl Reconciler<AgentTokenSpec> for AgentTokenReconciler {
    #[instrument(skip(self, pass), fields(key = %pass.key()))]
    async fn converge(&self, pass: &mut Pass<'_, AgentTokenSpec>) -> ReconcileResult<Progress> {
        let pool = resolve_agent_pool(
            pass.client.as_ref(),
            &pass.spec().organization,
            &pass.spec().agent_pool,
        )
        .await?;

        let previous = pass.status().agent_pool.clone();
        if previous.as_ref().is_some_and(|p| p.id != pool.id) {
            // Tokens of the old pool are not ours to manage any more.
            info!(from = ?previous, to = %pool.id, "Agent pool reference changed");
            pass.status_mut().agent_tokens.clear();
        }
        pass.status_mut().agent_pool = Some(pool.clone());

        let spec = pass.spec().clone();
        sync_tokens(
            pass,
            TokenSync {
                pool: &pool.id,
                declared: &spec.agent_tokens,
                secret_name: &spec.secret_name,
                exclusive: spec.management_policy == ManagementPolicy::Owner,
            },
        )
        .await?;
        Ok(Progress::Converged)
    }
}

#[async_trait]
impl DeletionStrategy<AgentTokenSpec> for AgentTokenReconciler {
    async fn destroy(&self, pass: &mut Pass<'_, AgentTokenSpec>) -> ReconcileResult<Teardown> {
        delete_tracked_tokens(pass).await?;

        let namespace = pass.namespace().to_string();
        pass.ctx
            .secrets
            .delete(ObjectClass::Secret, &namespace, &pass.spec().secret_name)
            .await?;
        Ok(Teardown::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcilers::testing::{credentials, Harness, NAMESPACE, ORGANIZATION};
    use crate::remote::RemoteClient;
    use crate::resources::agent_pool::AgentTokenDeclaration;
    use crate::resources::{DeletionPolicy, IdOrName};
    use crate::secrets::SecretStore;
    use crate::store::IntentStore;

    fn spec(tokens: &[&str], policy: ManagementPolicy) -> AgentTokenSpec {
        AgentTokenSpec {
            organization: ORGANIZATION.to_string(),
            token: credentials(),
            deletion_policy: Some(DeletionPolicy::Destroy),
            agent_pool: IdOrName::by_name("edge"),
            agent_tokens: tokens
                .iter()
                .map(|name| AgentTokenDeclaration {
                    name: name.to_string(),
                })
                .collect(),
            management_policy: policy,
            secret_name: "edge-tokens".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_pool_fails_pass() {
        let harness = Harness::new(AgentTokenReconciler).await;
        let key = harness
            .declare("tokens", spec(&["ci"], ManagementPolicy::Merge))
            .await;

        harness.reconcile(&key).await;
        let record = harness.record(&key).await;
        assert!(record.status.agent_pool.is_none());
        assert_eq!(record.status.observed_generation, 0);
    }

    #[tokio::test]
    async fn test_tokens_created_and_written_to_secret() {
        let harness = Harness::new(AgentTokenReconciler).await;
        let pool = harness
            .remote
            .create_agent_pool(ORGANIZATION, "edge")
            .await
            .unwrap();
        let key = harness
            .declare("tokens", spec(&["ci", "cd"], ManagementPolicy::Merge))
            .await;

        harness.reconcile(&key).await;

        let record = harness.record(&key).await;
        assert_eq!(record.status.agent_pool.unwrap().id, pool.id);
        assert_eq!(record.status.agent_tokens.len(), 2);
        assert_eq!(harness.remote.agent_tokens(&pool.id).len(), 2);

        let secret = harness
            .secrets
            .get(ObjectClass::Secret, NAMESPACE, "edge-tokens")
            .await
            .unwrap()
            .unwrap();
        assert!(secret.contains_key("ci"));
        assert!(secret.contains_key("cd"));

        let mutations = harness.remote.mutation_count();
        harness.reconcile(&key).await;
        assert_eq!(harness.remote.mutation_count(), mutations);
    }

    #[tokio::test]
    async fn test_merge_keeps_foreign_tokens_owner_removes_them() {
        let harness = Harness::new(AgentTokenReconciler).await;
        let pool = harness
            .remote
            .create_agent_pool(ORGANIZATION, "edge")
            .await
            .unwrap();
        harness
            .remote
            .create_agent_token(&pool.id, "handmade")
            .await
            .unwrap();

        let key = harness
            .declare("tokens", spec(&["ci"], ManagementPolicy::Merge))
            .await;
        harness.reconcile(&key).await;
        assert_eq!(harness.remote.agent_tokens(&pool.id).len(), 2);

        harness
            .store
            .apply(&key, spec(&["ci"], ManagementPolicy::Owner))
            .await
            .unwrap();
        harness.reconcile(&key).await;

        let remaining = harness.remote.agent_tokens(&pool.id);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].description, "ci");
    }

    #[tokio::test]
    async fn test_undeclared_token_is_deleted() {
        let harness = Harness::new(AgentTokenReconciler).await;
        let pool = harness
            .remote
            .create_agent_pool(ORGANIZATION, "edge")
            .await
            .unwrap();
        let key = harness
            .declare("tokens", spec(&["ci", "cd"], ManagementPolicy::Merge))
            .await;
        harness.reconcile(&key).await;

        harness
            .store
            .apply(&key, spec(&["ci"], ManagementPolicy::Merge))
            .await
            .unwrap();
        harness.reconcile(&key).await;

        let record = harness.record(&key).await;
        assert_eq!(record.status.agent_tokens.len(), 1);
        assert_eq!(harness.remote.agent_tokens(&pool.id).len(), 1);
        let secret = harness
            .secrets
            .get(ObjectClass::Secret, NAMESPACE, "edge-tokens")
            .await
            .unwrap()
            .unwrap();
        assert!(!secret.contains_key("cd"));
    }

    #[tokio::test]
    async fn test_destroy_deletes_tracked_tokens() {
        let harness = Harness::new(AgentTokenReconciler).await;
        let pool = harness
            .remote
            .create_agent_pool(ORGANIZATION, "edge")
            .await
            .unwrap();
        let key = harness
            .declare("tokens", spec(&["ci"], ManagementPolicy::Merge))
            .await;
        harness.reconcile(&key).await;

        harness.request_deletion(&key).await;
        harness.reconcile(&key).await;

        assert!(!harness.exists(&key).await);
        assert!(harness.remote.agent_tokens(&pool.id).is_empty());
        assert!(harness
            .secrets
            .get(ObjectClass::Secret, NAMESPACE, "edge-tokens")
            .await
            .unwrap()
            .is_none());
    }
}
