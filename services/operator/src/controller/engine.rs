//! The per-record reconciliation pass.

use std::sync::Arc;
use std::time::Duration;

use tfo_events::{reasons, ObjectRef};
use tracing::{debug, info, instrument, warn};

use super::deletion::{self, Teardown};
use super::{Action, Context, Progress, ReconcileResult, Reconciler};
use crate::config::ControllerConfig;
use crate::remote::RemoteClient;
use crate::resources::{
    effective_deletion_policy, validate_spec, Command, DeletionPolicy, Record, RecordKey,
    RecordStatus, Spec,
};
use crate::store::IntentStore;

/// State of one reconciliation pass over one record.
///
/// Reconcilers mutate `record.status` freely; [`Pass::checkpoint`] writes it
/// back when it differs from what the store last saw.
pub struct Pass<'a, S: Spec> {
    pub record: Record<S>,
    pub client: Arc<dyn RemoteClient>,
    pub ctx: &'a Context,
    store: &'a dyn IntentStore<S>,
    persisted: S::Status,
}

impl<'a, S: Spec> Pass<'a, S> {
    pub fn new(
        record: Record<S>,
        client: Arc<dyn RemoteClient>,
        ctx: &'a Context,
        store: &'a dyn IntentStore<S>,
    ) -> Self {
        let persisted = record.status.clone();
        Self {
            record,
            client,
            ctx,
            store,
            persisted,
        }
    }

    pub fn spec(&self) -> &S {
        &self.record.spec
    }

    pub fn status(&self) -> &S::Status {
        &self.record.status
    }

    pub fn status_mut(&mut self) -> &mut S::Status {
        &mut self.record.status
    }

    pub fn key(&self) -> RecordKey {
        self.record.key()
    }

    pub fn namespace(&self) -> &str {
        &self.record.meta.namespace
    }

    /// The spec changed since the last converged pass.
    pub fn generation_changed(&self) -> bool {
        !self.record.is_synced()
    }

    /// Persist the status if it changed since the last write.
    pub async fn checkpoint(&mut self) -> ReconcileResult<()> {
        if self.record.status == self.persisted {
            return Ok(());
        }
        let written = self
            .store
            .update_status(
                &self.record.key(),
                self.record.meta.resource_version,
                self.record.status.clone(),
            )
            .await?;
        self.record.meta = written.meta;
        self.persisted = written.status;
        Ok(())
    }

    /// Pop the oldest queued one-shot command.
    pub async fn take_command(&self) -> ReconcileResult<Option<Command>> {
        Ok(self.store.take_command(&self.record.key()).await?)
    }

    pub fn normal(&self, reason: &str, message: impl Into<String>) {
        self.ctx
            .recorder
            .normal(self.record.object_ref(), reason, message.into());
    }

    pub fn warning(&self, reason: &str, message: impl Into<String>) {
        self.ctx
            .recorder
            .warning(self.record.object_ref(), reason, message.into());
    }
}

/// Runs reconciliation passes for one record kind.
pub struct Engine<S: Spec> {
    store: Arc<dyn IntentStore<S>>,
    reconciler: Arc<dyn Reconciler<S>>,
    ctx: Context,
    config: ControllerConfig,
}

impl<S: Spec> Engine<S> {
    pub fn new(
        store: Arc<dyn IntentStore<S>>,
        reconciler: Arc<dyn Reconciler<S>>,
        ctx: Context,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            reconciler,
            ctx,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn IntentStore<S>> {
        &self.store
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run one pass and decide when the record runs next.
    ///
    /// Never fails: errors are logged, counted and reported as events, and
    /// the record is retried after the retry interval.
    #[instrument(skip(self, key), fields(kind = %S::KIND, key = %key))]
    pub async fn reconcile(&self, key: &RecordKey) -> Action {
        match self.try_reconcile(key).await {
            Ok(action) => action,
            Err(e) if e.is_conflict() => {
                debug!(error = %e, "Record changed during the pass, retrying");
                Action::Requeue(self.config.retry_interval)
            }
            Err(e) => {
                warn!(error = %e, "Reconciliation failed");
                self.ctx.metrics.inc_reconcile_errors(S::KIND);
                self.ctx.recorder.warning(
                    ObjectRef::new(S::KIND.as_str(), &key.namespace, &key.name),
                    reasons::RECONCILE_FAILED,
                    e.to_string(),
                );
                Action::Requeue(self.config.retry_interval)
            }
        }
    }

    async fn try_reconcile(&self, key: &RecordKey) -> ReconcileResult<Action> {
        let Some(record) = self.store.get(key).await? else {
            debug!("Record no longer exists");
            return Ok(Action::AwaitChange);
        };

        if record.meta.paused {
            debug!("Record is paused");
            return Ok(Action::AwaitChange);
        }

        if let Err(e) = validate_spec(&record.spec) {
            warn!(error = %e, "Spec is invalid");
            self.ctx.recorder.warning(
                record.object_ref(),
                reasons::VALIDATION_FAILED,
                e.to_string(),
            );
            return Ok(Action::AwaitChange);
        }

        let guard = record.meta.guard_state();
        if guard.needs_guard() {
            self.store.add_guard(key).await?;
            debug!("Added deletion guard");
            return Ok(Action::Requeue(Duration::ZERO));
        }
        if guard.deletion_requested && !guard.guard_present {
            return Ok(Action::AwaitChange);
        }

        let client = self
            .ctx
            .clients
            .client(&key.namespace, record.spec.credentials())
            .await?;
        let mut pass = Pass::new(record, client, &self.ctx, self.store.as_ref());

        if guard.is_deletion_candidate() {
            return self.tear_down(&mut pass).await;
        }

        match self.reconciler.converge(&mut pass).await {
            Ok(progress) => {
                let generation = pass.record.meta.generation;
                pass.record.status.set_observed_generation(generation);
                pass.checkpoint().await?;
                Ok(Action::Requeue(match progress {
                    Progress::Converged => self.config.sync_interval,
                    Progress::Waiting => self.config.retry_interval,
                }))
            }
            Err(e) => {
                if let Err(checkpoint) = pass.checkpoint().await {
                    debug!(error = %checkpoint, "Could not persist partial progress");
                }
                Err(e)
            }
        }
    }

    async fn tear_down(&self, pass: &mut Pass<'_, S>) -> ReconcileResult<Action> {
        let policy =
            effective_deletion_policy(pass.spec(), self.ctx.settings.default_deletion_policy);

        match deletion::execute(self.reconciler.as_ref(), policy, pass).await {
            Ok(Teardown::Complete) => {
                let key = pass.key();
                if policy == DeletionPolicy::Retain {
                    pass.normal(reasons::RETAINED, "Remote object retained");
                } else {
                    pass.normal(reasons::DELETED, "Remote object deleted");
                }
                self.store.remove_guard(&key).await?;
                info!(policy = %policy, "Removed deletion guard");
                Ok(Action::AwaitChange)
            }
            Ok(Teardown::Pending) => {
                pass.checkpoint().await?;
                Ok(Action::Requeue(self.config.retry_interval))
            }
            Err(e) => {
                if let Err(checkpoint) = pass.checkpoint().await {
                    debug!(error = %checkpoint, "Could not persist partial progress");
                }
                Err(e)
            }
        }
    }
}
