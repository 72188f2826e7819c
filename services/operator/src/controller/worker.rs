//! Controller background worker.
//!
//! Feeds a [`WorkQueue`] from the store's change notifications and runs
//! reconciliation passes on a bounded set of tasks until shutdown.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::{Action, Engine, WorkQueue};
use crate::resources::{RecordKey, Spec};

/// Runs the passes of one record kind.
pub struct ControllerWorker<S: Spec> {
    engine: Arc<Engine<S>>,
}

impl<S: Spec> ControllerWorker<S> {
    pub fn new(engine: Arc<Engine<S>>) -> Self {
        Self { engine }
    }

    /// Run the worker until shutdown is signaled.
    ///
    /// In-flight passes are allowed to finish before this returns.
    #[instrument(skip(self, shutdown), fields(kind = %S::KIND))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let workers = self.engine.config().workers.max(1);
        info!(
            workers,
            sync_interval_secs = self.engine.config().sync_interval.as_secs(),
            "Starting controller worker"
        );

        let mut changes = self.engine.store().watch();
        let mut queue = WorkQueue::new();
        let mut tasks: JoinSet<(RecordKey, Action)> = JoinSet::new();
        self.enqueue_all(&mut queue).await;

        loop {
            while tasks.len() < workers {
                let Some(key) = queue.pop(Instant::now()) else {
                    break;
                };
                let engine = self.engine.clone();
                let retry_interval = engine.config().retry_interval;
                tasks.spawn(async move {
                    // A panicking pass must not leave its key marked active.
                    let pass_key = key.clone();
                    let pass = tokio::spawn(async move { engine.reconcile(&pass_key).await });
                    let action = match pass.await {
                        Ok(action) => action,
                        Err(e) => {
                            error!(key = %key, error = %e, "Reconciliation pass panicked");
                            Action::Requeue(retry_interval)
                        }
                    };
                    (key, action)
                });
            }

            let deadline = queue.next_deadline();
            tokio::select! {
                changed = changes.recv() => match changed {
                    Ok(key) => queue.add(key),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed change notifications, relisting");
                        self.enqueue_all(&mut queue).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Change notifications closed");
                        break;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok((key, action)) => {
                            debug!(key = %key, ?action, "Pass finished");
                            queue.done(&key, action, Instant::now());
                        }
                        Err(e) => error!(error = %e, "Controller task failed"),
                    }
                }
                _ = sleep_until(deadline) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Controller worker shutting down");
                        break;
                    }
                }
            }
        }

        while tasks.join_next().await.is_some() {}
    }

    async fn enqueue_all(&self, queue: &mut WorkQueue) {
        match self.engine.store().list().await {
            Ok(records) => {
                debug!(count = records.len(), "Queued all records");
                for record in records {
                    queue.add(record.key());
                }
            }
            Err(e) => error!(error = %e, "Failed to list records"),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
