//! Convergence loop shared by every record kind.
//!
//! The controller is responsible for:
//! - Fetching a record and deciding whether it needs work at all
//! - Placing the deletion guard before anything remote is provisioned
//! - Dispatching to the kind's teardown strategy or convergence steps
//! - Persisting status and deciding when the record runs next
//!
//! Kind-specific behaviour lives in [`crate::reconcilers`]; each kind plugs
//! in through the [`Reconciler`] trait.

mod context;
pub mod deletion;
mod engine;
mod queue;
mod worker;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::fleet::FleetError;
use crate::remote::{ClientError, RemoteError};
use crate::resources::{DeletionPolicy, ResourceKind, Spec, ValidationError};
use crate::store::StoreError;

pub use context::{Context, Settings};
pub use deletion::{DeletionStrategy, Teardown};
pub use engine::{Engine, Pass};
pub use queue::WorkQueue;
pub use worker::ControllerWorker;

/// Errors that fail a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("fleet error: {0}")]
    Fleet(#[from] FleetError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A referenced remote object does not exist (yet).
    #[error("{kind} {reference} not found")]
    Unresolved { kind: &'static str, reference: String },

    #[error("deletion policy {policy} is not supported for {kind}")]
    UnsupportedPolicy {
        kind: ResourceKind,
        policy: DeletionPolicy,
    },
}

impl ReconcileError {
    pub fn unresolved(kind: &'static str, reference: impl Into<String>) -> Self {
        Self::Unresolved {
            kind,
            reference: reference.into(),
        }
    }

    /// Status write lost a compare-and-swap race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(e) if e.is_conflict())
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// How far a convergence pass got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Remote state matches the spec.
    Converged,

    /// Something long-running is in flight; look again soon.
    Waiting,
}

/// What the scheduler should do with a record after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run again after the delay.
    Requeue(Duration),

    /// Only run again when the record changes.
    AwaitChange,
}

/// Kind-specific convergence steps.
#[async_trait]
pub trait Reconciler<S: Spec>: DeletionStrategy<S> {
    /// Create, repair and update the remote object and its sub-resources.
    ///
    /// Runs only for guarded records that are not being deleted. Status
    /// changes made through `pass` are persisted by the caller, also when
    /// this returns an error.
    async fn converge(&self, pass: &mut Pass<'_, S>) -> ReconcileResult<Progress>;
}
