//! Intent store.
//!
//! Holds records (declared spec plus last observed status) and delivers a
//! notification whenever a record changes in a way the controllers care
//! about. Status writes are compare-and-swap on `resource_version` and do
//! not notify; a controller never needs to react to its own status write.
//!
//! Guard semantics:
//! - `request_deletion` erases a record immediately when it carries no guard
//! - otherwise it only marks the record, and `remove_guard` erases it

mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::resources::{Command, Record, RecordKey, Spec};

pub use memory::MemoryStore;

/// Errors from the intent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(RecordKey),

    #[error("conflict writing {key}: expected version {expected}, found {actual}")]
    Conflict {
        key: RecordKey,
        expected: u64,
        actual: u64,
    },

    #[error("record {0} is being deleted")]
    Terminating(RecordKey),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage and change notification for one record kind.
#[async_trait]
pub trait IntentStore<S: Spec>: Send + Sync {
    async fn get(&self, key: &RecordKey) -> StoreResult<Option<Record<S>>>;

    async fn list(&self) -> StoreResult<Vec<Record<S>>>;

    /// Subscribe to keys of changed records.
    fn watch(&self) -> broadcast::Receiver<RecordKey>;

    /// Create a record or replace its spec. The generation is bumped only
    /// when the spec actually changed. A pending deletion does not block
    /// spec replacement.
    async fn apply(&self, key: &RecordKey, spec: S) -> StoreResult<Record<S>>;

    /// Replace the status if the record is still at `resource_version`.
    async fn update_status(
        &self,
        key: &RecordKey,
        resource_version: u64,
        status: S::Status,
    ) -> StoreResult<Record<S>>;

    async fn add_guard(&self, key: &RecordKey) -> StoreResult<Record<S>>;

    /// Remove the guard. Returns `None` when this erased the record.
    async fn remove_guard(&self, key: &RecordKey) -> StoreResult<Option<Record<S>>>;

    /// Mark the record for deletion. Returns `None` when it was erased at once.
    async fn request_deletion(&self, key: &RecordKey) -> StoreResult<Option<Record<S>>>;

    async fn set_paused(&self, key: &RecordKey, paused: bool) -> StoreResult<Record<S>>;

    /// Queue a one-shot command.
    async fn push_command(&self, key: &RecordKey, command: Command) -> StoreResult<()>;

    /// Pop the oldest queued command; each command is returned once.
    async fn take_command(&self, key: &RecordKey) -> StoreResult<Option<Command>>;
}
