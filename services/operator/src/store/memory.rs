//! In-memory intent store.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use tfo_reconcile::{SpecHash, DELETION_GUARD};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::{IntentStore, StoreError, StoreResult};
use crate::resources::{Command, Record, RecordKey, RecordMeta, Spec};

const WATCH_CAPACITY: usize = 1024;

struct Entry<S: Spec> {
    record: Record<S>,
    spec_hash: SpecHash,
    commands: VecDeque<Command>,
}

/// In-process [`IntentStore`].
pub struct MemoryStore<S: Spec> {
    entries: RwLock<BTreeMap<RecordKey, Entry<S>>>,
    changes: broadcast::Sender<RecordKey>,
}

impl<S: Spec> Default for MemoryStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Spec> MemoryStore<S> {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    fn notify(&self, key: &RecordKey) {
        // No subscribers is fine.
        let _ = self.changes.send(key.clone());
    }
}

fn hash_spec<S: Spec>(spec: &S) -> StoreResult<SpecHash> {
    Ok(SpecHash::from_json(&serde_json::to_value(spec)?))
}

#[async_trait]
impl<S: Spec> IntentStore<S> for MemoryStore<S> {
    async fn get(&self, key: &RecordKey) -> StoreResult<Option<Record<S>>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).map(|entry| entry.record.clone()))
    }

    async fn list(&self) -> StoreResult<Vec<Record<S>>> {
        let entries = self.entries.read().await;
        Ok(entries.values().map(|entry| entry.record.clone()).collect())
    }

    fn watch(&self) -> broadcast::Receiver<RecordKey> {
        self.changes.subscribe()
    }

    async fn apply(&self, key: &RecordKey, spec: S) -> StoreResult<Record<S>> {
        let spec_hash = hash_spec(&spec)?;
        let mut entries = self.entries.write().await;

        let record = match entries.get_mut(key) {
            Some(entry) => {
                if entry.spec_hash == spec_hash {
                    return Ok(entry.record.clone());
                }
                entry.spec_hash = spec_hash;
                entry.record.spec = spec;
                entry.record.meta.generation += 1;
                entry.record.meta.resource_version += 1;
                entry.record.clone()
            }
            None => {
                let record = Record {
                    meta: RecordMeta {
                        namespace: key.namespace.clone(),
                        name: key.name.clone(),
                        generation: 1,
                        resource_version: 1,
                        guard_present: false,
                        deletion_requested: false,
                        paused: false,
                        created_at: Utc::now(),
                    },
                    spec,
                    status: S::Status::default(),
                };
                entries.insert(
                    key.clone(),
                    Entry {
                        record: record.clone(),
                        spec_hash,
                        commands: VecDeque::new(),
                    },
                );
                record
            }
        };
        drop(entries);

        debug!(kind = %S::KIND, key = %key, generation = record.meta.generation, "Applied spec");
        self.notify(key);
        Ok(record)
    }

    async fn update_status(
        &self,
        key: &RecordKey,
        resource_version: u64,
        status: S::Status,
    ) -> StoreResult<Record<S>> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        let actual = entry.record.meta.resource_version;
        if actual != resource_version {
            return Err(StoreError::Conflict {
                key: key.clone(),
                expected: resource_version,
                actual,
            });
        }

        entry.record.status = status;
        entry.record.meta.resource_version += 1;
        Ok(entry.record.clone())
    }

    async fn add_guard(&self, key: &RecordKey) -> StoreResult<Record<S>> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if entry.record.meta.deletion_requested {
            return Err(StoreError::Terminating(key.clone()));
        }
        if !entry.record.meta.guard_present {
            entry.record.meta.guard_present = true;
            entry.record.meta.resource_version += 1;
            debug!(kind = %S::KIND, key = %key, guard = DELETION_GUARD, "Added deletion guard");
        }
        let record = entry.record.clone();
        drop(entries);

        self.notify(key);
        Ok(record)
    }

    async fn remove_guard(&self, key: &RecordKey) -> StoreResult<Option<Record<S>>> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        let result = if entry.record.meta.deletion_requested {
            entries.remove(key);
            debug!(kind = %S::KIND, key = %key, "Erased record after guard removal");
            None
        } else {
            entry.record.meta.guard_present = false;
            entry.record.meta.resource_version += 1;
            Some(entry.record.clone())
        };
        drop(entries);

        self.notify(key);
        Ok(result)
    }

    async fn request_deletion(&self, key: &RecordKey) -> StoreResult<Option<Record<S>>> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        let result = if entry.record.meta.guard_present {
            if !entry.record.meta.deletion_requested {
                entry.record.meta.deletion_requested = true;
                entry.record.meta.resource_version += 1;
            }
            Some(entry.record.clone())
        } else {
            entries.remove(key);
            None
        };
        drop(entries);

        self.notify(key);
        Ok(result)
    }

    async fn set_paused(&self, key: &RecordKey, paused: bool) -> StoreResult<Record<S>> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if entry.record.meta.paused != paused {
            entry.record.meta.paused = paused;
            entry.record.meta.resource_version += 1;
        }
        let record = entry.record.clone();
        drop(entries);

        self.notify(key);
        Ok(record)
    }

    async fn push_command(&self, key: &RecordKey, command: Command) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        entry.commands.push_back(command);
        drop(entries);

        self.notify(key);
        Ok(())
    }

    async fn take_command(&self, key: &RecordKey) -> StoreResult<Option<Command>> {
        let mut entries = self.entries.write().await;
        Ok(entries
            .get_mut(key)
            .and_then(|entry| entry.commands.pop_front()))
    }
}
