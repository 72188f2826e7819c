//! Coalescing work queue.
//!
//! Guarantees at most one in-flight pass per record. A key added while its
//! pass is running is marked dirty and runs again right after. Delayed
//! requeues keep only the earliest deadline per key, and an immediate add
//! replaces any pending delay.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use super::Action;
use crate::resources::RecordKey;

#[derive(Debug, Default)]
pub struct WorkQueue {
    ready: VecDeque<RecordKey>,
    queued: HashSet<RecordKey>,
    active: HashSet<RecordKey>,
    dirty: HashSet<RecordKey>,
    scheduled: HashMap<RecordKey, Instant>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key` to run as soon as a worker is free.
    pub fn add(&mut self, key: RecordKey) {
        self.scheduled.remove(&key);
        if self.active.contains(&key) {
            self.dirty.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.ready.push_back(key);
        }
    }

    /// Queue `key` to run once `delay` has passed.
    pub fn add_after(&mut self, key: RecordKey, delay: Duration, now: Instant) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        if self.queued.contains(&key) {
            return;
        }
        let deadline = now + delay;
        self.scheduled
            .entry(key)
            .and_modify(|current| *current = (*current).min(deadline))
            .or_insert(deadline);
    }

    /// Take the next key to run, promoting due delays first.
    pub fn pop(&mut self, now: Instant) -> Option<RecordKey> {
        let due: Vec<RecordKey> = self
            .scheduled
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in due {
            self.add(key);
        }

        let key = self.ready.pop_front()?;
        self.queued.remove(&key);
        self.active.insert(key.clone());
        Some(key)
    }

    /// Mark the pass over `key` finished and schedule what comes next.
    pub fn done(&mut self, key: &RecordKey, action: Action, now: Instant) {
        self.active.remove(key);
        if self.dirty.remove(key) {
            self.add(key.clone());
            return;
        }
        if let Action::Requeue(delay) = action {
            self.add_after(key.clone(), delay, now);
        }
    }

    /// Earliest pending delay, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduled.values().min().copied()
    }

    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.active.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ready.len() + self.scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
