//! Application state shared across request handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tfo_events::MemoryRecorder;

use crate::metrics::Metrics;
use crate::resources::{
    AgentPoolSpec, AgentTokenSpec, ModuleSpec, ProjectSpec, RunsCollectorSpec, Spec,
    WorkspaceSpec,
};
use crate::secrets::SecretStore;
use crate::store::{IntentStore, MemoryStore};

/// One intent store per record kind.
#[derive(Clone)]
pub struct Stores {
    pub agent_pools: Arc<dyn IntentStore<AgentPoolSpec>>,
    pub agent_tokens: Arc<dyn IntentStore<AgentTokenSpec>>,
    pub modules: Arc<dyn IntentStore<ModuleSpec>>,
    pub projects: Arc<dyn IntentStore<ProjectSpec>>,
    pub runs_collectors: Arc<dyn IntentStore<RunsCollectorSpec>>,
    pub workspaces: Arc<dyn IntentStore<WorkspaceSpec>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            agent_pools: Arc::new(MemoryStore::new()),
            agent_tokens: Arc::new(MemoryStore::new()),
            modules: Arc::new(MemoryStore::new()),
            projects: Arc::new(MemoryStore::new()),
            runs_collectors: Arc::new(MemoryStore::new()),
            workspaces: Arc::new(MemoryStore::new()),
        }
    }
}

/// Store lookup by record kind, so handlers can be generic over the spec.
pub trait HasStore<S: Spec> {
    fn store(&self) -> &Arc<dyn IntentStore<S>>;
}

macro_rules! has_store {
    ($spec:ty, $field:ident) => {
        impl HasStore<$spec> for AppState {
            fn store(&self) -> &Arc<dyn IntentStore<$spec>> {
                &self.inner.stores.$field
            }
        }
    };
}

has_store!(AgentPoolSpec, agent_pools);
has_store!(AgentTokenSpec, agent_tokens);
has_store!(ModuleSpec, modules);
has_store!(ProjectSpec, projects);
has_store!(RunsCollectorSpec, runs_collectors);
has_store!(WorkspaceSpec, workspaces);

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    stores: Stores,
    secrets: Arc<dyn SecretStore>,
    recorder: Arc<MemoryRecorder>,
    metrics: Arc<Metrics>,
    controllers_started: AtomicBool,
}

impl AppState {
    pub fn new(
        stores: Stores,
        secrets: Arc<dyn SecretStore>,
        recorder: Arc<MemoryRecorder>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                stores,
                secrets,
                recorder,
                metrics,
                controllers_started: AtomicBool::new(false),
            }),
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    pub fn secrets(&self) -> &Arc<dyn SecretStore> {
        &self.inner.secrets
    }

    pub fn recorder(&self) -> &MemoryRecorder {
        &self.inner.recorder
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Mark the controllers as running; readiness reports unavailable until
    /// then.
    pub fn mark_controllers_started(&self) {
        self.inner.controllers_started.store(true, Ordering::SeqCst);
    }

    pub fn controllers_started(&self) -> bool {
        self.inner.controllers_started.load(Ordering::SeqCst)
    }
}
