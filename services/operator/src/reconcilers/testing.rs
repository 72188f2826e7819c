//! In-memory wiring for reconciler unit tests.

use std::sync::Arc;
use std::time::Duration;

use tfo_events::MemoryRecorder;

use crate::config::ControllerConfig;
use crate::controller::{Action, Context, Engine, Reconciler, Settings};
use crate::fleet::MemoryFleet;
use crate::metrics::Metrics;
use crate::remote::{ClientOptions, InMemoryClientFactory, InMemoryRemote};
use crate::resources::{Record, RecordKey, SecretKeyRef, Spec};
use crate::secrets::{MemorySecretStore, ObjectClass, SecretStore};
use crate::store::{IntentStore, MemoryStore};

pub const NAMESPACE: &str = "default";
pub const ORGANIZATION: &str = "acme";

pub fn credentials() -> SecretKeyRef {
    SecretKeyRef {
        name: "tfc".to_string(),
        key: "token".to_string(),
    }
}

pub struct Harness<S: Spec> {
    pub store: Arc<MemoryStore<S>>,
    pub remote: Arc<InMemoryRemote>,
    pub secrets: Arc<MemorySecretStore>,
    pub fleet: Arc<MemoryFleet>,
    pub recorder: Arc<MemoryRecorder>,
    pub metrics: Arc<Metrics>,
    pub engine: Engine<S>,
}

impl<S: Spec> Harness<S> {
    pub async fn new<R: Reconciler<S> + 'static>(reconciler: R) -> Self {
        Self::with_settings(reconciler, Settings::default()).await
    }

    pub async fn with_settings<R: Reconciler<S> + 'static>(
        reconciler: R,
        settings: Settings,
    ) -> Self {
        let store = Arc::new(MemoryStore::<S>::new());
        let remote = Arc::new(InMemoryRemote::new());
        let secrets = Arc::new(MemorySecretStore::new());
        let fleet = Arc::new(MemoryFleet::new());
        let recorder = Arc::new(MemoryRecorder::default());
        let metrics = Arc::new(Metrics::new());

        secrets
            .put(
                ObjectClass::Secret,
                NAMESPACE,
                "tfc",
                [("token".to_string(), "t0ken".to_string())].into(),
            )
            .await
            .unwrap();

        let ctx = Context {
            clients: Arc::new(InMemoryClientFactory::new(
                remote.clone(),
                secrets.clone(),
                ClientOptions::default(),
            )),
            secrets: secrets.clone(),
            fleet: fleet.clone(),
            recorder: recorder.clone(),
            metrics: metrics.clone(),
            settings,
        };
        let engine = Engine::new(
            store.clone(),
            Arc::new(reconciler),
            ctx,
            ControllerConfig::default(),
        );

        Self {
            store,
            remote,
            secrets,
            fleet,
            recorder,
            metrics,
            engine,
        }
    }

    pub async fn declare(&self, name: &str, spec: S) -> RecordKey {
        let key = RecordKey::new(NAMESPACE, name);
        self.store.apply(&key, spec).await.unwrap();
        key
    }

    /// Run passes until one does more than add the deletion guard.
    pub async fn reconcile(&self, key: &RecordKey) -> Action {
        for _ in 0..4 {
            let action = self.engine.reconcile(key).await;
            if action != Action::Requeue(Duration::ZERO) {
                return action;
            }
        }
        panic!("record {key} kept requeueing immediately");
    }

    pub async fn record(&self, key: &RecordKey) -> Record<S> {
        self.store.get(key).await.unwrap().unwrap()
    }

    pub async fn exists(&self, key: &RecordKey) -> bool {
        self.store.get(key).await.unwrap().is_some()
    }

    pub async fn request_deletion(&self, key: &RecordKey) {
        self.store.request_deletion(key).await.unwrap();
    }

    pub fn reasons(&self) -> Vec<String> {
        self.recorder
            .events()
            .into_iter()
            .map(|event| event.reason)
            .collect()
    }
}
