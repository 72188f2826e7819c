//! Shared wiring for the operator integration tests.
//!
//! Each test gets its own in-memory store, remote backend, secret store and
//! fleet, wired into a real engine.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tfo_events::MemoryRecorder;
use tfo_operator::config::ControllerConfig;
use tfo_operator::controller::{Action, Context, Engine, Reconciler, Settings};
use tfo_operator::fleet::MemoryFleet;
use tfo_operator::metrics::Metrics;
use tfo_operator::remote::{ClientOptions, InMemoryClientFactory, InMemoryRemote};
use tfo_operator::resources::{Record, RecordKey, Spec};
use tfo_operator::secrets::{MemorySecretStore, ObjectClass, SecretStore};
use tfo_operator::store::{IntentStore, MemoryStore};

pub const NAMESPACE: &str = "default";
pub const ORGANIZATION: &str = "acme";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tfo_operator=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub struct TestEnv<S: Spec> {
    pub store: Arc<MemoryStore<S>>,
    pub remote: Arc<InMemoryRemote>,
    pub secrets: Arc<MemorySecretStore>,
    pub fleet: Arc<MemoryFleet>,
    pub recorder: Arc<MemoryRecorder>,
    pub metrics: Arc<Metrics>,
    pub engine: Arc<Engine<S>>,
}

impl<S: Spec> TestEnv<S> {
    pub async fn new<R: Reconciler<S> + 'static>(reconciler: R) -> Self {
        Self::with_settings(reconciler, Settings::default()).await
    }

    pub async fn with_settings<R: Reconciler<S> + 'static>(
        reconciler: R,
        settings: Settings,
    ) -> Self {
        init_tracing();

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
        let config = ControllerConfig {
            sync_interval: Duration::from_secs(300),
            retry_interval: Duration::from_secs(15),
            workers: 2,
        };
        let engine = Arc::new(Engine::new(
            store.clone(),
            Arc::new(reconciler),
            ctx,
            config,
        ));

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

    /// One pass, exactly as a worker would run it.
    pub async fn pass(&self, key: &RecordKey) -> Action {
        self.engine.reconcile(key).await
    }

    /// Passes until one does more than add the deletion guard.
    pub async fn settle(&self, key: &RecordKey) -> Action {
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

    pub fn count_reason(&self, reason: &str) -> usize {
        self.recorder.with_reason(reason).len()
    }

    pub fn sync_interval(&self) -> Action {
        Action::Requeue(self.engine.config().sync_interval)
    }

    pub fn retry_interval(&self) -> Action {
        Action::Requeue(self.engine.config().retry_interval)
    }
}
