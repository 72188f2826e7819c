//! tfo operator
//!
//! Converges remote Terraform platform objects (agent pools, agent tokens,
//! projects, workspaces, modules and run collectors) to the records declared
//! through the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tfo_events::MemoryRecorder;
use tfo_operator::{
    api, config,
    controller::{Context, ControllerWorker, Engine, Reconciler, Settings},
    fleet::MemoryFleet,
    metrics::Metrics,
    reconcilers::{
        AgentPoolReconciler, AgentTokenReconciler, ModuleReconciler, ProjectReconciler,
        RunsCollectorReconciler, WorkspaceReconciler,
    },
    remote::{InMemoryClientFactory, InMemoryRemote},
    resources::{ResourceKind, Spec},
    secrets::{MemorySecretStore, ObjectClass, SecretStore},
    state::{AppState, Stores},
    store::IntentStore,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEV_NAMESPACE: &str = "default";
const DEV_SECRET: &str = "tfc";

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to TFO_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting tfo operator");
    info!(
        listen_addr = %config.listen_addr,
        default_deletion_policy = %config.default_deletion_policy,
        "Configuration loaded"
    );

    let secrets = Arc::new(MemorySecretStore::new());
    if config.dev_mode {
        secrets
            .put(
                ObjectClass::Secret,
                DEV_NAMESPACE,
                DEV_SECRET,
                [("token".to_string(), "dev-token".to_string())].into(),
            )
            .await?;
        info!(
            namespace = DEV_NAMESPACE,
            name = DEV_SECRET,
            "Seeded development credentials"
        );
    }

    let remote = Arc::new(InMemoryRemote::new());
    let recorder = Arc::new(MemoryRecorder::default());
    let metrics = Arc::new(Metrics::new());
    let ctx = Context {
        clients: Arc::new(InMemoryClientFactory::new(
            remote,
            secrets.clone(),
            config.client.clone(),
        )),
        secrets: secrets.clone(),
        fleet: Arc::new(MemoryFleet::new()),
        recorder: recorder.clone(),
        metrics: metrics.clone(),
        settings: Settings {
            default_deletion_policy: config.default_deletion_policy,
            autoscaling_cooldown_seconds: config.autoscaling_cooldown_seconds,
        },
    };

    let stores = Stores::in_memory();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let controllers = vec![
        spawn_controller(
            stores.agent_pools.clone(),
            AgentPoolReconciler,
            &ctx,
            &config,
            shutdown_rx.clone(),
        ),
        spawn_controller(
            stores.agent_tokens.clone(),
            AgentTokenReconciler,
            &ctx,
            &config,
            shutdown_rx.clone(),
        ),
        spawn_controller(
            stores.projects.clone(),
            ProjectReconciler,
            &ctx,
            &config,
            shutdown_rx.clone(),
        ),
        spawn_controller(
            stores.workspaces.clone(),
            WorkspaceReconciler,
            &ctx,
            &config,
            shutdown_rx.clone(),
        ),
        spawn_controller(
            stores.modules.clone(),
            ModuleReconciler,
            &ctx,
            &config,
            shutdown_rx.clone(),
        ),
        spawn_controller(
            stores.runs_collectors.clone(),
            RunsCollectorReconciler,
            &ctx,
            &config,
            shutdown_rx.clone(),
        ),
    ];

    let state = AppState::new(stores, secrets, recorder, metrics);
    state.mark_controllers_started();
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for controllers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);
    for (kind, handle) in controllers {
        if let Err(e) = tokio::time::timeout(shutdown_timeout, handle).await {
            warn!(kind = %kind, error = %e, "Controller did not shut down in time");
        }
    }

    info!("Operator shutdown complete");
    Ok(())
}

fn spawn_controller<S, R>(
    store: Arc<dyn IntentStore<S>>,
    reconciler: R,
    ctx: &Context,
    config: &config::Config,
    shutdown_rx: watch::Receiver<bool>,
) -> (ResourceKind, JoinHandle<()>)
where
    S: Spec,
    R: Reconciler<S> + 'static,
{
    let engine = Engine::new(
        store,
        Arc::new(reconciler),
        ctx.clone(),
        config.controller(S::KIND),
    );
    let worker = ControllerWorker::new(Arc::new(engine));
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });
    (S::KIND, handle)
}
