use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tfo_reconcile::{DEFAULT_COOLDOWN_SECONDS, DEFAULT_RETRY_INTERVAL, DEFAULT_SYNC_INTERVAL};

use crate::remote::ClientOptions;
use crate::resources::{DeletionPolicy, ResourceKind};

/// Kinds whose state moves quickly enough to warrant a shorter sync interval.
const FAST_SYNC_INTERVAL: Duration = Duration::from_secs(30);

const DEFAULT_WORKERS: usize = 2;

/// Scheduling settings for one kind's controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Requeue delay after a successful pass.
    pub sync_interval: Duration,

    /// Requeue delay after a failed or waiting pass.
    pub retry_interval: Duration,

    /// Records of this kind reconciled concurrently.
    pub workers: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            workers: DEFAULT_WORKERS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub default_deletion_policy: DeletionPolicy,
    pub autoscaling_cooldown_seconds: i64,
    pub client: ClientOptions,
    controllers: HashMap<ResourceKind, ControllerConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen_addr = lookup("TFO_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse::<SocketAddr>()
            .context("invalid TFO_LISTEN_ADDR")?;

        let log_level = lookup("TFO_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let dev_mode = lookup("TFO_DEV").is_some_and(|v| is_truthy(&v));

        let retry_interval = match lookup("TFO_RETRY_INTERVAL_SECS") {
            Some(raw) => seconds(&raw, "TFO_RETRY_INTERVAL_SECS")?,
            None => DEFAULT_RETRY_INTERVAL,
        };

        let global_sync = lookup("TFO_SYNC_INTERVAL_SECS")
            .map(|raw| seconds(&raw, "TFO_SYNC_INTERVAL_SECS"))
            .transpose()?;

        let mut controllers = HashMap::new();
        for kind in ResourceKind::ALL {
            let suffix = kind.env_suffix();

            let sync_var = format!("TFO_{suffix}_SYNC_INTERVAL_SECS");
            let sync_interval = match lookup(sync_var.as_str()) {
                Some(raw) => seconds(&raw, &sync_var)?,
                None => global_sync.unwrap_or_else(|| default_sync_interval(kind)),
            };

            let workers_var = format!("TFO_{suffix}_WORKERS");
            let workers = match lookup(workers_var.as_str()) {
                Some(raw) => raw
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("invalid {workers_var}"))?
                    .max(1),
                None => DEFAULT_WORKERS,
            };

            controllers.insert(
                kind,
                ControllerConfig {
                    sync_interval,
                    retry_interval,
                    workers,
                },
            );
        }

        let default_deletion_policy = match lookup("TFO_DEFAULT_DELETION_POLICY") {
            Some(raw) => raw
                .parse::<DeletionPolicy>()
                .map_err(anyhow::Error::msg)
                .context("invalid TFO_DEFAULT_DELETION_POLICY")?,
            None => DeletionPolicy::Retain,
        };

        let autoscaling_cooldown_seconds = match lookup("TFO_AUTOSCALING_COOLDOWN_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .context("invalid TFO_AUTOSCALING_COOLDOWN_SECS")?,
            None => DEFAULT_COOLDOWN_SECONDS,
        };

        let client = ClientOptions {
            hostname: lookup("TFO_REMOTE_HOSTNAME")
                .unwrap_or_else(|| ClientOptions::default().hostname),
            skip_tls_verify: lookup("TFO_SKIP_TLS_VERIFY").is_some_and(|v| is_truthy(&v)),
        };

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            default_deletion_policy,
            autoscaling_cooldown_seconds,
            client,
            controllers,
        })
    }

    /// Scheduling settings for `kind`.
    pub fn controller(&self, kind: ResourceKind) -> ControllerConfig {
        self.controllers
            .get(&kind)
            .copied()
            .unwrap_or(ControllerConfig {
                sync_interval: default_sync_interval(kind),
                retry_interval: DEFAULT_RETRY_INTERVAL,
                workers: DEFAULT_WORKERS,
            })
    }
}

fn default_sync_interval(kind: ResourceKind) -> Duration {
    match kind {
        ResourceKind::AgentPool | ResourceKind::RunsCollector => FAST_SYNC_INTERVAL,
        _ => DEFAULT_SYNC_INTERVAL,
    }
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn seconds(raw: &str, name: &str) -> Result<Duration> {
    let secs = raw
        .trim()
        .parse::<u64>()
        .with_context(|| format!("invalid {name}"))?;
    Ok(Duration::from_secs(secs))
}
