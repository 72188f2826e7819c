//! Prometheus text exposition of operator metrics.
//!
//! The registry keeps the latest value of every series in plain maps and
//! renders them on scrape. Series for a pool or record are removed when the
//! record is torn down so stale labels do not linger.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tfo_id::AgentPoolId;

use crate::remote::RunStatus;
use crate::resources::{RecordKey, ResourceKind};

/// Pool identity used as the label pair on run gauges.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PoolLabels {
    pub id: AgentPoolId,
    pub name: String,
}

#[derive(Default)]
struct Series {
    pending_runs: BTreeMap<PoolLabels, BTreeMap<RunStatus, u64>>,
    desired_replicas: BTreeMap<RecordKey, i32>,
    reconcile_errors: BTreeMap<&'static str, u64>,
}

/// Registry shared by the controllers and the HTTP surface.
#[derive(Default)]
pub struct Metrics {
    series: Mutex<Series>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn series(&self) -> MutexGuard<'_, Series> {
        self.series.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the pending run counts for a pool.
    pub fn set_pending_runs(&self, pool: PoolLabels, counts: BTreeMap<RunStatus, u64>) {
        let mut series = self.series();
        series.pending_runs.retain(|labels, _| labels.id != pool.id);
        series.pending_runs.insert(pool, counts);
    }

    /// Drop every run series of a pool.
    pub fn clear_pool(&self, pool_id: &AgentPoolId) {
        self.series()
            .pending_runs
            .retain(|labels, _| &labels.id != pool_id);
    }

    pub fn set_desired_replicas(&self, key: &RecordKey, replicas: i32) {
        self.series().desired_replicas.insert(key.clone(), replicas);
    }

    pub fn remove_desired_replicas(&self, key: &RecordKey) {
        self.series().desired_replicas.remove(key);
    }

    pub fn inc_reconcile_errors(&self, kind: ResourceKind) {
        *self
            .series()
            .reconcile_errors
            .entry(kind.as_str())
            .or_insert(0) += 1;
    }

    pub fn pending_runs_total(&self, pool_id: &AgentPoolId) -> Option<u64> {
        self.series()
            .pending_runs
            .iter()
            .find(|(labels, _)| &labels.id == pool_id)
            .map(|(_, counts)| counts.values().sum())
    }

    pub fn desired_replicas(&self, key: &RecordKey) -> Option<i32> {
        self.series().desired_replicas.get(key).copied()
    }

    pub fn reconcile_errors(&self, kind: ResourceKind) -> u64 {
        self.series()
            .reconcile_errors
            .get(kind.as_str())
            .copied()
            .unwrap_or(0)
    }

    /// Render every series in Prometheus text format.
    pub fn render(&self) -> String {
        let series = self.series();
        let mut out = String::new();

        out.push_str("# HELP tfo_runs_pending Non-final runs on an agent pool by status.\n");
        out.push_str("# TYPE tfo_runs_pending gauge\n");
        for (pool, counts) in &series.pending_runs {
            for (status, count) in counts {
                let _ = writeln!(
                    out,
                    "tfo_runs_pending{{agent_pool_id=\"{}\",agent_pool_name=\"{}\",status=\"{}\"}} {}",
                    pool.id,
                    escape(&pool.name),
                    status,
                    count
                );
            }
        }

        out.push_str("# HELP tfo_runs_pending_total Non-final runs on an agent pool.\n");
        out.push_str("# TYPE tfo_runs_pending_total gauge\n");
        for (pool, counts) in &series.pending_runs {
            let _ = writeln!(
                out,
                "tfo_runs_pending_total{{agent_pool_id=\"{}\",agent_pool_name=\"{}\"}} {}",
                pool.id,
                escape(&pool.name),
                counts.values().sum::<u64>()
            );
        }

        out.push_str("# HELP tfo_agent_pool_desired_replicas Desired agent replicas per pool record.\n");
        out.push_str("# TYPE tfo_agent_pool_desired_replicas gauge\n");
        for (key, replicas) in &series.desired_replicas {
            let _ = writeln!(
                out,
                "tfo_agent_pool_desired_replicas{{namespace=\"{}\",name=\"{}\"}} {}",
                escape(&key.namespace),
                escape(&key.name),
                replicas
            );
        }

        out.push_str("# HELP tfo_reconcile_errors_total Failed reconciliation passes by kind.\n");
        out.push_str("# TYPE tfo_reconcile_errors_total counter\n");
        for (kind, count) in &series.reconcile_errors {
            let _ = writeln!(out, "tfo_reconcile_errors_total{{kind=\"{kind}\"}} {count}");
        }

        out
    }
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
