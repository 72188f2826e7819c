//! Reconciliation primitives.
//!
//! This library provides the pieces of the convergence loops that do not
//! touch any store or remote platform. Key concepts:
//!
//! - **Deletion guard**: a marker that keeps a record alive until the remote
//!   object it represents has been torn down or deliberately retained.
//! - **Run retry**: a per-record failure counter bounded by a back-off limit.
//! - **Scaling**: clamping demand into a replica window and enforcing
//!   cool-downs between scaling events.
//!
//! # Invariants
//!
//! - All decisions are deterministic given the same inputs
//! - `min <= compute_desired_replicas(d, min, max) <= max` whenever `min <= max`
//! - A failure counter only resets on a successful terminal run

mod guard;
mod hash;
mod matching;
mod retry;
mod scaling;
mod version;

use std::time::Duration;

pub use guard::{GuardState, DELETION_GUARD};
pub use hash::SpecHash;
pub use matching::match_wildcard_name;
pub use retry::{RetryDecision, RetryPolicy, RetryStatus, UNLIMITED_RETRIES};
pub use scaling::{compute_desired_replicas, cooldown_seconds_remaining, Cooldown, ScaleDirection};
pub use version::{DemandAlgorithm, PlatformVersion, LEGACY_DEMAND_CUTOFF};

/// Default success-path requeue interval.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default failure-path and waiting-path requeue interval.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(15);

/// Default autoscaling cool-down when a pool configures none.
pub const DEFAULT_COOLDOWN_SECONDS: i64 = 300;
