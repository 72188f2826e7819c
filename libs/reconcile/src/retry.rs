//! Run retry tracking.
//!
//! Unlike a time-windowed tracker, the failure count here lives in the
//! record's persisted status so that it survives restarts and is visible to
//! whoever inspects the record. The tracker only decides; callers persist.

use serde::{Deserialize, Serialize};

/// Back-off limit meaning "retry forever".
pub const UNLIMITED_RETRIES: i64 = -1;

/// Retry policy declared on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// `-1` retries indefinitely, `0` never retries, `N > 0` retries up to N
    /// times after the first failure.
    #[serde(default)]
    pub backoff_limit: i64,
}

impl RetryPolicy {
    pub fn new(backoff_limit: i64) -> Self {
        Self { backoff_limit }
    }

    pub fn is_valid(&self) -> bool {
        self.backoff_limit >= UNLIMITED_RETRIES
    }

    pub fn is_enabled(&self) -> bool {
        self.backoff_limit != 0
    }
}

/// Persisted retry bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RetryStatus {
    #[serde(default)]
    pub failed_count: i64,
}

/// What to do about an unsuccessful terminal run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Start a new run with the same intent; the counter was incremented.
    Retry { attempt: i64 },
    /// The back-off limit was reached; leave the run as it is.
    Exhausted,
    /// No retry policy, or a limit of zero.
    Disabled,
}

impl RetryStatus {
    /// Record an unsuccessful terminal run and decide whether to retry it.
    pub fn on_unsuccessful(&mut self, policy: Option<&RetryPolicy>) -> RetryDecision {
        let Some(policy) = policy.filter(|p| p.is_enabled()) else {
            return RetryDecision::Disabled;
        };

        if policy.backoff_limit == UNLIMITED_RETRIES || self.failed_count < policy.backoff_limit {
            self.failed_count += 1;
            RetryDecision::Retry {
                attempt: self.failed_count,
            }
        } else {
            RetryDecision::Exhausted
        }
    }

    /// A successful terminal run is the only thing that resets the counter.
    pub fn on_success(&mut self) {
        self.failed_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_policy_never_retries() {
        let mut status = RetryStatus::default();
        assert_eq!(status.on_unsuccessful(None), RetryDecision::Disabled);
        assert_eq!(status.failed_count, 0);
    }

    #[test]
    fn test_zero_limit_never_retries() {
        let mut status = RetryStatus::default();
        let policy = RetryPolicy::new(0);
        assert_eq!(status.on_unsuccessful(Some(&policy)), RetryDecision::Disabled);
    }

    #[test]
    fn test_limit_two_makes_three_attempts() {
        let policy = RetryPolicy::new(2);
        let mut status = RetryStatus::default();

        // initial attempt fails
        assert_eq!(
            status.on_unsuccessful(Some(&policy)),
            RetryDecision::Retry { attempt: 1 }
        );
        // first retry fails
        assert_eq!(
            status.on_unsuccessful(Some(&policy)),
            RetryDecision::Retry { attempt: 2 }
        );
        // second retry fails: nothing more
        assert_eq!(status.on_unsuccessful(Some(&policy)), RetryDecision::Exhausted);
        assert_eq!(status.on_unsuccessful(Some(&policy)), RetryDecision::Exhausted);
        assert_eq!(status.failed_count, 2);
    }

    #[test]
    fn test_unlimited_keeps_retrying() {
        let policy = RetryPolicy::new(UNLIMITED_RETRIES);
        let mut status = RetryStatus::default();
        for attempt in 1..=50 {
            assert_eq!(
                status.on_unsuccessful(Some(&policy)),
                RetryDecision::Retry { attempt }
            );
        }
    }

    #[test]
    fn test_success_resets_regardless_of_count() {
        let mut status = RetryStatus { failed_count: 17 };
        status.on_success();
        assert_eq!(status.failed_count, 0);
    }

    #[test]
    fn test_policy_validity() {
        assert!(RetryPolicy::new(-1).is_valid());
        assert!(RetryPolicy::new(5).is_valid());
        assert!(!RetryPolicy::new(-2).is_valid());
    }

    #[test]
    fn test_status_json_shape() {
        let json = serde_json::to_value(RetryStatus { failed_count: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({"failedCount": 3}));
    }
}
