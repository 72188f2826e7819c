//! Replica clamping and cool-down arithmetic for agent autoscaling.

use chrono::{DateTime, Utc};

/// Clamp the demand into `[min, max]`.
///
/// Never panics: when `min > max` (rejected by validation) the result is `max`.
pub fn compute_desired_replicas(demand: i32, min: i32, max: i32) -> i32 {
    demand.max(min).min(max)
}

/// Direction of a replica change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Up,
    Down,
}

impl ScaleDirection {
    /// `None` when the counts are equal.
    pub fn between(current: i32, desired: i32) -> Option<Self> {
        match desired.cmp(&current) {
            std::cmp::Ordering::Greater => Some(Self::Up),
            std::cmp::Ordering::Less => Some(Self::Down),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// Minimum time between two scaling events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cooldown {
    /// One window for both directions.
    Uniform { seconds: i64 },
    /// Separate windows per direction.
    Split {
        scale_up_seconds: i64,
        scale_down_seconds: i64,
    },
}

impl Cooldown {
    pub fn seconds_for(&self, direction: ScaleDirection) -> i64 {
        match (self, direction) {
            (Cooldown::Uniform { seconds }, _) => *seconds,
            (Cooldown::Split { scale_up_seconds, .. }, ScaleDirection::Up) => *scale_up_seconds,
            (Cooldown::Split { scale_down_seconds, .. }, ScaleDirection::Down) => {
                *scale_down_seconds
            }
        }
    }
}

/// Seconds left before another scaling event is allowed.
///
/// A value `<= 0` means the cool-down has expired. Without a previous scaling
/// event the cool-down is always expired.
pub fn cooldown_seconds_remaining(
    last_scaling_event: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown: &Cooldown,
    current: i32,
    desired: i32,
) -> i64 {
    let Some(last) = last_scaling_event else {
        return 0;
    };
    let direction = ScaleDirection::between(current, desired).unwrap_or(ScaleDirection::Down);
    let elapsed = now.signed_duration_since(last).num_seconds();
    cooldown.seconds_for(direction) - elapsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    #[test]
    fn test_clamp_bounds() {
        assert_eq!(compute_desired_replicas(0, 1, 5), 1);
        assert_eq!(compute_desired_replicas(1, 1, 5), 1);
        assert_eq!(compute_desired_replicas(3, 1, 5), 3);
        assert_eq!(compute_desired_replicas(5, 1, 5), 5);
        assert_eq!(compute_desired_replicas(42, 1, 5), 5);
    }

    #[test]
    fn test_clamp_inverted_window_does_not_panic() {
        assert_eq!(compute_desired_replicas(3, 5, 2), 2);
    }

    #[test]
    fn test_direction() {
        assert_eq!(ScaleDirection::between(1, 3), Some(ScaleDirection::Up));
        assert_eq!(ScaleDirection::between(3, 1), Some(ScaleDirection::Down));
        assert_eq!(ScaleDirection::between(2, 2), None);
    }

    #[test]
    fn test_no_previous_event_is_expired() {
        let cooldown = Cooldown::Uniform { seconds: 300 };
        assert!(cooldown_seconds_remaining(None, Utc::now(), &cooldown, 1, 4) <= 0);
    }

    #[test]
    fn test_cooldown_monotonic() {
        let cooldown = Cooldown::Uniform { seconds: 60 };
        let last = Utc::now();

        assert!(cooldown_seconds_remaining(Some(last), last, &cooldown, 1, 2) > 0);
        let later = last + Duration::seconds(30);
        assert_eq!(cooldown_seconds_remaining(Some(last), later, &cooldown, 1, 2), 30);
        let expired = last + Duration::seconds(60);
        assert!(cooldown_seconds_remaining(Some(last), expired, &cooldown, 1, 2) <= 0);
    }

    #[test]
    fn test_split_cooldown_picks_direction() {
        let cooldown = Cooldown::Split {
            scale_up_seconds: 10,
            scale_down_seconds: 600,
        };
        let last = Utc::now();
        let now = last + Duration::seconds(20);

        // Scaling up: 10s window already passed.
        assert!(cooldown_seconds_remaining(Some(last), now, &cooldown, 1, 3) <= 0);
        // Scaling down: still inside the 600s window.
        assert_eq!(cooldown_seconds_remaining(Some(last), now, &cooldown, 3, 1), 580);
    }

    proptest! {
        #[test]
        fn prop_clamp_stays_in_window(demand in -100i32..1000, min in 0i32..50, span in 0i32..50) {
            let max = min + span;
            let desired = compute_desired_replicas(demand, min, max);
            prop_assert!(min <= desired && desired <= max);
            if demand >= min && demand <= max {
                prop_assert_eq!(desired, demand);
            }
        }
    }
}
