//! Instance health state machine.
//!
//! # States
//! - Unknown: registered, not yet probed (still receives traffic)
//! - Healthy: receives traffic
//! - Unhealthy: excluded from load balancing
//!
//! # State Transitions
//! ```text
//! Unknown/Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unknown/Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! ```
//!
//! # Design Decisions
//! - healthy_threshold > 1 gives hysteresis against flapping
//! - Transition is a pure function; the checker applies it

use crate::config::HealthCheckConfig;
use crate::registry::HealthStatus;

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub unhealthy: u32,
    pub healthy: u32,
}

impl From<&HealthCheckConfig> for Thresholds {
    fn from(config: &HealthCheckConfig) -> Self {
        Self {
            unhealthy: config.unhealthy_threshold.max(1),
            healthy: config.healthy_threshold.max(1),
        }
    }
}

/// Status after an observation, or `None` when it does not change.
pub fn next_status(
    current: HealthStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    thresholds: Thresholds,
) -> Option<HealthStatus> {
    match current {
        HealthStatus::Unhealthy if consecutive_successes >= thresholds.healthy => {
            Some(HealthStatus::Healthy)
        }
        HealthStatus::Unknown if consecutive_successes >= thresholds.healthy => {
            Some(HealthStatus::Healthy)
        }
        HealthStatus::Unknown | HealthStatus::Healthy
            if consecutive_failures >= thresholds.unhealthy =>
        {
            Some(HealthStatus::Unhealthy)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Thresholds = Thresholds { unhealthy: 3, healthy: 2 };

    #[test]
    fn test_failures_below_threshold_keep_status() {
        assert_eq!(next_status(HealthStatus::Healthy, 2, 0, T), None);
        assert_eq!(next_status(HealthStatus::Unknown, 1, 0, T), None);
    }

    #[test]
    fn test_threshold_marks_unhealthy() {
        assert_eq!(next_status(HealthStatus::Healthy, 3, 0, T), Some(HealthStatus::Unhealthy));
        assert_eq!(next_status(HealthStatus::Unknown, 3, 0, T), Some(HealthStatus::Unhealthy));
        assert_eq!(next_status(HealthStatus::Unhealthy, 9, 0, T), None);
    }

    #[test]
    fn test_recovery_needs_consecutive_successes() {
        assert_eq!(next_status(HealthStatus::Unhealthy, 0, 1, T), None);
        assert_eq!(next_status(HealthStatus::Unhealthy, 0, 2, T), Some(HealthStatus::Healthy));
        assert_eq!(next_status(HealthStatus::Healthy, 0, 5, T), None);
    }
}
