//! Coordinator configuration.
//!
//! This module contains the [`CoordinatorConfig`] struct and related
//! constants for configuring workload reconciliation timing.

use std::time::Duration;

// =============================================================================
// Configuration Constants
// =============================================================================

/// Default interval between reconciliation passes of a healthy
/// workload.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Default backoff after a failed reconciliation pass.
pub const DEFAULT_BACKOFF_PERIOD: Duration = Duration::from_secs(10);

/// Default backoff after a reconciliation pass that failed on a
/// not-yet-ready dependency.
pub const DEFAULT_TRANSIENT_BACKOFF_PERIOD: Duration = Duration::from_secs(1);

/// Default jitter factor applied to every requeue delay.
pub const DEFAULT_JITTER_FACTOR: f64 = 0.5;

// =============================================================================
// Coordinator Configuration
// =============================================================================

/// Timing configuration for the work coordinator.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Interval between reconciliation passes of a healthy workload.
    pub resync_interval: Duration,

    /// Backoff after a failed reconciliation pass.
    pub backoff_period: Duration,

    /// Backoff after a pass that failed because a dependency was not
    /// ready yet. Shorter than [`backoff_period`](Self::backoff_period)
    /// so workloads recover quickly once the dependency comes up.
    pub transient_backoff_period: Duration,

    /// Jitter factor applied to every requeue delay, spreading worker
    /// wakeups over time.
    pub jitter_factor: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            backoff_period: DEFAULT_BACKOFF_PERIOD,
            transient_backoff_period: DEFAULT_TRANSIENT_BACKOFF_PERIOD,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_config_default() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.resync_interval, DEFAULT_RESYNC_INTERVAL);
        assert_eq!(config.backoff_period, DEFAULT_BACKOFF_PERIOD);
        assert_eq!(
            config.transient_backoff_period,
            DEFAULT_TRANSIENT_BACKOFF_PERIOD
        );
    }

    #[test]
    fn test_transient_backoff_shorter_than_standard() {
        let config = CoordinatorConfig::default();
        assert!(config.transient_backoff_period < config.backoff_period);
    }

    #[test]
    fn test_coordinator_config_clone() {
        let config = CoordinatorConfig::default();
        let cloned = config.clone();
        assert_eq!(cloned.resync_interval, config.resync_interval);
    }
}
