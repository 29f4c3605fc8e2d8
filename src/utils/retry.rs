//! Retry utilities: backoff builders.
//!
//! Uses `backon` for exponential backoff. The provisioning poll loop and
//! the optimistic-write retry loop both drive a built backoff by hand:
//! each yielded delay permits one more attempt, `None` means exhausted.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::config::{IngestConfig, ProvisioningConfig};

/// Backoff for polling a table until it is ACTIVE.
///
/// `max_attempts` counts status checks, so the builder yields one delay
/// fewer. No jitter: the schedule is visible in operator logs.
///
/// Defaults: 1s min, 10s max, 30 status checks.
pub fn provisioning_backoff(config: &ProvisioningConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.poll_min_delay_ms))
        .with_max_delay(Duration::from_millis(config.poll_max_delay_ms))
        .with_max_times(config.max_poll_attempts.saturating_sub(1))
}

/// Backoff for re-read/re-merge retries after a failed conditional write.
///
/// - Min delay: 10ms
/// - Max delay: 500ms
/// - Max retries: 5
/// - Jitter enabled
pub fn write_conflict_backoff(config: &IngestConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.conflict_min_delay_ms))
        .with_max_delay(Duration::from_millis(config.conflict_max_delay_ms))
        .with_max_times(config.conflict_retries)
        .with_jitter()
}

#[cfg(test)]
mod tests {
    use backon::BackoffBuilder;

    use super::*;

    #[test]
    fn test_provisioning_backoff_counts_status_checks() {
        let config = ProvisioningConfig {
            max_poll_attempts: 4,
            ..Default::default()
        };
        let delays: Vec<_> = provisioning_backoff(&config).build().collect();
        assert_eq!(delays.len(), 3);
        assert_eq!(delays[0], Duration::from_secs(1));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(10)));
    }

    #[test]
    fn test_write_conflict_backoff_is_bounded() {
        let config = IngestConfig::default();
        let delays: Vec<_> = write_conflict_backoff(&config).build().collect();
        assert_eq!(delays.len(), config.conflict_retries);
    }
}
