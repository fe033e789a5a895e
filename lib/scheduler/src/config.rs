//! Scheduled-fire loop configuration.

use serde::Deserialize;
use std::time::Duration;

/// Settings for the scheduled-fire loop.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Maximum number of due triggers picked up per sweep.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Lifetime of a fire lease, in seconds.
    /// A crashed worker's lease becomes available again after this long.
    /// A live worker renews its lease three times per lifetime while firing.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Triggers fired concurrently within one sweep.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_batch_size() -> usize {
    100
}

fn default_lease_ttl_secs() -> u64 {
    10
}

fn default_workers() -> usize {
    2
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            batch_size: default_batch_size(),
            lease_ttl_secs: default_lease_ttl_secs(),
            workers: default_workers(),
        }
    }
}

impl SchedulerConfig {
    /// Time between sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Fire lease lifetime, capped at one day.
    #[must_use]
    pub fn lease_ttl(&self) -> chrono::Duration {
        let secs = self.lease_ttl_secs.clamp(1, 86_400);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(86_400))
    }

    /// Time between lease renewals while a tick is firing.
    #[must_use]
    pub fn lease_renew_interval(&self) -> Duration {
        (self.lease_ttl() / 3)
            .to_std()
            .unwrap_or(Duration::from_secs(1))
            .max(Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_config_has_correct_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.lease_ttl_secs, 10);
        assert_eq!(config.workers, 2);
        assert_eq!(config.lease_ttl(), chrono::Duration::seconds(10));
        assert_eq!(config.lease_renew_interval(), Duration::new(3, 333_333_333));
    }

    #[test]
    fn zero_sweep_interval_is_clamped() {
        let config = SchedulerConfig {
            sweep_interval_secs: 0,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }
}
