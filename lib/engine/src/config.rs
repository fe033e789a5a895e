//! Engine configuration.

use serde::Deserialize;
use std::fmt;
use tripwire_resolver::InfraAddressing;

/// What to do when resolved artifacts do not match the services a
/// deployment needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactMatchPolicy {
    /// Log the mismatch and submit anyway.
    #[default]
    Lenient,
    /// Abort the firing.
    Strict,
}

impl fmt::Display for ArtifactMatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lenient => f.write_str("lenient"),
            Self::Strict => f.write_str("strict"),
        }
    }
}

/// Trigger engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Handling of artifact/service mismatches.
    #[serde(default)]
    pub artifact_match_policy: ArtifactMatchPolicy,

    /// Addressing of infrastructure variables.
    #[serde(default)]
    pub infra_addressing: InfraAddressing,

    /// Shortest allowed gap between two cron occurrences, in seconds.
    #[serde(default = "default_min_cron_interval_secs")]
    pub min_cron_interval_secs: i64,

    /// Fire artifact triggers once per matching artifact in a collection
    /// batch instead of once per batch.
    #[serde(default)]
    pub trigger_for_all_artifacts: bool,

    /// Concurrent event-handling tasks.
    #[serde(default = "default_event_workers")]
    pub event_workers: usize,
}

fn default_min_cron_interval_secs() -> i64 {
    300
}

fn default_event_workers() -> usize {
    8
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            artifact_match_policy: ArtifactMatchPolicy::default(),
            infra_addressing: InfraAddressing::default(),
            min_cron_interval_secs: default_min_cron_interval_secs(),
            trigger_for_all_artifacts: false,
            event_workers: default_event_workers(),
        }
    }
}
