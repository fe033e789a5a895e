//! Dispatcher configuration.
//!
//! Loaded via the `config` crate from environment variables. Nested
//! settings use `__` as the separator, e.g. `ENGINE__EVENT_WORKERS=16` or
//! `SCHEDULER__SWEEP_INTERVAL_SECS=30`.

use serde::Deserialize;
use tripwire_engine::EngineConfig;
use tripwire_scheduler::SchedulerConfig;

/// Dispatcher configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct DispatcherConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// NATS server URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Prefix of every subject the dispatcher subscribes or sends to.
    #[serde(default = "default_nats_subject_prefix")]
    pub nats_subject_prefix: String,

    /// Maximum number of database connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Trigger engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Scheduled-fire loop configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_subject_prefix() -> String {
    "tripwire".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl DispatcherConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        )
    }

    fn from_source(source: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}
