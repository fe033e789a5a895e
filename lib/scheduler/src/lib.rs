//! Scheduling for tripwire triggers.
//!
//! This crate provides:
//!
//! - **Cron schedules**: parsing of 5- and 6-field expressions, minimum
//!   interval checks and short English descriptions
//! - **Fire ledger**: the idempotency token store keyed by trigger and
//!   scheduled fire time
//! - **Fire loop**: the recurring sweep that fires each due tick at most once

pub mod config;
pub mod error;
pub mod fire_loop;
pub mod ledger;
pub mod schedule;

pub use config::SchedulerConfig;
pub use error::{HandlerError, LedgerError, ScheduleError, SourceError};
pub use fire_loop::{
    DueTrigger, DueTriggerSource, ScheduledFireHandler, ScheduledFireLoop, SweepReport,
    TickOutcome,
};
pub use ledger::{Claim, FireKey, FireLedger, InMemoryFireLedger, Lease};
pub use schedule::CronSchedule;
