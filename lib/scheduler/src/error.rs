//! Error types for the scheduler crate.
//!
//! - `ScheduleError`: cron expressions rejected at save time
//! - `LedgerError`: the fire ledger could not be reached or a lease was lost
//! - `SourceError`: the due-trigger source could not be read or advanced
//! - `HandlerError`: a scheduled firing failed

use chrono::{DateTime, Utc};
use std::fmt;
use tripwire_core::TriggerId;

/// Errors from cron schedule validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The expression does not parse.
    InvalidCronExpression { expression: String, reason: String },
    /// The expression parses but has no upcoming occurrence.
    CronNeverFires { expression: String },
    /// Two consecutive occurrences are closer than allowed.
    CronTooFrequent {
        expression: String,
        interval_secs: i64,
        min_interval_secs: i64,
    },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::CronNeverFires { expression } => {
                write!(f, "cron expression '{expression}' never fires")
            }
            Self::CronTooFrequent {
                expression,
                interval_secs,
                min_interval_secs,
            } => write!(
                f,
                "cron expression '{expression}' fires every {interval_secs}s, minimum is {min_interval_secs}s"
            ),
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Errors from the fire ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The backing store failed.
    Unavailable { message: String },
    /// The lease expired and was taken over before it was settled.
    LeaseLost {
        trigger_id: TriggerId,
        fire_time: DateTime<Utc>,
    },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "fire ledger unavailable: {message}"),
            Self::LeaseLost {
                trigger_id,
                fire_time,
            } => write!(f, "lease for {trigger_id} at {fire_time} was lost"),
        }
    }
}

impl std::error::Error for LedgerError {}

/// Errors from the due-trigger source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The backing store failed.
    Unavailable { message: String },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "due trigger source unavailable: {message}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// A scheduled firing failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    pub trigger_id: TriggerId,
    pub reason: String,
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scheduled firing of {} failed: {}", self.trigger_id, self.reason)
    }
}

impl std::error::Error for HandlerError {}
