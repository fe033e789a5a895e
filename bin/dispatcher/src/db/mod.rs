//! Postgres-backed trigger storage.
//!
//! This module provides:
//! - Triggers, stored as a JSON document plus indexed lookup columns
//! - Trigger execution records
//! - The fire ledger for scheduled triggers

pub mod fire_ledger;
pub mod trigger;
pub mod trigger_execution;

pub use fire_ledger::PgFireLedger;
pub use trigger::PgTriggerStore;
pub use trigger_execution::PgTriggerExecutionStore;

use tripwire_engine::StoreError;

fn store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict {
            message: db.message().to_string(),
        },
        sqlx::Error::Decode(e) => StoreError::Decode {
            message: e.to_string(),
        },
        e => StoreError::Unavailable {
            message: e.to_string(),
        },
    }
}

fn decode_error(what: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Decode {
        message: format!("{what}: {e}"),
    }
}
