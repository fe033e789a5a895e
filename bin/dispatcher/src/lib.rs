//! The tripwire dispatcher.
//!
//! Wires the trigger engine to its surroundings: Postgres for triggers,
//! execution records and the fire ledger, and NATS for inbound events and
//! the services the engine consults when it fires.

pub mod config;
pub mod db;
pub mod nats;
