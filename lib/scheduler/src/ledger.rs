//! The fire ledger: idempotency tokens for scheduled firing.
//!
//! Each scheduled trigger has one ledger entry holding the last fire time
//! that completed and at most one outstanding lease. A tick fires only if
//! its fire time is later than the recorded one and no live lease from
//! another holder exists. This, not in-process locking, is what keeps
//! concurrent sweepers from firing the same tick twice.

use crate::error::LedgerError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tripwire_core::TriggerId;

/// Identifies one scheduled tick of one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FireKey {
    pub trigger_id: TriggerId,
    pub fire_time: DateTime<Utc>,
}

/// A time-limited claim on a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: FireKey,
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of trying to claim a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The caller may fire.
    Acquired(Lease),
    /// This tick, or a later one, already fired.
    AlreadyFired,
    /// Another holder has a live lease.
    Held { holder: String },
}

/// Durable idempotency token store.
#[async_trait]
pub trait FireLedger: Send + Sync {
    /// Claims `key` for `holder` for `ttl`.
    async fn try_acquire(
        &self,
        key: FireKey,
        holder: &str,
        ttl: Duration,
    ) -> Result<Claim, LedgerError>;

    /// Extends a live lease by `ttl` from now.
    ///
    /// Fails with `LeaseLost` if the lease expired and was taken over, or
    /// was already settled.
    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease, LedgerError>;

    /// Records the tick as fired and drops the lease.
    async fn mark_fired(&self, lease: &Lease) -> Result<(), LedgerError>;

    /// Drops the lease without recording the tick.
    async fn release(&self, lease: &Lease) -> Result<(), LedgerError>;

    /// Removes every record for a deleted trigger.
    async fn forget(&self, trigger_id: TriggerId) -> Result<(), LedgerError>;
}

#[derive(Debug, Default)]
struct Entry {
    last_fired: Option<DateTime<Utc>>,
    lease: Option<Lease>,
}

/// Process-local fire ledger.
#[derive(Debug, Default)]
pub struct InMemoryFireLedger {
    entries: Mutex<HashMap<TriggerId, Entry>>,
}

impl InMemoryFireLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last fire time recorded for a trigger.
    #[must_use]
    pub fn last_fired(&self, trigger_id: TriggerId) -> Option<DateTime<Utc>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(&trigger_id).and_then(|e| e.last_fired)
    }
}

fn owns(entry: &Entry, lease: &Lease) -> bool {
    entry
        .lease
        .as_ref()
        .is_some_and(|held| held.holder == lease.holder && held.key == lease.key)
}

#[async_trait]
impl FireLedger for InMemoryFireLedger {
    async fn try_acquire(
        &self,
        key: FireKey,
        holder: &str,
        ttl: Duration,
    ) -> Result<Claim, LedgerError> {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(key.trigger_id).or_default();

        if entry.last_fired.is_some_and(|fired| fired >= key.fire_time) {
            return Ok(Claim::AlreadyFired);
        }
        if let Some(held) = &entry.lease
            && held.expires_at > now
            && held.holder != holder
        {
            return Ok(Claim::Held {
                holder: held.holder.clone(),
            });
        }

        let lease = Lease {
            key,
            holder: holder.to_string(),
            expires_at: now + ttl,
        };
        entry.lease = Some(lease.clone());
        Ok(Claim::Acquired(lease))
    }

    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease, LedgerError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let held = entries
            .get_mut(&lease.key.trigger_id)
            .and_then(|entry| entry.lease.as_mut())
            .filter(|held| held.holder == lease.holder && held.key == lease.key)
            .ok_or(LedgerError::LeaseLost {
                trigger_id: lease.key.trigger_id,
                fire_time: lease.key.fire_time,
            })?;
        held.expires_at = Utc::now() + ttl;
        Ok(held.clone())
    }

    async fn mark_fired(&self, lease: &Lease) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let lost = || LedgerError::LeaseLost {
            trigger_id: lease.key.trigger_id,
            fire_time: lease.key.fire_time,
        };
        let entry = entries.get_mut(&lease.key.trigger_id).ok_or_else(lost)?;
        if !owns(entry, lease) {
            return Err(lost());
        }
        entry.last_fired = Some(
            entry
                .last_fired
                .map_or(lease.key.fire_time, |fired| fired.max(lease.key.fire_time)),
        );
        entry.lease = None;
        Ok(())
    }

    async fn release(&self, lease: &Lease) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(&lease.key.trigger_id)
            && owns(entry, lease)
        {
            entry.lease = None;
        }
        Ok(())
    }

    async fn forget(&self, trigger_id: TriggerId) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&trigger_id);
        Ok(())
    }
}
