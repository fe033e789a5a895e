//! Fire ledger repository.
//!
//! One row per scheduled trigger. Claims are a single conditional upsert,
//! so two dispatchers racing for the same tick cannot both acquire it.
//! Renewal and settlement only touch a row still held by the same holder
//! for the same tick.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};
use tripwire_core::TriggerId;
use tripwire_scheduler::{Claim, FireKey, FireLedger, Lease, LedgerError};

/// Row type for ledger lookups after a refused claim.
#[derive(FromRow)]
struct LedgerRow {
    last_fired_at: Option<DateTime<Utc>>,
    lease_holder: Option<String>,
}

impl LedgerRow {
    fn refusal(self, key: &FireKey) -> Claim {
        if self.last_fired_at.is_some_and(|fired| fired >= key.fire_time) {
            return Claim::AlreadyFired;
        }
        Claim::Held {
            holder: self.lease_holder.unwrap_or_default(),
        }
    }
}

fn unavailable(e: sqlx::Error) -> LedgerError {
    LedgerError::Unavailable {
        message: e.to_string(),
    }
}

fn lease_lost(lease: &Lease) -> LedgerError {
    LedgerError::LeaseLost {
        trigger_id: lease.key.trigger_id,
        fire_time: lease.key.fire_time,
    }
}

/// Postgres-backed fire ledger.
#[derive(Clone)]
pub struct PgFireLedger {
    pool: PgPool,
}

impl PgFireLedger {
    /// Creates a new ledger.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FireLedger for PgFireLedger {
    async fn try_acquire(
        &self,
        key: FireKey,
        holder: &str,
        ttl: Duration,
    ) -> Result<Claim, LedgerError> {
        let now = Utc::now();
        let expires_at = now + ttl;
        let acquired: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO trigger_fire_ledger
                (trigger_id, lease_holder, lease_fire_time, lease_expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (trigger_id) DO UPDATE
            SET lease_holder = EXCLUDED.lease_holder,
                lease_fire_time = EXCLUDED.lease_fire_time,
                lease_expires_at = EXCLUDED.lease_expires_at
            WHERE (trigger_fire_ledger.last_fired_at IS NULL
                   OR trigger_fire_ledger.last_fired_at < EXCLUDED.lease_fire_time)
              AND (trigger_fire_ledger.lease_holder IS NULL
                   OR trigger_fire_ledger.lease_holder = EXCLUDED.lease_holder
                   OR trigger_fire_ledger.lease_expires_at <= $5)
            RETURNING trigger_id
            "#,
        )
        .bind(key.trigger_id.to_string())
        .bind(holder)
        .bind(key.fire_time)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        if acquired.is_some() {
            return Ok(Claim::Acquired(Lease {
                key,
                holder: holder.to_string(),
                expires_at,
            }));
        }

        let row: Option<LedgerRow> = sqlx::query_as(
            "SELECT last_fired_at, lease_holder FROM trigger_fire_ledger WHERE trigger_id = $1",
        )
        .bind(key.trigger_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(|row| row.refusal(&key))
            .ok_or_else(|| LedgerError::Unavailable {
                message: format!("ledger entry for {} vanished during claim", key.trigger_id),
            })
    }

    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease, LedgerError> {
        let expires_at = Utc::now() + ttl;
        let result = sqlx::query(
            r#"
            UPDATE trigger_fire_ledger
            SET lease_expires_at = $4
            WHERE trigger_id = $1 AND lease_holder = $2 AND lease_fire_time = $3
            "#,
        )
        .bind(lease.key.trigger_id.to_string())
        .bind(&lease.holder)
        .bind(lease.key.fire_time)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() == 0 {
            return Err(lease_lost(lease));
        }
        Ok(Lease {
            expires_at,
            ..lease.clone()
        })
    }

    async fn mark_fired(&self, lease: &Lease) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE trigger_fire_ledger
            SET last_fired_at = GREATEST(COALESCE(last_fired_at, $3), $3),
                lease_holder = NULL,
                lease_fire_time = NULL,
                lease_expires_at = NULL
            WHERE trigger_id = $1 AND lease_holder = $2 AND lease_fire_time = $3
            "#,
        )
        .bind(lease.key.trigger_id.to_string())
        .bind(&lease.holder)
        .bind(lease.key.fire_time)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() == 0 {
            return Err(lease_lost(lease));
        }
        Ok(())
    }

    async fn release(&self, lease: &Lease) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            UPDATE trigger_fire_ledger
            SET lease_holder = NULL, lease_fire_time = NULL, lease_expires_at = NULL
            WHERE trigger_id = $1 AND lease_holder = $2 AND lease_fire_time = $3
            "#,
        )
        .bind(lease.key.trigger_id.to_string())
        .bind(&lease.holder)
        .bind(lease.key.fire_time)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn forget(&self, trigger_id: TriggerId) -> Result<(), LedgerError> {
        sqlx::query("DELETE FROM trigger_fire_ledger WHERE trigger_id = $1")
            .bind(trigger_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(())
    }
}
