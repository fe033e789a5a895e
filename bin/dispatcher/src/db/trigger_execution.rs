//! Trigger execution repository.

use super::{decode_error, store_error};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tripwire_core::{AppId, TriggerExecutionId, TriggerId};
use tripwire_engine::{StoreError, TriggerExecutionStore};
use tripwire_trigger::{TriggerExecution, TriggerExecutionStatus};

/// Row type for trigger execution queries.
#[derive(FromRow)]
struct TriggerExecutionRow {
    document: serde_json::Value,
}

impl TriggerExecutionRow {
    fn try_into_execution(self) -> Result<TriggerExecution, StoreError> {
        serde_json::from_value(self.document).map_err(|e| decode_error("trigger execution", e))
    }
}

fn document(execution: &TriggerExecution) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(execution).map_err(|e| StoreError::Decode {
        message: format!("trigger execution {} does not serialize: {e}", execution.id),
    })
}

/// Repository for trigger executions.
#[derive(Clone)]
pub struct PgTriggerExecutionStore {
    pool: PgPool,
}

impl PgTriggerExecutionStore {
    /// Creates a new repository.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriggerExecutionStore for PgTriggerExecutionStore {
    async fn insert(&self, execution: &TriggerExecution) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trigger_executions
                (id, app_id, trigger_id, status, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.app_id.to_string())
        .bind(execution.trigger_id.to_string())
        .bind(execution.status.as_str())
        .bind(document(execution)?)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn update(&self, execution: &TriggerExecution) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE trigger_executions
            SET status = $2, document = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.status.as_str())
        .bind(document(execution)?)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                message: format!("trigger execution {} does not exist", execution.id),
            });
        }
        Ok(())
    }

    async fn get(
        &self,
        app_id: AppId,
        id: TriggerExecutionId,
    ) -> Result<Option<TriggerExecution>, StoreError> {
        let row: Option<TriggerExecutionRow> = sqlx::query_as(
            "SELECT document FROM trigger_executions WHERE app_id = $1 AND id = $2",
        )
        .bind(app_id.to_string())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(TriggerExecutionRow::try_into_execution).transpose()
    }

    async fn last_successful(
        &self,
        app_id: AppId,
        trigger_id: TriggerId,
    ) -> Result<Option<TriggerExecution>, StoreError> {
        let row: Option<TriggerExecutionRow> = sqlx::query_as(
            r#"
            SELECT document FROM trigger_executions
            WHERE app_id = $1 AND trigger_id = $2 AND status = $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(app_id.to_string())
        .bind(trigger_id.to_string())
        .bind(TriggerExecutionStatus::Success.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(TriggerExecutionRow::try_into_execution).transpose()
    }

    async fn list_for_trigger(
        &self,
        app_id: AppId,
        trigger_id: TriggerId,
    ) -> Result<Vec<TriggerExecution>, StoreError> {
        let rows: Vec<TriggerExecutionRow> = sqlx::query_as(
            r#"
            SELECT document FROM trigger_executions
            WHERE app_id = $1 AND trigger_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(app_id.to_string())
        .bind(trigger_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(TriggerExecutionRow::try_into_execution)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_document_is_a_decode_error() {
        let row = TriggerExecutionRow {
            document: serde_json::json!({"status": "exploded"}),
        };
        assert!(matches!(
            row.try_into_execution(),
            Err(StoreError::Decode { message }) if message.starts_with("trigger execution")
        ));
    }
}
