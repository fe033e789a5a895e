//! Trigger repository.

use super::{decode_error, store_error};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tripwire_core::{AppId, ArtifactStreamId, PipelineId, TriggerId};
use tripwire_engine::{StoreError, TriggerStore};
use tripwire_trigger::{ActionKind, Trigger, TriggerCondition, TriggerConditionType};

const SELECT_TRIGGER: &str = "SELECT condition_type, document, next_fire_at FROM triggers";

/// Row type for trigger queries.
#[derive(FromRow)]
struct TriggerRow {
    condition_type: String,
    document: serde_json::Value,
    next_fire_at: Option<DateTime<Utc>>,
}

impl TriggerRow {
    fn try_into_trigger(self) -> Result<Trigger, StoreError> {
        let condition_type = TriggerConditionType::from_str(&self.condition_type)
            .map_err(|e| decode_error("trigger condition", e))?;
        let mut trigger: Trigger =
            serde_json::from_value(self.document).map_err(|e| decode_error("trigger", e))?;
        if trigger.condition.condition_type() != condition_type {
            return Err(decode_error(
                "trigger condition",
                format!(
                    "column says {condition_type}, document says {}",
                    trigger.condition.condition_type()
                ),
            ));
        }
        // The column is what the fire loop advances.
        trigger.next_fire_at = self.next_fire_at;
        Ok(trigger)
    }
}

fn into_triggers(rows: Vec<TriggerRow>) -> Result<Vec<Trigger>, StoreError> {
    rows.into_iter().map(TriggerRow::try_into_trigger).collect()
}

/// Lookup columns extracted from a trigger.
struct TriggerColumns {
    artifact_stream_id: Option<String>,
    upstream_pipeline_id: Option<String>,
    action_kind: &'static str,
    action_target_id: String,
    document: serde_json::Value,
}

impl TriggerColumns {
    fn of(trigger: &Trigger) -> Result<Self, StoreError> {
        let (artifact_stream_id, upstream_pipeline_id) = match &trigger.condition {
            TriggerCondition::Artifact(c) => (Some(c.artifact_stream_id.to_string()), None),
            TriggerCondition::PipelineCompletion(c) => (None, Some(c.pipeline_id.to_string())),
            TriggerCondition::Scheduled(_) | TriggerCondition::Webhook(_) => (None, None),
        };
        let target = trigger.action.target();
        let action_kind = match target.kind() {
            ActionKind::Pipeline => "pipeline",
            ActionKind::Workflow => "workflow",
        };
        let document = serde_json::to_value(trigger).map_err(|e| StoreError::Decode {
            message: format!("trigger {} does not serialize: {e}", trigger.id),
        })?;
        Ok(Self {
            artifact_stream_id,
            upstream_pipeline_id,
            action_kind,
            action_target_id: target.to_string(),
            document,
        })
    }
}

/// Repository for triggers.
#[derive(Clone)]
pub struct PgTriggerStore {
    pool: PgPool,
}

impl PgTriggerStore {
    /// Creates a new repository.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        binds: &[String],
    ) -> Result<Option<Trigger>, StoreError> {
        let sql = format!("{SELECT_TRIGGER} WHERE {clause}");
        let mut query = sqlx::query_as::<_, TriggerRow>(&sql);
        for value in binds {
            query = query.bind(value);
        }
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?
            .map(TriggerRow::try_into_trigger)
            .transpose()
    }

    async fn fetch_all_where(
        &self,
        clause: &str,
        binds: &[String],
    ) -> Result<Vec<Trigger>, StoreError> {
        let sql = format!("{SELECT_TRIGGER} WHERE {clause} ORDER BY created_at");
        let mut query = sqlx::query_as::<_, TriggerRow>(&sql);
        for value in binds {
            query = query.bind(value);
        }
        into_triggers(query.fetch_all(&self.pool).await.map_err(store_error)?)
    }
}

#[async_trait]
impl TriggerStore for PgTriggerStore {
    async fn insert(&self, trigger: &Trigger) -> Result<(), StoreError> {
        let columns = TriggerColumns::of(trigger)?;
        sqlx::query(
            r#"
            INSERT INTO triggers (
                id, app_id, name, condition_type, artifact_stream_id, upstream_pipeline_id,
                webhook_token, action_kind, action_target_id, disabled, next_fire_at,
                document, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(trigger.id.to_string())
        .bind(trigger.app_id.to_string())
        .bind(&trigger.name)
        .bind(trigger.condition.condition_type().as_str())
        .bind(columns.artifact_stream_id)
        .bind(columns.upstream_pipeline_id)
        .bind(&trigger.webhook_token)
        .bind(columns.action_kind)
        .bind(columns.action_target_id)
        .bind(trigger.disabled)
        .bind(trigger.next_fire_at)
        .bind(columns.document)
        .bind(trigger.created_at)
        .bind(trigger.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn replace(&self, trigger: &Trigger) -> Result<(), StoreError> {
        let columns = TriggerColumns::of(trigger)?;
        let result = sqlx::query(
            r#"
            UPDATE triggers
            SET name = $2, condition_type = $3, artifact_stream_id = $4,
                upstream_pipeline_id = $5, webhook_token = $6, action_kind = $7,
                action_target_id = $8, disabled = $9, next_fire_at = $10, document = $11,
                updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(trigger.id.to_string())
        .bind(&trigger.name)
        .bind(trigger.condition.condition_type().as_str())
        .bind(columns.artifact_stream_id)
        .bind(columns.upstream_pipeline_id)
        .bind(&trigger.webhook_token)
        .bind(columns.action_kind)
        .bind(columns.action_target_id)
        .bind(trigger.disabled)
        .bind(trigger.next_fire_at)
        .bind(columns.document)
        .bind(trigger.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                message: format!("trigger {} does not exist", trigger.id),
            });
        }
        Ok(())
    }

    async fn delete(&self, app_id: AppId, id: TriggerId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM triggers WHERE app_id = $1 AND id = $2")
            .bind(app_id.to_string())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, app_id: AppId, id: TriggerId) -> Result<Option<Trigger>, StoreError> {
        self.fetch_one_where("app_id = $1 AND id = $2", &[app_id.to_string(), id.to_string()])
            .await
    }

    async fn find(&self, id: TriggerId) -> Result<Option<Trigger>, StoreError> {
        self.fetch_one_where("id = $1", &[id.to_string()]).await
    }

    async fn find_by_name(
        &self,
        app_id: AppId,
        name: &str,
    ) -> Result<Option<Trigger>, StoreError> {
        self.fetch_one_where("app_id = $1 AND name = $2", &[app_id.to_string(), name.to_string()])
            .await
    }

    async fn find_by_webhook_token(
        &self,
        app_id: AppId,
        token: &str,
    ) -> Result<Option<Trigger>, StoreError> {
        self.fetch_one_where(
            "app_id = $1 AND webhook_token = $2",
            &[app_id.to_string(), token.to_string()],
        )
        .await
    }

    async fn list(&self, app_id: AppId) -> Result<Vec<Trigger>, StoreError> {
        self.fetch_all_where("app_id = $1", &[app_id.to_string()]).await
    }

    async fn list_watching_stream(
        &self,
        stream: ArtifactStreamId,
    ) -> Result<Vec<Trigger>, StoreError> {
        self.fetch_all_where("artifact_stream_id = $1", &[stream.to_string()])
            .await
    }

    async fn list_after_pipeline(
        &self,
        app_id: AppId,
        pipeline_id: PipelineId,
    ) -> Result<Vec<Trigger>, StoreError> {
        self.fetch_all_where(
            "app_id = $1 AND upstream_pipeline_id = $2",
            &[app_id.to_string(), pipeline_id.to_string()],
        )
        .await
    }

    async fn due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Trigger>, StoreError> {
        let rows: Vec<TriggerRow> = sqlx::query_as(
            r#"
            SELECT condition_type, document, next_fire_at
            FROM triggers
            WHERE condition_type = 'scheduled'
              AND NOT disabled
              AND next_fire_at IS NOT NULL
              AND next_fire_at <= $1
            ORDER BY next_fire_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        into_triggers(rows)
    }

    async fn advance_next_fire(
        &self,
        id: TriggerId,
        expected: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE triggers SET next_fire_at = $3 WHERE id = $1 AND next_fire_at = $2",
        )
        .bind(id.to_string())
        .bind(expected)
        .bind(next)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }
}
