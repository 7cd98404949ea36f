use skillrelay_core::chrono::{DateTime, Utc};
use skillrelay_core::domain::activity::ConversationReference;
use skillrelay_core::domain::correlation::{CorrelationEntry, RoutingKey};
use skillrelay_core::domain::skill::SkillId;
use sqlx::{sqlite::SqliteRow, Row};

use super::{CorrelationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCorrelationRepository {
    pool: DbPool,
}

impl SqlCorrelationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CorrelationRepository for SqlCorrelationRepository {
    async fn find(
        &self,
        routing_key: &RoutingKey,
    ) -> Result<Option<CorrelationEntry>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                routing_key,
                skill_id,
                parent_reference_json,
                authorized_scope,
                created_at,
                updated_at
             FROM skill_conversation
             WHERE routing_key = ?",
        )
        .bind(routing_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(entry_from_row).transpose()
    }

    async fn save(&self, entry: CorrelationEntry) -> Result<(), RepositoryError> {
        let reference_json = serde_json::to_string(&entry.parent_reference).map_err(|error| {
            RepositoryError::Decode(format!("could not encode parent reference: {error}"))
        })?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM skill_conversation
             WHERE channel_id = ? AND parent_conversation_id = ? AND skill_id = ?
               AND routing_key <> ?",
        )
        .bind(&entry.parent_reference.channel_id)
        .bind(&entry.parent_reference.conversation_id)
        .bind(entry.skill_id.as_str())
        .bind(entry.routing_key.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO skill_conversation (
                routing_key,
                channel_id,
                parent_conversation_id,
                skill_id,
                parent_reference_json,
                authorized_scope,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(routing_key) DO UPDATE SET
                parent_reference_json = excluded.parent_reference_json,
                authorized_scope = excluded.authorized_scope,
                updated_at = excluded.updated_at",
        )
        .bind(entry.routing_key.as_str())
        .bind(&entry.parent_reference.channel_id)
        .bind(&entry.parent_reference.conversation_id)
        .bind(entry.skill_id.as_str())
        .bind(reference_json)
        .bind(&entry.authorized_scope)
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, routing_key: &RoutingKey) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM skill_conversation WHERE routing_key = ?")
            .bind(routing_key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_for_conversation(
        &self,
        channel_id: &str,
        conversation_id: &str,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM skill_conversation WHERE channel_id = ? AND parent_conversation_id = ?",
        )
        .bind(channel_id)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_for_conversation(
        &self,
        channel_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<CorrelationEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                routing_key,
                skill_id,
                parent_reference_json,
                authorized_scope,
                created_at,
                updated_at
             FROM skill_conversation
             WHERE channel_id = ? AND parent_conversation_id = ?
             ORDER BY skill_id ASC",
        )
        .bind(channel_id)
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }
}

fn entry_from_row(row: SqliteRow) -> Result<CorrelationEntry, RepositoryError> {
    let reference_json = row.try_get::<String, _>("parent_reference_json")?;
    let parent_reference = serde_json::from_str::<ConversationReference>(&reference_json)
        .map_err(|error| {
            RepositoryError::Decode(format!("invalid parent_reference_json: {error}"))
        })?;

    Ok(CorrelationEntry {
        routing_key: RoutingKey(row.try_get("routing_key")?),
        parent_reference,
        skill_id: SkillId(row.try_get("skill_id")?),
        authorized_scope: row.try_get("authorized_scope")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
