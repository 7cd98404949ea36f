use skillrelay_core::chrono::Utc;
use skillrelay_core::domain::activity::ConversationKey;
use skillrelay_core::domain::router_state::RouterState;
use sqlx::Row;

use super::{RepositoryError, RouterStateRepository};
use crate::DbPool;

pub struct SqlRouterStateRepository {
    pool: DbPool,
}

impl SqlRouterStateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RouterStateRepository for SqlRouterStateRepository {
    async fn load(&self, key: &ConversationKey) -> Result<Option<RouterState>, RepositoryError> {
        let row = sqlx::query("SELECT state_json FROM router_state WHERE conversation_key = ?")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let raw = row.try_get::<String, _>("state_json")?;
            serde_json::from_str::<RouterState>(&raw).map_err(|error| {
                RepositoryError::Decode(format!("invalid router state for `{key}`: {error}"))
            })
        })
        .transpose()
    }

    async fn save(&self, key: &ConversationKey, state: &RouterState) -> Result<(), RepositoryError> {
        let state_json = serde_json::to_string(state).map_err(|error| {
            RepositoryError::Decode(format!("could not encode router state: {error}"))
        })?;
        let turn_count = i64::try_from(state.turn_count).unwrap_or(i64::MAX);

        sqlx::query(
            "INSERT INTO router_state (conversation_key, state_json, turn_count, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(conversation_key) DO UPDATE SET
                state_json = excluded.state_json,
                turn_count = excluded.turn_count,
                updated_at = excluded.updated_at",
        )
        .bind(key.as_str())
        .bind(state_json)
        .bind(turn_count)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &ConversationKey) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM router_state WHERE conversation_key = ?")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
