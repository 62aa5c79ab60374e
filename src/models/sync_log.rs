use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "statut_sync", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Succes,
    Echec,
    Conflit,
}

// Append-only audit row, exactly one per processed sync item
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SyncLog {
    pub id: i64,
    pub device_id: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub action: String,
    pub data_before: Option<serde_json::Value>,
    pub data_after: Option<serde_json::Value>,
    pub statut: SyncOutcome,
    pub message: Option<String>,
    pub date_sync: DateTime<Utc>,
}

impl SyncLog {
    // Written inside the item's own transaction so the audit row commits
    // together with the change it describes.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        device_id: &str,
        entity_type: &str,
        entity_id: Option<i64>,
        action: &str,
        data_before: Option<&serde_json::Value>,
        data_after: Option<&serde_json::Value>,
        statut: SyncOutcome,
        message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO sync_logs
                (device_id, entity_type, entity_id, action, data_before, data_after, statut, message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(device_id)
        .bind(entity_type)
        .bind(entity_id)
        .bind(action)
        .bind(data_before)
        .bind(data_after)
        .bind(statut)
        .bind(message)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
