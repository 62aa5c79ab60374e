use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Prestation {
    pub id: i64,
    pub libelle: String,
    pub prix: f64,
    pub description: Option<String>,
    pub actif: bool,
    pub ordre: i32,
    pub duree_estimee: Option<i32>,
    pub specialite: Option<String>,
    pub device_id: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

// NUMERIC needs the FLOAT8 cast before it can land in an f64 field
pub const PRESTATION_COLUMNS: &str = "id, libelle, prix::FLOAT8 AS prix, description, actif, \
     ordre, duree_estimee, specialite, device_id, synced_at, created_at, updated_at, deleted_at";

impl Prestation {
    pub async fn find(pool: &sqlx::PgPool, id: i64) -> Result<Option<Prestation>, sqlx::Error> {
        sqlx::query_as::<_, Prestation>(&format!(
            "SELECT {PRESTATION_COLUMNS} FROM prestations WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }
}
