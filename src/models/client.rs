use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub nom: String,
    pub prenom: String,
    pub telephone: Option<String>,
    pub code_client: String,
    pub nombre_passages: i32,
    pub derniere_visite: Option<DateTime<Utc>>,
    pub device_id: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Client {
    pub fn nom_complet(&self) -> String {
        format!("{} {}", self.prenom, self.nom)
    }

    // Archived clients stay out of every lookup
    pub async fn find(pool: &sqlx::PgPool, id: i64) -> Result<Option<Client>, sqlx::Error> {
        sqlx::query_as::<_, Client>(
            "SELECT * FROM clients WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    // generic over the executor so it also runs inside a transaction
    pub async fn find_by_phone<'e, E>(executor: E, telephone: &str) -> Result<Option<Client>, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, Client>(
            "SELECT * FROM clients WHERE telephone = $1 AND deleted_at IS NULL",
        )
        .bind(telephone)
        .fetch_optional(executor)
        .await
    }
}
