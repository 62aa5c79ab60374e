use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "mode_paiement", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ModePaiement {
    Especes,
    MobileMoney,
    Carte,
    Autre,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "statut_paiement", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StatutPaiement {
    EnAttente,
    Valide,
    Annule,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Paiement {
    pub id: i64,
    pub passage_id: i64,
    pub montant_total: f64,
    pub montant_paye: f64,
    pub mode_paiement: ModePaiement,
    pub statut: StatutPaiement,
    pub notes: Option<String>,
    pub date_paiement: DateTime<Utc>,
    pub numero_recu: String,
    pub device_id: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const PAIEMENT_COLUMNS: &str = "id, passage_id, montant_total::FLOAT8 AS montant_total, \
     montant_paye::FLOAT8 AS montant_paye, mode_paiement, statut, notes, date_paiement, \
     numero_recu, device_id, synced_at, created_at, updated_at";

impl Paiement {
    pub async fn find(pool: &sqlx::PgPool, id: i64) -> Result<Option<Paiement>, sqlx::Error> {
        sqlx::query_as::<_, Paiement>(&format!(
            "SELECT {PAIEMENT_COLUMNS} FROM paiements WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub fn montant_restant(&self) -> f64 {
        (self.montant_total - self.montant_paye).max(0.0)
    }
}
