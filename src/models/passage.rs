use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Passage {
    pub id: i64,
    pub client_id: i64,
    pub numero_passage: i32,
    pub est_gratuit: bool,
    pub notes: Option<String>,
    pub date_passage: DateTime<Utc>,
    pub device_id: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// One service line of a visit, joined with its label and performer
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PassageLigne {
    pub prestation_id: i64,
    pub libelle: String,
    pub prix_applique: f64,
    pub quantite: i32,
    pub coiffeur_id: Option<i64>,
    pub coiffeur_nom: Option<String>,
}

impl Passage {
    pub async fn find(pool: &sqlx::PgPool, id: i64) -> Result<Option<Passage>, sqlx::Error> {
        sqlx::query_as::<_, Passage>("SELECT * FROM passages WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn lignes(
        pool: &sqlx::PgPool,
        passage_id: i64,
    ) -> Result<Vec<PassageLigne>, sqlx::Error> {
        sqlx::query_as::<_, PassageLigne>(
            r#"
            SELECT pp.prestation_id,
                   p.libelle,
                   pp.prix_applique::FLOAT8 AS prix_applique,
                   pp.quantite,
                   pp.coiffeur_id,
                   CASE WHEN u.id IS NULL THEN NULL
                        ELSE u.prenom || ' ' || u.nom END AS coiffeur_nom
            FROM passage_prestations pp
            JOIN prestations p ON p.id = pp.prestation_id
            LEFT JOIN users u ON u.id = pp.coiffeur_id
            WHERE pp.passage_id = $1
            ORDER BY pp.id
            "#,
        )
        .bind(passage_id)
        .fetch_all(pool)
        .await
    }
}
