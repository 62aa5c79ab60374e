use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Caissier,
    Coiffeur,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Caissier => "caissier",
            Role::Coiffeur => "coiffeur",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub nom: String,
    pub prenom: String,
    pub email: Option<String>,
    pub telephone: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub role: Role,
    pub actif: bool,
    pub specialite: Option<String>,
    pub commission: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

pub const USER_COLUMNS: &str = "id, nom, prenom, email, telephone, password_hash, role, actif, \
     specialite, commission::FLOAT8 AS commission, created_at, updated_at, deleted_at";

impl User {
    pub fn nom_complet(&self) -> String {
        format!("{} {}", self.prenom, self.nom)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_coiffeur(&self) -> bool {
        self.role == Role::Coiffeur
    }

    // Admin only
    pub fn can_manage_users(&self) -> bool {
        self.is_admin()
    }

    // Admin and manager
    pub fn can_manage_prestations(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Manager)
    }

    // Coiffeurs work offline at the chair, no login account
    pub fn needs_account(&self) -> bool {
        self.role != Role::Coiffeur
    }

    pub async fn find(pool: &sqlx::PgPool, id: i64) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_email(
        pool: &sqlx::PgPool,
        email: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(pool)
        .await
    }
}
