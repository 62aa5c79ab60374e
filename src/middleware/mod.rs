use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::ApiError;
use crate::models::Role;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub role: Role,
    pub exp: i64,
}

/// The authenticated staff member, resolved per request. Core logic only
/// ever consumes the id and the role.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub role: Role,
    pub nom_complet: String,
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(ApiError::Forbidden("accès non autorisé".to_string()))
        }
    }

    pub fn require_manage_prestations(&self) -> Result<(), ApiError> {
        if matches!(self.role, Role::Admin | Role::Manager) {
            Ok(())
        } else {
            Err(ApiError::Forbidden("accès non autorisé".to_string()))
        }
    }
}

// Row shape for the per-request user lookup
#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    prenom: String,
    nom: String,
    role: Role,
}

// Bearer-token extractor: the token proves identity, the database stays
// authoritative for the role and the active flag.
impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized)?;

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.config.jwt.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| ApiError::Unauthorized)?
        .claims;

        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, prenom, nom, role FROM users
             WHERE id = $1 AND actif AND deleted_at IS NULL",
        )
        .bind(claims.sub)
        .fetch_optional(&state.db.pool)
        .await
        .map_err(ApiError::from)?;

        let user = row.ok_or(ApiError::Unauthorized)?;

        Ok(AuthUser {
            user_id: user.id,
            role: user.role,
            nom_complet: format!("{} {}", user.prenom, user.nom),
        })
    }
}
