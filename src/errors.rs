use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

// Every failure a handler can surface, mapped to one HTTP status each.
// Validation and not-found are detected before any write; anything that
// fires mid-transaction rolls the whole operation back before reaching here.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("données invalides")]
    ValidationFields(#[from] validator::ValidationErrors),

    #[error("{entity} {id} introuvable")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{0}")]
    Conflict(String),

    #[error("authentification requise")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("épuisement des tentatives de génération de code ({0} essais)")]
    GenerationExhausted(u32),

    #[error("erreur de stockage")]
    Storage(sqlx::Error),
}

impl ApiError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        ApiError::NotFound { entity, id }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::ValidationFields(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::GenerationExhausted(_) | ApiError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        // unique-violation surfaces as a conflict, never as an opaque 500
        if let sqlx::Error::Database(ref db) = e {
            if db.code().as_deref() == Some("23505") {
                return ApiError::Conflict(format!("contrainte d'unicité violée: {}", db.message()));
            }
        }
        ApiError::Storage(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!("request failed: {:?}", self);
        }

        let body = match &self {
            ApiError::ValidationFields(errors) => json!({
                "success": false,
                "message": "données invalides",
                "errors": errors,
            }),
            ApiError::Storage(e) => {
                // the driver error stays in the logs, not in the response
                tracing::error!("storage error: {:?}", e);
                json!({
                    "success": false,
                    "message": "erreur interne du serveur",
                })
            }
            other => json!({
                "success": false,
                "message": other.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            ApiError::Validation("x".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::not_found("client", 7).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("téléphone déjà utilisé".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Forbidden("accès non autorisé".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::GenerationExhausted(1000).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn not_found_names_the_entity() {
        let e = ApiError::not_found("passage", 42);
        assert_eq!(e.to_string(), "passage 42 introuvable");
    }
}
