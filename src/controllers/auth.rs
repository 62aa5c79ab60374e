use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::errors::{ApiError, ApiResult};
use crate::middleware::{AuthUser, Claims};
use crate::models::User;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
}

#[derive(Debug, Deserialize, Validate)]
struct LoginRequest {
    #[validate(email)]
    email: String,
    #[validate(length(min = 1))]
    password: String,
}

// POST /api/auth/login
async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let user = User::find_by_email(&state.db.pool, &req.email)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    if !user.actif {
        return Err(ApiError::Forbidden("compte désactivé".to_string()));
    }
    if !user.needs_account() {
        return Err(ApiError::Forbidden(
            "les coiffeurs n'ont pas de compte de connexion".to_string(),
        ));
    }

    let hash = user.password_hash.as_deref().ok_or(ApiError::Unauthorized)?;
    let valid = bcrypt::verify(&req.password, hash).unwrap_or(false);
    if !valid {
        return Err(ApiError::Unauthorized);
    }

    let expires_at = Utc::now() + Duration::hours(state.config.jwt.expires_in_hours);
    let claims = Claims {
        sub: user.id,
        role: user.role,
        exp: expires_at.timestamp(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.config.jwt.secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!("échec de signature du jeton: {:?}", e);
        ApiError::Validation("impossible d'émettre le jeton".to_string())
    })?;

    tracing::info!("connexion de l'utilisateur {} ({})", user.id, user.role.as_str());

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": {
                "token": token,
                "token_type": "Bearer",
                "expires_at": expires_at,
                "user": user,
            }
        })),
    ))
}

// GET /api/auth/me
async fn me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let user = User::find(&state.db.pool, auth.user_id)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    Ok((StatusCode::OK, Json(json!({ "success": true, "data": user }))))
}
