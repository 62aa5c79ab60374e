use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::errors::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::user::USER_COLUMNS;
use crate::models::{Role, User};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users", post(create_user))
        .route("/users/coiffeurs/liste", get(liste_coiffeurs))
        .route("/users/{id}", get(show_user))
        .route("/users/{id}", put(update_user))
        .route("/users/{id}", delete(archive_user))
        .route("/users/{id}/toggle-actif", post(toggle_actif))
}

// Default commission for a coiffeur when none is given
const COMMISSION_PAR_DEFAUT: f64 = 30.0;

#[derive(Debug, Deserialize)]
struct ListUsersQuery {
    role: Option<Role>,
    actif: Option<bool>,
    specialite: Option<String>,
}

// GET /api/users (admin)
async fn list_users(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(params): Query<ListUsersQuery>,
) -> ApiResult<impl IntoResponse> {
    auth.require_admin()?;

    let users: Vec<User> = sqlx::query_as(&format!(
        r#"
        SELECT {USER_COLUMNS} FROM users
        WHERE deleted_at IS NULL
          AND ($1::TEXT IS NULL OR role = $1)
          AND ($2::BOOL IS NULL OR actif = $2)
          AND ($3::TEXT IS NULL OR specialite = $3)
        ORDER BY created_at DESC
        "#
    ))
    .bind(params.role)
    .bind(params.actif)
    .bind(&params.specialite)
    .fetch_all(&state.db.pool)
    .await?;

    Ok((StatusCode::OK, Json(json!({ "success": true, "data": users }))))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateUserRequest {
    #[validate(length(min = 1, max = 100))]
    nom: String,
    #[validate(length(min = 1, max = 100))]
    prenom: String,
    #[validate(email)]
    email: Option<String>,
    #[validate(length(max = 20))]
    telephone: Option<String>,
    #[validate(length(min = 8))]
    password: Option<String>,
    role: Role,
    #[validate(length(max = 50))]
    specialite: Option<String>,
    #[validate(range(min = 0.0, max = 100.0))]
    commission: Option<f64>,
}

// POST /api/users (admin)
async fn create_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    auth.require_admin()?;
    req.validate()?;

    // everyone but coiffeurs logs in, so they need credentials
    let needs_account = req.role != Role::Coiffeur;
    if needs_account && (req.email.is_none() || req.password.is_none()) {
        return Err(ApiError::Validation(
            "email et mot de passe sont requis pour ce rôle".to_string(),
        ));
    }

    if let Some(ref email) = req.email {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 AND deleted_at IS NULL)",
        )
        .bind(email)
        .fetch_one(&state.db.pool)
        .await?;
        if taken {
            return Err(ApiError::Conflict("cet email est déjà utilisé".to_string()));
        }
    }

    let password_hash = match &req.password {
        Some(password) => Some(bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| {
            tracing::error!("échec du hachage du mot de passe: {:?}", e);
            ApiError::Validation("mot de passe invalide".to_string())
        })?),
        None => None,
    };

    let commission = if req.role == Role::Coiffeur {
        Some(req.commission.unwrap_or(COMMISSION_PAR_DEFAUT))
    } else {
        req.commission
    };

    let user: User = sqlx::query_as(&format!(
        r#"
        INSERT INTO users (nom, prenom, email, telephone, password_hash, role, actif, specialite, commission)
        VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $8)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(req.nom.trim())
    .bind(req.prenom.trim())
    .bind(&req.email)
    .bind(&req.telephone)
    .bind(&password_hash)
    .bind(req.role)
    .bind(&req.specialite)
    .bind(commission)
    .fetch_one(&state.db.pool)
    .await?;

    tracing::info!("utilisateur {} créé ({})", user.id, user.role.as_str());

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Utilisateur créé avec succès",
            "data": user,
        })),
    ))
}

// GET /api/users/coiffeurs/liste — active coiffeurs for the POS screen
async fn liste_coiffeurs(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let coiffeurs: Vec<User> = sqlx::query_as(&format!(
        "SELECT {USER_COLUMNS} FROM users
         WHERE role = 'coiffeur' AND actif AND deleted_at IS NULL
         ORDER BY prenom, nom"
    ))
    .fetch_all(&state.db.pool)
    .await?;

    Ok((StatusCode::OK, Json(json!({ "success": true, "data": coiffeurs }))))
}

// GET /api/users/{id} (admin, or the user themself)
async fn show_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    if auth.user_id != id {
        auth.require_admin()?;
    }

    let user = User::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("utilisateur", id))?;

    Ok((StatusCode::OK, Json(json!({ "success": true, "data": user }))))
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateUserRequest {
    #[validate(length(min = 1, max = 100))]
    nom: Option<String>,
    #[validate(length(min = 1, max = 100))]
    prenom: Option<String>,
    #[validate(email)]
    email: Option<String>,
    #[validate(length(max = 20))]
    telephone: Option<String>,
    #[validate(length(min = 8))]
    password: Option<String>,
    role: Option<Role>,
    #[validate(length(max = 50))]
    specialite: Option<String>,
    #[validate(range(min = 0.0, max = 100.0))]
    commission: Option<f64>,
}

// PUT /api/users/{id} (admin)
async fn update_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    auth.require_admin()?;
    req.validate()?;

    let user = User::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("utilisateur", id))?;

    if let Some(ref email) = req.email {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 AND id <> $2 AND deleted_at IS NULL)",
        )
        .bind(email)
        .bind(id)
        .fetch_one(&state.db.pool)
        .await?;
        if taken {
            return Err(ApiError::Conflict("cet email est déjà utilisé".to_string()));
        }
    }

    let password_hash = match &req.password {
        Some(password) => Some(bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| {
            tracing::error!("échec du hachage du mot de passe: {:?}", e);
            ApiError::Validation("mot de passe invalide".to_string())
        })?),
        None => user.password_hash.clone(),
    };

    let updated: User = sqlx::query_as(&format!(
        r#"
        UPDATE users
        SET nom = $1, prenom = $2, email = $3, telephone = $4, password_hash = $5,
            role = $6, specialite = $7, commission = $8, updated_at = now()
        WHERE id = $9
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(req.nom.as_deref().map(str::trim).unwrap_or(&user.nom))
    .bind(req.prenom.as_deref().map(str::trim).unwrap_or(&user.prenom))
    .bind(req.email.as_deref().or(user.email.as_deref()))
    .bind(req.telephone.as_deref().or(user.telephone.as_deref()))
    .bind(&password_hash)
    .bind(req.role.unwrap_or(user.role))
    .bind(req.specialite.as_deref().or(user.specialite.as_deref()))
    .bind(req.commission.or(user.commission))
    .bind(id)
    .fetch_one(&state.db.pool)
    .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Utilisateur mis à jour avec succès",
            "data": updated,
        })),
    ))
}

// DELETE /api/users/{id} (admin)
async fn archive_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    auth.require_admin()?;

    if auth.user_id == id {
        return Err(ApiError::Validation(
            "impossible de supprimer son propre compte".to_string(),
        ));
    }

    let archived = sqlx::query(
        "UPDATE users SET deleted_at = now(), actif = FALSE, updated_at = now()
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&state.db.pool)
    .await?;

    if archived.rows_affected() == 0 {
        return Err(ApiError::not_found("utilisateur", id));
    }

    tracing::info!("utilisateur {} archivé", id);

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Utilisateur supprimé avec succès",
        })),
    ))
}

// POST /api/users/{id}/toggle-actif (admin)
async fn toggle_actif(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    auth.require_admin()?;

    let toggled: Option<User> = sqlx::query_as(&format!(
        "UPDATE users SET actif = NOT actif, updated_at = now()
         WHERE id = $1 AND deleted_at IS NULL RETURNING {USER_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await?;

    let user = toggled.ok_or_else(|| ApiError::not_found("utilisateur", id))?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": (if user.actif { "Utilisateur activé" } else { "Utilisateur désactivé" }),
            "data": user,
        })),
    ))
}
