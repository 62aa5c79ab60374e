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
use crate::models::prestation::PRESTATION_COLUMNS;
use crate::models::user::USER_COLUMNS;
use crate::models::{Prestation, User};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/prestations", get(list_prestations))
        .route("/prestations", post(create_prestation))
        .route("/prestations/{id}", get(show_prestation))
        .route("/prestations/{id}", put(update_prestation))
        .route("/prestations/{id}", delete(archive_prestation))
        .route("/prestations/{id}/toggle-actif", post(toggle_actif))
        .route("/prestations/{id}/coiffeurs", get(coiffeurs))
        .route("/prestations/{id}/coiffeurs/attach", post(attach_coiffeur))
        .route("/prestations/{id}/coiffeurs/{coiffeur_id}", delete(detach_coiffeur))
}

async fn libelle_taken(
    pool: &sqlx::PgPool,
    libelle: &str,
    except_id: Option<i64>,
) -> sqlx::Result<bool> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM prestations
          WHERE libelle = $1 AND deleted_at IS NULL AND id <> COALESCE($2, 0))",
    )
    .bind(libelle)
    .bind(except_id)
    .fetch_one(pool)
    .await
}

#[derive(Debug, Deserialize)]
struct ListPrestationsQuery {
    actif: Option<bool>,
    specialite: Option<String>,
}

// GET /api/prestations — catalogue order: ordre then libelle
async fn list_prestations(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(params): Query<ListPrestationsQuery>,
) -> ApiResult<impl IntoResponse> {
    let prestations: Vec<Prestation> = sqlx::query_as(&format!(
        r#"
        SELECT {PRESTATION_COLUMNS} FROM prestations
        WHERE deleted_at IS NULL
          AND ($1::BOOL IS NULL OR actif = $1)
          AND ($2::TEXT IS NULL OR specialite = $2)
        ORDER BY ordre, libelle
        "#
    ))
    .bind(params.actif)
    .bind(&params.specialite)
    .fetch_all(&state.db.pool)
    .await?;

    Ok((StatusCode::OK, Json(json!({ "success": true, "data": prestations }))))
}

#[derive(Debug, Deserialize, Validate)]
struct CreatePrestationRequest {
    #[validate(length(min = 1, max = 100))]
    libelle: String,
    #[validate(range(min = 0.0))]
    prix: f64,
    description: Option<String>,
    #[validate(range(min = 1))]
    duree_estimee: Option<i32>,
    #[validate(length(max = 50))]
    specialite: Option<String>,
    ordre: Option<i32>,
    device_id: Option<String>,
}

// POST /api/prestations
async fn create_prestation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreatePrestationRequest>,
) -> ApiResult<impl IntoResponse> {
    auth.require_manage_prestations()?;
    req.validate()?;

    let libelle = req.libelle.trim().to_string();
    if libelle_taken(&state.db.pool, &libelle, None).await? {
        return Err(ApiError::Conflict("ce libellé est déjà utilisé".to_string()));
    }

    let prestation: Prestation = sqlx::query_as(&format!(
        r#"
        INSERT INTO prestations
            (libelle, prix, description, actif, ordre, duree_estimee, specialite, device_id, synced_at)
        VALUES ($1, $2, $3, TRUE,
                COALESCE($4, (SELECT COALESCE(MAX(ordre), 0) + 1 FROM prestations)),
                $5, $6, $7, now())
        RETURNING {PRESTATION_COLUMNS}
        "#
    ))
    .bind(&libelle)
    .bind(req.prix)
    .bind(&req.description)
    .bind(req.ordre)
    .bind(req.duree_estimee)
    .bind(&req.specialite)
    .bind(&req.device_id)
    .fetch_one(&state.db.pool)
    .await?;

    tracing::info!("prestation {} créée: {}", prestation.id, prestation.libelle);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Prestation créée avec succès",
            "data": prestation,
        })),
    ))
}

// GET /api/prestations/{id}
async fn show_prestation(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let prestation = Prestation::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("prestation", id))?;

    let coiffeurs = coiffeurs_of(&state.db.pool, id).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": { "prestation": prestation, "coiffeurs": coiffeurs },
        })),
    ))
}

#[derive(Debug, Deserialize, Validate)]
struct UpdatePrestationRequest {
    #[validate(length(min = 1, max = 100))]
    libelle: Option<String>,
    #[validate(range(min = 0.0))]
    prix: Option<f64>,
    description: Option<String>,
    actif: Option<bool>,
    #[validate(range(min = 1))]
    duree_estimee: Option<i32>,
    #[validate(length(max = 50))]
    specialite: Option<String>,
    ordre: Option<i32>,
}

// PUT /api/prestations/{id} — prices already snapshotted on past visits
// are untouched by a price change here
async fn update_prestation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdatePrestationRequest>,
) -> ApiResult<impl IntoResponse> {
    auth.require_manage_prestations()?;
    req.validate()?;

    let prestation = Prestation::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("prestation", id))?;

    let libelle = req
        .libelle
        .as_deref()
        .map(str::trim)
        .map(str::to_string)
        .unwrap_or_else(|| prestation.libelle.clone());
    if libelle_taken(&state.db.pool, &libelle, Some(id)).await? {
        return Err(ApiError::Conflict("ce libellé est déjà utilisé".to_string()));
    }

    let updated: Prestation = sqlx::query_as(&format!(
        r#"
        UPDATE prestations
        SET libelle = $1, prix = $2, description = $3, actif = $4, ordre = $5,
            duree_estimee = $6, specialite = $7, synced_at = now(), updated_at = now()
        WHERE id = $8
        RETURNING {PRESTATION_COLUMNS}
        "#
    ))
    .bind(&libelle)
    .bind(req.prix.unwrap_or(prestation.prix))
    .bind(req.description.as_deref().or(prestation.description.as_deref()))
    .bind(req.actif.unwrap_or(prestation.actif))
    .bind(req.ordre.unwrap_or(prestation.ordre))
    .bind(req.duree_estimee.or(prestation.duree_estimee))
    .bind(req.specialite.as_deref().or(prestation.specialite.as_deref()))
    .bind(id)
    .fetch_one(&state.db.pool)
    .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Prestation mise à jour avec succès",
            "data": updated,
        })),
    ))
}

// DELETE /api/prestations/{id} — archive; past visits keep their snapshots
async fn archive_prestation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    auth.require_manage_prestations()?;

    let archived = sqlx::query(
        "UPDATE prestations SET deleted_at = now(), updated_at = now()
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&state.db.pool)
    .await?;

    if archived.rows_affected() == 0 {
        return Err(ApiError::not_found("prestation", id));
    }

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Prestation supprimée avec succès",
        })),
    ))
}

// POST /api/prestations/{id}/toggle-actif
async fn toggle_actif(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    auth.require_manage_prestations()?;

    let toggled: Option<Prestation> = sqlx::query_as(&format!(
        "UPDATE prestations SET actif = NOT actif, updated_at = now()
         WHERE id = $1 AND deleted_at IS NULL RETURNING {PRESTATION_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await?;

    let prestation = toggled.ok_or_else(|| ApiError::not_found("prestation", id))?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": (if prestation.actif { "Prestation activée" } else { "Prestation désactivée" }),
            "data": prestation,
        })),
    ))
}

/* ---------- coiffeur associations ---------- */

async fn coiffeurs_of(pool: &sqlx::PgPool, prestation_id: i64) -> Result<Vec<User>, ApiError> {
    let coiffeurs: Vec<User> = sqlx::query_as(&format!(
        r#"
        SELECT {USER_COLUMNS} FROM users
        WHERE deleted_at IS NULL AND role = 'coiffeur' AND actif
          AND id IN (SELECT coiffeur_id FROM prestation_coiffeurs WHERE prestation_id = $1)
        ORDER BY prenom, nom
        "#
    ))
    .bind(prestation_id)
    .fetch_all(pool)
    .await?;
    Ok(coiffeurs)
}

// GET /api/prestations/{id}/coiffeurs
async fn coiffeurs(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Prestation::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("prestation", id))?;

    let coiffeurs = coiffeurs_of(&state.db.pool, id).await?;

    Ok((StatusCode::OK, Json(json!({ "success": true, "data": coiffeurs }))))
}

#[derive(Debug, Deserialize)]
struct AttachCoiffeurRequest {
    coiffeur_id: i64,
}

// POST /api/prestations/{id}/coiffeurs/attach
async fn attach_coiffeur(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<AttachCoiffeurRequest>,
) -> ApiResult<impl IntoResponse> {
    auth.require_manage_prestations()?;

    Prestation::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("prestation", id))?;

    let est_coiffeur: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM users
          WHERE id = $1 AND role = 'coiffeur' AND deleted_at IS NULL)",
    )
    .bind(req.coiffeur_id)
    .fetch_one(&state.db.pool)
    .await?;
    if !est_coiffeur {
        return Err(ApiError::Validation(
            "l'utilisateur spécifié n'est pas un coiffeur".to_string(),
        ));
    }

    sqlx::query(
        "INSERT INTO prestation_coiffeurs (prestation_id, coiffeur_id)
         VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(id)
    .bind(req.coiffeur_id)
    .execute(&state.db.pool)
    .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Coiffeur associé à la prestation",
        })),
    ))
}

// DELETE /api/prestations/{id}/coiffeurs/{coiffeur_id}
async fn detach_coiffeur(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((id, coiffeur_id)): Path<(i64, i64)>,
) -> ApiResult<impl IntoResponse> {
    auth.require_manage_prestations()?;

    let detached = sqlx::query(
        "DELETE FROM prestation_coiffeurs WHERE prestation_id = $1 AND coiffeur_id = $2",
    )
    .bind(id)
    .bind(coiffeur_id)
    .execute(&state.db.pool)
    .await?;

    if detached.rows_affected() == 0 {
        return Err(ApiError::Validation(
            "ce coiffeur n'est pas associé à cette prestation".to_string(),
        ));
    }

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Coiffeur détaché de la prestation",
        })),
    ))
}
