use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::errors::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::Client;
use crate::services::{codegen, visits};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/clients", get(list_clients))
        .route("/clients", post(create_client))
        .route("/clients/generate-code", get(generate_code))
        .route("/clients/search/{phone}", get(search_by_phone))
        .route("/clients/{id}", get(show_client))
        .route("/clients/{id}", put(update_client))
        .route("/clients/{id}", delete(archive_client))
        .route("/clients/{id}/historique", get(historique))
}

/* ---------- helpers ---------- */

fn clean_phone(telephone: Option<String>) -> Option<String> {
    telephone
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

async fn phone_taken(
    pool: &sqlx::PgPool,
    telephone: &str,
    except_id: Option<i64>,
) -> sqlx::Result<bool> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM clients
          WHERE telephone = $1 AND deleted_at IS NULL AND id <> COALESCE($2, 0))",
    )
    .bind(telephone)
    .bind(except_id)
    .fetch_one(pool)
    .await
}

/* ---------- CRUD ---------- */

#[derive(Debug, Deserialize)]
struct ListClientsQuery {
    search: Option<String>,
    sort_by: Option<String>,
    sort_order: Option<String>,
    page: Option<u32>,
    per_page: Option<u32>,
}

// GET /api/clients
async fn list_clients(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(params): Query<ListClientsQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(15).clamp(1, 100);
    let offset = (page - 1) * per_page;

    // whitelist, anything else falls back to created_at
    let sort_by = match params.sort_by.as_deref() {
        Some("nom") => "nom",
        Some("prenom") => "prenom",
        Some("code_client") => "code_client",
        Some("nombre_passages") => "nombre_passages",
        Some("derniere_visite") => "derniere_visite",
        _ => "created_at",
    };
    let sort_order = match params.sort_order.as_deref() {
        Some("asc") => "ASC",
        _ => "DESC",
    };

    let search = params.search.as_deref().unwrap_or("").trim().to_string();
    let pattern = format!("%{search}%");

    let mut where_clause = String::from("deleted_at IS NULL");
    if !search.is_empty() {
        where_clause.push_str(
            " AND (nom ILIKE $1 OR prenom ILIKE $1 OR telephone ILIKE $1
               OR code_client ILIKE $1 OR (prenom || ' ' || nom) ILIKE $1)",
        );
    }

    let (total, clients) = if search.is_empty() {
        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM clients WHERE {where_clause}"))
                .fetch_one(&state.db.pool)
                .await?;
        let clients: Vec<Client> = sqlx::query_as(&format!(
            "SELECT * FROM clients WHERE {where_clause}
             ORDER BY {sort_by} {sort_order} LIMIT {per_page} OFFSET {offset}"
        ))
        .fetch_all(&state.db.pool)
        .await?;
        (total, clients)
    } else {
        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM clients WHERE {where_clause}"))
                .bind(&pattern)
                .fetch_one(&state.db.pool)
                .await?;
        let clients: Vec<Client> = sqlx::query_as(&format!(
            "SELECT * FROM clients WHERE {where_clause}
             ORDER BY {sort_by} {sort_order} LIMIT {per_page} OFFSET {offset}"
        ))
        .bind(&pattern)
        .fetch_all(&state.db.pool)
        .await?;
        (total, clients)
    };

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": clients,
            "page": page,
            "per_page": per_page,
            "total": total,
        })),
    ))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateClientRequest {
    #[validate(length(min = 1, max = 100))]
    nom: String,
    #[validate(length(min = 1, max = 100))]
    prenom: String,
    #[validate(length(max = 20))]
    telephone: Option<String>,
    #[validate(length(max = 20))]
    code_client: Option<String>,
    device_id: Option<String>,
}

// POST /api/clients
async fn create_client(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(req): Json<CreateClientRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let telephone = clean_phone(req.telephone.clone());
    if let Some(ref phone) = telephone {
        if phone_taken(&state.db.pool, phone, None).await? {
            return Err(ApiError::Conflict(
                "ce numéro de téléphone est déjà utilisé".to_string(),
            ));
        }
    }

    // Generation and insertion share one transaction so two concurrent
    // creations cannot end up with the same code.
    let mut tx = state.db.pool.begin().await?;

    let code_client = match req.code_client.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => {
            if codegen::parse_client_code(code).is_none() {
                return Err(ApiError::Validation(
                    "le code client doit suivre le format C###-AA".to_string(),
                ));
            }
            let taken: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM clients WHERE code_client = $1)")
                    .bind(code)
                    .fetch_one(&mut *tx)
                    .await?;
            if taken {
                return Err(ApiError::Conflict("ce code client est déjà utilisé".to_string()));
            }
            code.to_string()
        }
        None => codegen::next_client_code(&mut tx, Utc::now()).await?,
    };

    let client: Client = sqlx::query_as(
        r#"
        INSERT INTO clients (nom, prenom, telephone, code_client, nombre_passages, device_id, synced_at)
        VALUES ($1, $2, $3, $4, 0, $5, now())
        RETURNING *
        "#,
    )
    .bind(req.nom.trim())
    .bind(req.prenom.trim())
    .bind(&telephone)
    .bind(&code_client)
    .bind(&req.device_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!("client {} créé avec le code {}", client.id, client.code_client);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Client créé avec succès",
            "data": client,
        })),
    ))
}

// GET /api/clients/generate-code — preview only, nothing is reserved
async fn generate_code(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let mut tx = state.db.pool.begin().await?;
    let code_client = codegen::next_client_code(&mut tx, Utc::now()).await?;
    tx.rollback().await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": { "code_client": code_client },
        })),
    ))
}

// GET /api/clients/search/{phone}
async fn search_by_phone(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(phone): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let clients: Vec<Client> = sqlx::query_as(
        "SELECT * FROM clients WHERE telephone LIKE $1 AND deleted_at IS NULL ORDER BY nom, prenom",
    )
    .bind(format!("%{}%", phone.trim()))
    .fetch_all(&state.db.pool)
    .await?;

    Ok((StatusCode::OK, Json(json!({ "success": true, "data": clients }))))
}

// GET /api/clients/{id}
async fn show_client(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let client = Client::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("client", id))?;

    let chiffre_affaires: f64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(pa.montant_paye), 0)::FLOAT8
        FROM paiements pa
        JOIN passages p ON p.id = pa.passage_id
        WHERE p.client_id = $1 AND pa.statut <> 'annule'
        "#,
    )
    .bind(id)
    .fetch_one(&state.db.pool)
    .await?;

    let fidelite = visits::fidelite_status(client.nombre_passages, &state.config.loyalty);

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": {
                "client": client,
                "statistiques": {
                    "nombre_passages": client.nombre_passages,
                    "chiffre_affaires_total": chiffre_affaires,
                    "derniere_visite": client.derniere_visite,
                    "prochain_passage_gratuit": fidelite.passages_restants,
                },
            },
        })),
    ))
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateClientRequest {
    #[validate(length(min = 1, max = 100))]
    nom: Option<String>,
    #[validate(length(min = 1, max = 100))]
    prenom: Option<String>,
    #[validate(length(max = 20))]
    telephone: Option<String>,
    #[validate(length(max = 20))]
    code_client: Option<String>,
    device_id: Option<String>,
}

// PUT /api/clients/{id}
async fn update_client(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateClientRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let client = Client::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("client", id))?;

    let telephone = match req.telephone {
        Some(t) => clean_phone(Some(t)),
        None => client.telephone.clone(),
    };
    if let Some(ref phone) = telephone {
        if phone_taken(&state.db.pool, phone, Some(id)).await? {
            return Err(ApiError::Conflict(
                "ce numéro de téléphone est déjà utilisé".to_string(),
            ));
        }
    }

    let code_client = match req.code_client.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => {
            if codegen::parse_client_code(code).is_none() {
                return Err(ApiError::Validation(
                    "le code client doit suivre le format C###-AA".to_string(),
                ));
            }
            let taken: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM clients WHERE code_client = $1 AND id <> $2)",
            )
            .bind(code)
            .bind(id)
            .fetch_one(&state.db.pool)
            .await?;
            if taken {
                return Err(ApiError::Conflict("ce code client est déjà utilisé".to_string()));
            }
            code.to_string()
        }
        None => client.code_client.clone(),
    };

    let updated: Client = sqlx::query_as(
        r#"
        UPDATE clients
        SET nom = $1, prenom = $2, telephone = $3, code_client = $4,
            device_id = COALESCE($5, device_id), synced_at = now(), updated_at = now()
        WHERE id = $6
        RETURNING *
        "#,
    )
    .bind(req.nom.as_deref().map(str::trim).unwrap_or(&client.nom))
    .bind(req.prenom.as_deref().map(str::trim).unwrap_or(&client.prenom))
    .bind(&telephone)
    .bind(&code_client)
    .bind(&req.device_id)
    .bind(id)
    .fetch_one(&state.db.pool)
    .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Client mis à jour avec succès",
            "data": updated,
        })),
    ))
}

// DELETE /api/clients/{id} — archive; the record and its history stay on file
async fn archive_client(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let archived = sqlx::query(
        "UPDATE clients SET deleted_at = now(), updated_at = now()
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(&state.db.pool)
    .await?;

    if archived.rows_affected() == 0 {
        return Err(ApiError::not_found("client", id));
    }

    tracing::info!("client {} archivé", id);

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Client supprimé avec succès",
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct HistoriqueQuery {
    page: Option<u32>,
    per_page: Option<u32>,
}

// GET /api/clients/{id}/historique
async fn historique(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<i64>,
    Query(params): Query<HistoriqueQuery>,
) -> ApiResult<impl IntoResponse> {
    let client = Client::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("client", id))?;

    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;

    let passages = super::passages::load_passage_page(
        &state.db.pool,
        &format!("client_id = {id}"),
        per_page as i64,
        offset as i64,
    )
    .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": {
                "client": client,
                "passages": passages,
                "page": page,
                "per_page": per_page,
            },
        })),
    ))
}
