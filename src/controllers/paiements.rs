use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::errors::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::paiement::PAIEMENT_COLUMNS;
use crate::models::{ModePaiement, Paiement, StatutPaiement};
use crate::services::{codegen, receipt};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/paiements", get(list_paiements))
        .route("/paiements", post(create_paiement))
        .route("/paiements/{id}", get(show_paiement))
        .route("/paiements/{id}", put(update_paiement))
        .route("/paiements/{id}", delete(delete_paiement))
        .route("/paiements/{id}/annuler", post(annuler_paiement))
        .route("/paiements/{id}/recu/data", get(donnees_recu))
}

#[derive(Debug, Deserialize)]
struct ListPaiementsQuery {
    date: Option<String>,
    date_debut: Option<String>,
    date_fin: Option<String>,
    statut: Option<StatutPaiement>,
    page: Option<u32>,
    per_page: Option<u32>,
}

// GET /api/paiements
async fn list_paiements(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(params): Query<ListPaiementsQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;

    let parse = |value: &str, field: &str| {
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map_err(|_| ApiError::Validation(format!("{field} doit être au format AAAA-MM-JJ")))
    };

    let mut conditions: Vec<String> = Vec::new();
    if let Some(ref date) = params.date {
        let date = parse(date, "date")?;
        conditions.push(format!("pa.date_paiement::date = '{date}'"));
    }
    if let (Some(debut), Some(fin)) = (&params.date_debut, &params.date_fin) {
        let debut = parse(debut, "date_debut")?;
        let fin = parse(fin, "date_fin")?;
        conditions.push(format!("pa.date_paiement::date BETWEEN '{debut}' AND '{fin}'"));
    }
    if let Some(statut) = params.statut {
        let statut = match statut {
            StatutPaiement::EnAttente => "en_attente",
            StatutPaiement::Valide => "valide",
            StatutPaiement::Annule => "annule",
        };
        conditions.push(format!("pa.statut = '{statut}'"));
    }
    let where_sql = if conditions.is_empty() {
        "TRUE".to_string()
    } else {
        conditions.join(" AND ")
    };

    // flat list item with just enough context for the payments screen
    let rows: Vec<(serde_json::Value,)> = sqlx::query_as(&format!(
        r#"
        SELECT jsonb_build_object(
            'paiement', jsonb_build_object(
                'id', pa.id,
                'passage_id', pa.passage_id,
                'montant_total', pa.montant_total::FLOAT8,
                'montant_paye', pa.montant_paye::FLOAT8,
                'mode_paiement', pa.mode_paiement,
                'statut', pa.statut,
                'notes', pa.notes,
                'date_paiement', pa.date_paiement,
                'numero_recu', pa.numero_recu
            ),
            'numero_passage', p.numero_passage,
            'est_gratuit', p.est_gratuit,
            'client_id', c.id,
            'client_nom_complet', c.prenom || ' ' || c.nom
        )
        FROM paiements pa
        JOIN passages p ON p.id = pa.passage_id
        JOIN clients c ON c.id = p.client_id
        WHERE {where_sql}
        ORDER BY pa.date_paiement DESC
        LIMIT {per_page} OFFSET {offset}
        "#
    ))
    .fetch_all(&state.db.pool)
    .await?;

    let paiements: Vec<serde_json::Value> = rows.into_iter().map(|(v,)| v).collect();

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": paiements,
            "page": page,
            "per_page": per_page,
        })),
    ))
}

#[derive(Debug, Deserialize, Validate)]
struct CreatePaiementRequest {
    passage_id: i64,
    #[validate(range(min = 0.0))]
    montant_paye: f64,
    mode_paiement: ModePaiement,
    notes: Option<String>,
    date_paiement: Option<DateTime<Utc>>,
    device_id: Option<String>,
}

// POST /api/paiements — the receipt number is assigned here, exactly once
async fn create_paiement(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(req): Json<CreatePaiementRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let mut tx = state.db.pool.begin().await?;

    let passage: Option<(bool,)> =
        sqlx::query_as("SELECT est_gratuit FROM passages WHERE id = $1 FOR UPDATE")
            .bind(req.passage_id)
            .fetch_optional(&mut *tx)
            .await?;
    let (est_gratuit,) =
        passage.ok_or_else(|| ApiError::not_found("passage", req.passage_id))?;

    let deja_paye: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM paiements WHERE passage_id = $1 AND statut <> 'annule')",
    )
    .bind(req.passage_id)
    .fetch_one(&mut *tx)
    .await?;
    if deja_paye {
        return Err(ApiError::Conflict(
            "un paiement existe déjà pour ce passage".to_string(),
        ));
    }

    let theorique: f64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(prix_applique * quantite), 0)::FLOAT8
         FROM passage_prestations WHERE passage_id = $1",
    )
    .bind(req.passage_id)
    .fetch_one(&mut *tx)
    .await?;
    let montant_total = if est_gratuit { 0.0 } else { theorique };

    let numero_recu = codegen::next_receipt_number(Utc::now());

    let paiement: Paiement = sqlx::query_as(&format!(
        r#"
        INSERT INTO paiements
            (passage_id, montant_total, montant_paye, mode_paiement, statut, notes,
             date_paiement, numero_recu, device_id, synced_at)
        VALUES ($1, $2, $3, $4, 'valide', $5, $6, $7, $8, now())
        RETURNING {PAIEMENT_COLUMNS}
        "#
    ))
    .bind(req.passage_id)
    .bind(montant_total)
    .bind(req.montant_paye)
    .bind(req.mode_paiement)
    .bind(&req.notes)
    .bind(req.date_paiement.unwrap_or_else(Utc::now))
    .bind(&numero_recu)
    .bind(&req.device_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        "paiement {} enregistré pour passage {} (reçu {})",
        paiement.id,
        req.passage_id,
        paiement.numero_recu
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Paiement enregistré avec succès",
            "data": paiement,
        })),
    ))
}

// GET /api/paiements/{id}
async fn show_paiement(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let paiement = Paiement::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("paiement", id))?;

    Ok((StatusCode::OK, Json(json!({ "success": true, "data": paiement }))))
}

#[derive(Debug, Deserialize, Validate)]
struct UpdatePaiementRequest {
    #[validate(range(min = 0.0))]
    montant_paye: Option<f64>,
    mode_paiement: Option<ModePaiement>,
    statut: Option<StatutPaiement>,
    notes: Option<String>,
    device_id: Option<String>,
}

// PUT /api/paiements/{id} — numero_recu is never regenerated
async fn update_paiement(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdatePaiementRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let paiement = Paiement::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("paiement", id))?;

    let updated: Paiement = sqlx::query_as(&format!(
        r#"
        UPDATE paiements
        SET montant_paye = $1, mode_paiement = $2, statut = $3, notes = $4,
            device_id = COALESCE($5, device_id), synced_at = now(), updated_at = now()
        WHERE id = $6
        RETURNING {PAIEMENT_COLUMNS}
        "#
    ))
    .bind(req.montant_paye.unwrap_or(paiement.montant_paye))
    .bind(req.mode_paiement.unwrap_or(paiement.mode_paiement))
    .bind(req.statut.unwrap_or(paiement.statut))
    .bind(req.notes.as_deref().or(paiement.notes.as_deref()))
    .bind(&req.device_id)
    .bind(id)
    .fetch_one(&state.db.pool)
    .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Paiement mis à jour avec succès",
            "data": updated,
        })),
    ))
}

// POST /api/paiements/{id}/annuler
async fn annuler_paiement(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let paiement = Paiement::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("paiement", id))?;

    if paiement.statut == StatutPaiement::Annule {
        return Err(ApiError::Validation("ce paiement est déjà annulé".to_string()));
    }

    let annule: Paiement = sqlx::query_as(&format!(
        "UPDATE paiements SET statut = 'annule', updated_at = now()
         WHERE id = $1 RETURNING {PAIEMENT_COLUMNS}"
    ))
    .bind(id)
    .fetch_one(&state.db.pool)
    .await?;

    tracing::info!("paiement {} annulé", id);

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Paiement annulé avec succès",
            "data": annule,
        })),
    ))
}

// DELETE /api/paiements/{id}
async fn delete_paiement(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let deleted = sqlx::query("DELETE FROM paiements WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await?;

    if deleted.rows_affected() == 0 {
        return Err(ApiError::not_found("paiement", id));
    }

    tracing::info!("paiement {} supprimé", id);

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Paiement supprimé avec succès",
        })),
    ))
}

// GET /api/paiements/{id}/recu/data — field set consumed by the renderer
async fn donnees_recu(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let data = receipt::donnees_recu(&state.db.pool, &state.config.salon, id).await?;

    Ok((StatusCode::OK, Json(json!({ "success": true, "data": data }))))
}
