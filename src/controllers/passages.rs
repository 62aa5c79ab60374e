use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use validator::Validate;

use crate::errors::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::models::paiement::PAIEMENT_COLUMNS;
use crate::models::{Client, Paiement, Passage, PassageLigne};
use crate::services::visits;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/passages", get(list_passages))
        .route("/passages", post(create_passage))
        .route("/passages/{id}", get(show_passage))
        .route("/passages/{id}", delete(delete_passage))
        .route("/passages/client/{client_id}", get(par_client))
        .route("/passages/client/{client_id}/check-fidelite", get(check_fidelite))
}

/* ---------- detail assembly ---------- */

#[derive(Debug, Serialize)]
pub struct PassageDetail {
    #[serde(flatten)]
    pub passage: Passage,
    pub lignes: Vec<PassageLigne>,
    pub paiement: Option<Paiement>,
    pub montant_theorique: f64,
    pub montant_total: f64,
}

#[derive(sqlx::FromRow)]
struct LigneRow {
    passage_id: i64,
    prestation_id: i64,
    libelle: String,
    prix_applique: f64,
    quantite: i32,
    coiffeur_id: Option<i64>,
    coiffeur_nom: Option<String>,
}

// One query per relation for the whole page, grouped in memory
pub(crate) async fn assemble_details(
    pool: &sqlx::PgPool,
    passages: Vec<Passage>,
) -> Result<Vec<PassageDetail>, ApiError> {
    if passages.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<i64> = passages.iter().map(|p| p.id).collect();

    let ligne_rows: Vec<LigneRow> = sqlx::query_as(
        r#"
        SELECT pp.passage_id,
               pp.prestation_id,
               p.libelle,
               pp.prix_applique::FLOAT8 AS prix_applique,
               pp.quantite,
               pp.coiffeur_id,
               CASE WHEN u.id IS NULL THEN NULL
                    ELSE u.prenom || ' ' || u.nom END AS coiffeur_nom
        FROM passage_prestations pp
        JOIN prestations p ON p.id = pp.prestation_id
        LEFT JOIN users u ON u.id = pp.coiffeur_id
        WHERE pp.passage_id = ANY($1)
        ORDER BY pp.id
        "#,
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let mut lignes_map: HashMap<i64, Vec<PassageLigne>> = HashMap::new();
    for row in ligne_rows {
        lignes_map.entry(row.passage_id).or_default().push(PassageLigne {
            prestation_id: row.prestation_id,
            libelle: row.libelle,
            prix_applique: row.prix_applique,
            quantite: row.quantite,
            coiffeur_id: row.coiffeur_id,
            coiffeur_nom: row.coiffeur_nom,
        });
    }

    let paiements: Vec<Paiement> = sqlx::query_as(&format!(
        "SELECT {PAIEMENT_COLUMNS} FROM paiements
         WHERE passage_id = ANY($1) AND statut <> 'annule'"
    ))
    .bind(&ids)
    .fetch_all(pool)
    .await?;
    let mut paiement_map: HashMap<i64, Paiement> =
        paiements.into_iter().map(|p| (p.passage_id, p)).collect();

    Ok(passages
        .into_iter()
        .map(|passage| {
            let lignes = lignes_map.remove(&passage.id).unwrap_or_default();
            let montant_theorique = visits::montant_theorique(&lignes);
            let montant_total = visits::montant_total(passage.est_gratuit, &lignes);
            PassageDetail {
                paiement: paiement_map.remove(&passage.id),
                lignes,
                montant_theorique,
                montant_total,
                passage,
            }
        })
        .collect())
}

// `where_sql` only ever receives parsed values, never raw request text
pub(crate) async fn load_passage_page(
    pool: &sqlx::PgPool,
    where_sql: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<PassageDetail>, ApiError> {
    let passages: Vec<Passage> = sqlx::query_as(&format!(
        "SELECT * FROM passages WHERE {where_sql}
         ORDER BY date_passage DESC, id DESC LIMIT {limit} OFFSET {offset}"
    ))
    .fetch_all(pool)
    .await?;
    assemble_details(pool, passages).await
}

/* ---------- handlers ---------- */

#[derive(Debug, Deserialize)]
struct ListPassagesQuery {
    client_id: Option<i64>,
    coiffeur_id: Option<i64>,
    date: Option<String>,
    date_debut: Option<String>,
    date_fin: Option<String>,
    gratuit: Option<bool>,
    page: Option<u32>,
    per_page: Option<u32>,
}

fn parse_date(value: &str, field: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ApiError::Validation(format!("{field} doit être au format AAAA-MM-JJ")))
}

// GET /api/passages
async fn list_passages(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(params): Query<ListPassagesQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;

    let mut conditions: Vec<String> = Vec::new();
    if let Some(client_id) = params.client_id {
        conditions.push(format!("client_id = {client_id}"));
    }
    if let Some(coiffeur_id) = params.coiffeur_id {
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM passage_prestations pp
              WHERE pp.passage_id = passages.id AND pp.coiffeur_id = {coiffeur_id})"
        ));
    }
    if let Some(ref date) = params.date {
        let date = parse_date(date, "date")?;
        conditions.push(format!("date_passage::date = '{date}'"));
    }
    if let (Some(debut), Some(fin)) = (&params.date_debut, &params.date_fin) {
        let debut = parse_date(debut, "date_debut")?;
        let fin = parse_date(fin, "date_fin")?;
        conditions.push(format!("date_passage::date BETWEEN '{debut}' AND '{fin}'"));
    }
    if let Some(gratuit) = params.gratuit {
        conditions.push(format!("est_gratuit = {gratuit}"));
    }

    let where_sql = if conditions.is_empty() {
        "TRUE".to_string()
    } else {
        conditions.join(" AND ")
    };

    let passages =
        load_passage_page(&state.db.pool, &where_sql, per_page as i64, offset as i64).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": passages,
            "page": page,
            "per_page": per_page,
        })),
    ))
}

#[derive(Debug, Deserialize, Serialize, Validate)]
struct PassageItemRequest {
    id: i64,
    #[validate(range(min = 1))]
    quantite: Option<i32>,
    coiffeur_id: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
struct CreatePassageRequest {
    client_id: i64,
    #[validate(length(min = 1), nested)]
    prestations: Vec<PassageItemRequest>,
    notes: Option<String>,
    date_passage: Option<DateTime<Utc>>,
    device_id: Option<String>,
}

// POST /api/passages — the visit engine owns numbering, loyalty and counters
async fn create_passage(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(req): Json<CreatePassageRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let items = req
        .prestations
        .iter()
        .map(|p| visits::VisitItem {
            prestation_id: p.id,
            quantite: p.quantite.unwrap_or(1),
            coiffeur_id: p.coiffeur_id,
            prix_applique: None,
        })
        .collect();

    let created = visits::create_visit(
        &state.db.pool,
        &state.config.loyalty,
        visits::NewVisit {
            client_id: req.client_id,
            items,
            notes: req.notes,
            date_passage: req.date_passage,
            device_id: req.device_id,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Passage créé avec succès",
            "data": {
                "passage": created.passage,
                "lignes": created.lignes,
                "est_gratuit": created.est_gratuit,
                "montant_total": created.montant_total,
                "montant_theorique": created.montant_theorique,
            },
        })),
    ))
}

// GET /api/passages/{id}
async fn show_passage(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let passage = Passage::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("passage", id))?;

    let mut details = assemble_details(&state.db.pool, vec![passage]).await?;
    let detail = details
        .pop()
        .ok_or_else(|| ApiError::not_found("passage", id))?;

    Ok((StatusCode::OK, Json(json!({ "success": true, "data": detail }))))
}

// DELETE /api/passages/{id} — renumbers the client's remaining visits
async fn delete_passage(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let deleted = visits::delete_visit(&state.db.pool, id).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Passage supprimé avec succès",
            "data": deleted,
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct ParClientQuery {
    page: Option<u32>,
    per_page: Option<u32>,
}

// GET /api/passages/client/{client_id}
async fn par_client(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(client_id): Path<i64>,
    Query(params): Query<ParClientQuery>,
) -> ApiResult<impl IntoResponse> {
    Client::find(&state.db.pool, client_id)
        .await?
        .ok_or_else(|| ApiError::not_found("client", client_id))?;

    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;

    let passages = load_passage_page(
        &state.db.pool,
        &format!("client_id = {client_id}"),
        per_page as i64,
        offset as i64,
    )
    .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": passages,
            "page": page,
            "per_page": per_page,
        })),
    ))
}

// GET /api/passages/client/{client_id}/check-fidelite
async fn check_fidelite(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(client_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let client = Client::find(&state.db.pool, client_id)
        .await?
        .ok_or_else(|| ApiError::not_found("client", client_id))?;

    let fidelite = visits::fidelite_status(client.nombre_passages, &state.config.loyalty);

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": {
                "client_id": client.id,
                "nom_complet": client.nom_complet(),
                "nombre_passages_actuel": fidelite.nombre_passages_actuel,
                "prochain_numero": fidelite.prochain_numero,
                "est_gratuit": fidelite.est_gratuit,
                "passages_restants": fidelite.passages_restants,
            },
        })),
    ))
}
