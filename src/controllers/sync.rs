use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use axum::extract::Query;
use serde::Deserialize;

use crate::errors::ApiResult;
use crate::middleware::AuthUser;
use crate::models::{SyncLog, SyncOutcome};
use crate::services::sync::{self, SyncBatchRequest};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync/batch", post(batch))
        .route("/sync/status", get(status))
        .route("/sync/logs", get(logs))
}

// POST /api/sync/batch — offline reconciliation, one outcome per item
async fn batch(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(req): Json<SyncBatchRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = sync::process_batch(&state.db.pool, &state.config, req).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": format!(
                "Synchronisation terminée: {} réussie(s), {} échouée(s), {} conflit(s)",
                response.summary.succes, response.summary.echecs, response.summary.conflits
            ),
            "data": response,
        })),
    ))
}

// GET /api/sync/status
async fn status(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let (total_clients, clients_synced_today): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE synced_at::date = CURRENT_DATE)
         FROM clients WHERE deleted_at IS NULL",
    )
    .fetch_one(&state.db.pool)
    .await?;

    let (total_passages, passages_today): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE date_passage::date = CURRENT_DATE) FROM passages",
    )
    .fetch_one(&state.db.pool)
    .await?;

    let last_sync: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT MAX(date_sync) FROM sync_logs")
            .fetch_one(&state.db.pool)
            .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": {
                "total_clients": total_clients,
                "clients_synced_today": clients_synced_today,
                "total_passages": total_passages,
                "passages_today": passages_today,
                "last_sync": last_sync,
            },
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    device_id: Option<String>,
    entity_type: Option<String>,
    statut: Option<SyncOutcome>,
    page: Option<u32>,
    per_page: Option<u32>,
}

// GET /api/sync/logs — audit trail, newest first
async fn logs(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(params): Query<LogsQuery>,
) -> ApiResult<impl IntoResponse> {
    auth.require_admin()?;

    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(50).clamp(1, 200);
    let offset = (page - 1) * per_page;

    let logs: Vec<SyncLog> = sqlx::query_as(&format!(
        r#"
        SELECT * FROM sync_logs
        WHERE ($1::TEXT IS NULL OR device_id = $1)
          AND ($2::TEXT IS NULL OR entity_type = $2)
          AND ($3::statut_sync IS NULL OR statut = $3)
        ORDER BY date_sync DESC, id DESC
        LIMIT {per_page} OFFSET {offset}
        "#
    ))
    .bind(&params.device_id)
    .bind(&params.entity_type)
    .bind(params.statut)
    .fetch_all(&state.db.pool)
    .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": logs,
            "page": page,
            "per_page": per_page,
        })),
    ))
}
