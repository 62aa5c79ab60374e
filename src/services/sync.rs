//! Offline-sync reconciliation.
//!
//! A device uploads a batch of entities it created or updated while offline.
//! Items are applied in fixed dependency order (clients, prestations,
//! passages, paiements) and each item runs in its OWN transaction: a later
//! item's failure never rolls back an earlier one, and everything reported
//! `succes` in the response is already durable. The response enumerates one
//! outcome per item, keyed by the caller's local id, and every item leaves
//! exactly one `sync_logs` row behind — success, failure, or conflict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::errors::ApiError;
use crate::models::paiement::{ModePaiement, StatutPaiement, PAIEMENT_COLUMNS};
use crate::models::prestation::PRESTATION_COLUMNS;
use crate::models::{Client, Paiement, Prestation, SyncLog, SyncOutcome};
use crate::services::{codegen, visits};

/* ---------- batch wire types ---------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntity {
    Clients,
    Prestations,
    Passages,
    Paiements,
}

impl SyncEntity {
    // Foreign-key dependency order
    pub fn apply_order(&self) -> u8 {
        match self {
            SyncEntity::Clients => 0,
            SyncEntity::Prestations => 1,
            SyncEntity::Passages => 2,
            SyncEntity::Paiements => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEntity::Clients => "clients",
            SyncEntity::Prestations => "prestations",
            SyncEntity::Passages => "passages",
            SyncEntity::Paiements => "paiements",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SyncItem {
    /// Device-local identifier echoed back so the caller can reconcile.
    pub local_id: String,
    pub entity: SyncEntity,
    pub action: SyncAction,
    /// Server-assigned id, required for updates.
    pub server_id: Option<i64>,
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct SyncBatchRequest {
    pub device_id: String,
    pub items: Vec<SyncItem>,
}

#[derive(Debug, Serialize)]
pub struct SyncItemResult {
    pub local_id: String,
    pub entity: &'static str,
    pub action: &'static str,
    pub statut: SyncOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Default, Serialize)]
pub struct SyncSummary {
    pub succes: usize,
    pub echecs: usize,
    pub conflits: usize,
}

#[derive(Debug, Serialize)]
pub struct SyncBatchResponse {
    pub results: Vec<SyncItemResult>,
    pub summary: SyncSummary,
}

/* ---------- item payloads ---------- */

#[derive(Debug, Deserialize)]
struct ClientPayload {
    nom: Option<String>,
    prenom: Option<String>,
    telephone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrestationPayload {
    libelle: Option<String>,
    prix: Option<f64>,
    description: Option<String>,
    duree_estimee: Option<i32>,
    specialite: Option<String>,
    actif: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct PassageLignePayload {
    // devices historically send either key
    id: Option<i64>,
    prestation_id: Option<i64>,
    quantite: i32,
    prix_unitaire: Option<f64>,
    coiffeur_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PassagePayload {
    client_id: Option<i64>,
    date_passage: Option<DateTime<Utc>>,
    notes: Option<String>,
    prestations: Option<Vec<PassageLignePayload>>,
    // device-computed loyalty values, audited but recomputed server-side
    #[allow(dead_code)]
    est_gratuit: Option<bool>,
    #[allow(dead_code)]
    montant_total: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PaiementPayload {
    passage_id: Option<i64>,
    montant_paye: Option<f64>,
    mode_paiement: Option<ModePaiement>,
    statut: Option<StatutPaiement>,
    notes: Option<String>,
    date_paiement: Option<DateTime<Utc>>,
}

/* ---------- outcome of one applied item ---------- */

enum Applied {
    Created {
        server_id: i64,
        data_after: Value,
    },
    Updated {
        server_id: i64,
        data_before: Value,
        data_after: Value,
    },
    /// No write happened; the existing row is returned to the device.
    Conflict {
        server_id: i64,
        existing: Value,
        message: String,
    },
}

/* ---------- batch processing ---------- */

pub fn order_items(items: Vec<SyncItem>) -> Vec<SyncItem> {
    let mut items = items;
    // stable: arrival order preserved within an entity group
    items.sort_by_key(|i| i.entity.apply_order());
    items
}

pub async fn process_batch(
    pool: &PgPool,
    config: &Config,
    req: SyncBatchRequest,
) -> Result<SyncBatchResponse, ApiError> {
    if req.device_id.trim().is_empty() {
        return Err(ApiError::Validation("device_id est requis".to_string()));
    }
    if req.items.is_empty() {
        return Err(ApiError::Validation(
            "le lot de synchronisation est vide".to_string(),
        ));
    }
    if req.items.len() > config.sync.max_batch_size {
        return Err(ApiError::Validation(format!(
            "le lot dépasse la taille maximale de {} éléments",
            config.sync.max_batch_size
        )));
    }

    let device_id = req.device_id.clone();
    let items = order_items(req.items);

    let mut results = Vec::with_capacity(items.len());
    let mut summary = SyncSummary::default();

    for item in items {
        let result = process_item(pool, config, &device_id, item).await;
        match result.statut {
            SyncOutcome::Succes => summary.succes += 1,
            SyncOutcome::Echec => summary.echecs += 1,
            SyncOutcome::Conflit => summary.conflits += 1,
        }
        results.push(result);
    }

    info!(
        "synchronisation terminée pour {}: {} réussie(s), {} échouée(s), {} conflit(s)",
        device_id, summary.succes, summary.echecs, summary.conflits
    );

    Ok(SyncBatchResponse { results, summary })
}

/// Applies one item in its own transaction and records its audit row. The
/// audit row for a successful or conflicting item commits with the item; a
/// failed item is rolled back first, then its failure is logged separately
/// so the trail survives the rollback.
async fn process_item(
    pool: &PgPool,
    config: &Config,
    device_id: &str,
    item: SyncItem,
) -> SyncItemResult {
    let entity = item.entity.as_str();
    let action = item.action.as_str();

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            error!("sync: transaction introuvable pour l'item {}: {:?}", item.local_id, e);
            return SyncItemResult {
                local_id: item.local_id,
                entity,
                action,
                statut: SyncOutcome::Echec,
                server_id: None,
                message: Some("erreur de stockage".to_string()),
                data: None,
            };
        }
    };

    match apply_item(&mut tx, config, device_id, &item).await {
        Ok(applied) => {
            let (statut, server_id, data_before, data_after, message) = match &applied {
                Applied::Created { server_id, data_after } => (
                    SyncOutcome::Succes,
                    Some(*server_id),
                    None,
                    Some(data_after.clone()),
                    None,
                ),
                Applied::Updated { server_id, data_before, data_after } => (
                    SyncOutcome::Succes,
                    Some(*server_id),
                    Some(data_before.clone()),
                    Some(data_after.clone()),
                    None,
                ),
                Applied::Conflict { server_id, existing, message } => (
                    SyncOutcome::Conflit,
                    Some(*server_id),
                    Some(existing.clone()),
                    Some(item.data.clone()),
                    Some(message.clone()),
                ),
            };

            let logged = SyncLog::record(
                &mut tx,
                device_id,
                entity,
                server_id,
                action,
                data_before.as_ref(),
                data_after.as_ref(),
                statut,
                message.as_deref(),
            )
            .await;

            if let Err(e) = logged {
                error!("sync: échec d'écriture du journal pour {}: {:?}", item.local_id, e);
            }

            if let Err(e) = tx.commit().await {
                error!("sync: échec du commit pour l'item {}: {:?}", item.local_id, e);
                return SyncItemResult {
                    local_id: item.local_id,
                    entity,
                    action,
                    statut: SyncOutcome::Echec,
                    server_id: None,
                    message: Some("erreur de stockage".to_string()),
                    data: None,
                };
            }

            let data = match &applied {
                Applied::Created { data_after, .. } => Some(data_after.clone()),
                Applied::Updated { data_after, .. } => Some(data_after.clone()),
                Applied::Conflict { existing, .. } => Some(existing.clone()),
            };

            SyncItemResult {
                local_id: item.local_id,
                entity,
                action,
                statut,
                server_id,
                message,
                data,
            }
        }
        Err(e) => {
            warn!(
                "sync: item {} ({} {}) en échec: {}",
                item.local_id, entity, action, e
            );
            let _ = tx.rollback().await;

            let message = e.to_string();
            // durable failure trail, outside the rolled-back transaction
            let logged = sqlx::query(
                r#"
                INSERT INTO sync_logs
                    (device_id, entity_type, entity_id, action, data_after, statut, message)
                VALUES ($1, $2, $3, $4, $5, 'echec', $6)
                "#,
            )
            .bind(device_id)
            .bind(entity)
            .bind(item.server_id)
            .bind(action)
            .bind(&item.data)
            .bind(&message)
            .execute(pool)
            .await;
            if let Err(log_err) = logged {
                error!("sync: échec d'écriture du journal d'échec: {:?}", log_err);
            }

            SyncItemResult {
                local_id: item.local_id,
                entity,
                action,
                statut: SyncOutcome::Echec,
                server_id: item.server_id,
                message: Some(message),
                data: None,
            }
        }
    }
}

async fn apply_item(
    tx: &mut Transaction<'_, Postgres>,
    config: &Config,
    device_id: &str,
    item: &SyncItem,
) -> Result<Applied, ApiError> {
    match (item.entity, item.action) {
        (SyncEntity::Clients, SyncAction::Create) => {
            create_client(tx, device_id, &item.data).await
        }
        (SyncEntity::Clients, SyncAction::Update) => {
            update_client(tx, require_server_id(item)?, &item.data).await
        }
        (SyncEntity::Prestations, SyncAction::Create) => {
            create_prestation(tx, device_id, &item.data).await
        }
        (SyncEntity::Prestations, SyncAction::Update) => {
            update_prestation(tx, require_server_id(item)?, &item.data).await
        }
        (SyncEntity::Passages, SyncAction::Create) => {
            create_passage(tx, config, device_id, &item.data).await
        }
        (SyncEntity::Passages, SyncAction::Update) => {
            update_passage(tx, require_server_id(item)?, &item.data).await
        }
        (SyncEntity::Paiements, SyncAction::Create) => {
            create_paiement(tx, device_id, &item.data).await
        }
        (SyncEntity::Paiements, SyncAction::Update) => {
            update_paiement(tx, require_server_id(item)?, &item.data).await
        }
    }
}

fn require_server_id(item: &SyncItem) -> Result<i64, ApiError> {
    item.server_id.ok_or_else(|| {
        ApiError::Validation("id serveur manquant pour la mise à jour".to_string())
    })
}

fn parse_payload<T: serde::de::DeserializeOwned>(data: &Value) -> Result<T, ApiError> {
    serde_json::from_value(data.clone())
        .map_err(|e| ApiError::Validation(format!("données invalides: {e}")))
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn clean_phone(telephone: Option<String>) -> Option<String> {
    telephone.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

/* ---------- clients ---------- */

async fn create_client(
    tx: &mut Transaction<'_, Postgres>,
    device_id: &str,
    data: &Value,
) -> Result<Applied, ApiError> {
    let payload: ClientPayload = parse_payload(data)?;
    let nom = payload
        .nom
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("le nom est requis".to_string()))?;
    let prenom = payload
        .prenom
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("le prénom est requis".to_string()))?;
    let telephone = clean_phone(payload.telephone);

    // Duplicate phone: hand the existing record back instead of forking it
    if let Some(ref phone) = telephone {
        if let Some(client) = Client::find_by_phone(&mut **tx, phone).await? {
            return Ok(Applied::Conflict {
                server_id: client.id,
                existing: to_json(&client),
                message: "client existant trouvé avec ce téléphone".to_string(),
            });
        }
    }

    let code_client = codegen::next_client_code(tx, Utc::now()).await?;

    let client: Client = sqlx::query_as(
        r#"
        INSERT INTO clients (nom, prenom, telephone, code_client, nombre_passages, device_id, synced_at)
        VALUES ($1, $2, $3, $4, 0, $5, now())
        RETURNING *
        "#,
    )
    .bind(nom.trim())
    .bind(prenom.trim())
    .bind(&telephone)
    .bind(&code_client)
    .bind(device_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(Applied::Created {
        server_id: client.id,
        data_after: to_json(&client),
    })
}

async fn update_client(
    tx: &mut Transaction<'_, Postgres>,
    server_id: i64,
    data: &Value,
) -> Result<Applied, ApiError> {
    let payload: ClientPayload = parse_payload(data)?;

    let before: Option<Client> = sqlx::query_as(
        "SELECT * FROM clients WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(server_id)
    .fetch_optional(&mut **tx)
    .await?;
    let before = before.ok_or_else(|| ApiError::not_found("client", server_id))?;

    let telephone = match payload.telephone {
        Some(t) => clean_phone(Some(t)),
        None => before.telephone.clone(),
    };

    if let Some(ref phone) = telephone {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM clients WHERE telephone = $1 AND id <> $2 AND deleted_at IS NULL)",
        )
        .bind(phone)
        .bind(server_id)
        .fetch_one(&mut **tx)
        .await?;
        if taken {
            return Err(ApiError::Conflict(
                "ce numéro de téléphone est déjà utilisé".to_string(),
            ));
        }
    }

    let after: Client = sqlx::query_as(
        r#"
        UPDATE clients
        SET nom = $1, prenom = $2, telephone = $3, synced_at = now(), updated_at = now()
        WHERE id = $4
        RETURNING *
        "#,
    )
    .bind(payload.nom.as_deref().unwrap_or(&before.nom))
    .bind(payload.prenom.as_deref().unwrap_or(&before.prenom))
    .bind(&telephone)
    .bind(server_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(Applied::Updated {
        server_id,
        data_before: to_json(&before),
        data_after: to_json(&after),
    })
}

/* ---------- prestations ---------- */

async fn create_prestation(
    tx: &mut Transaction<'_, Postgres>,
    device_id: &str,
    data: &Value,
) -> Result<Applied, ApiError> {
    let payload: PrestationPayload = parse_payload(data)?;
    let libelle = payload
        .libelle
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("le libellé est requis".to_string()))?;
    let prix = payload
        .prix
        .filter(|p| *p >= 0.0)
        .ok_or_else(|| ApiError::Validation("le prix est requis".to_string()))?;

    let prestation: Prestation = sqlx::query_as(&format!(
        r#"
        INSERT INTO prestations
            (libelle, prix, description, actif, ordre, duree_estimee, specialite, device_id, synced_at)
        VALUES ($1, $2, $3, TRUE,
                (SELECT COALESCE(MAX(ordre), 0) + 1 FROM prestations),
                $4, $5, $6, now())
        RETURNING {PRESTATION_COLUMNS}
        "#
    ))
    .bind(libelle.trim())
    .bind(prix)
    .bind(&payload.description)
    .bind(payload.duree_estimee)
    .bind(&payload.specialite)
    .bind(device_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(Applied::Created {
        server_id: prestation.id,
        data_after: to_json(&prestation),
    })
}

async fn update_prestation(
    tx: &mut Transaction<'_, Postgres>,
    server_id: i64,
    data: &Value,
) -> Result<Applied, ApiError> {
    let payload: PrestationPayload = parse_payload(data)?;

    let before: Option<Prestation> = sqlx::query_as(&format!(
        "SELECT {PRESTATION_COLUMNS} FROM prestations WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
    ))
    .bind(server_id)
    .fetch_optional(&mut **tx)
    .await?;
    let before = before.ok_or_else(|| ApiError::not_found("prestation", server_id))?;

    let after: Prestation = sqlx::query_as(&format!(
        r#"
        UPDATE prestations
        SET libelle = $1, prix = $2, description = $3, actif = $4, duree_estimee = $5,
            specialite = $6, synced_at = now(), updated_at = now()
        WHERE id = $7
        RETURNING {PRESTATION_COLUMNS}
        "#
    ))
    .bind(payload.libelle.as_deref().unwrap_or(&before.libelle))
    .bind(payload.prix.unwrap_or(before.prix))
    .bind(payload.description.as_deref().or(before.description.as_deref()))
    .bind(payload.actif.unwrap_or(before.actif))
    .bind(payload.duree_estimee.or(before.duree_estimee))
    .bind(payload.specialite.as_deref().or(before.specialite.as_deref()))
    .bind(server_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(Applied::Updated {
        server_id,
        data_before: to_json(&before),
        data_after: to_json(&after),
    })
}

/* ---------- passages ---------- */

async fn create_passage(
    tx: &mut Transaction<'_, Postgres>,
    config: &Config,
    device_id: &str,
    data: &Value,
) -> Result<Applied, ApiError> {
    let payload: PassagePayload = parse_payload(data)?;
    let client_id = payload
        .client_id
        .ok_or_else(|| ApiError::Validation("client_id est requis".to_string()))?;
    let lignes = payload
        .prestations
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::Validation("au moins une prestation est requise".to_string()))?;

    let mut items = Vec::with_capacity(lignes.len());
    for (index, ligne) in lignes.iter().enumerate() {
        let prestation_id = ligne.id.or(ligne.prestation_id).ok_or_else(|| {
            ApiError::Validation(format!(
                "la prestation à l'index {index} doit avoir un champ 'id' ou 'prestation_id'"
            ))
        })?;
        items.push(visits::VisitItem {
            prestation_id,
            quantite: ligne.quantite,
            coiffeur_id: ligne.coiffeur_id,
            prix_applique: ligne.prix_unitaire,
        });
    }

    // Numbering, loyalty flag and the client counter are recomputed by the
    // engine; whatever the device decided offline is kept in the audit row.
    let created = visits::create_visit_in_tx(
        tx,
        &config.loyalty,
        visits::NewVisit {
            client_id,
            items,
            notes: payload.notes,
            date_passage: payload.date_passage,
            device_id: Some(device_id.to_string()),
        },
    )
    .await?;

    let server_id = created.passage.id;
    Ok(Applied::Created {
        server_id,
        data_after: to_json(&created),
    })
}

async fn update_passage(
    tx: &mut Transaction<'_, Postgres>,
    server_id: i64,
    data: &Value,
) -> Result<Applied, ApiError> {
    let payload: PassagePayload = parse_payload(data)?;

    let before: Option<crate::models::Passage> =
        sqlx::query_as("SELECT * FROM passages WHERE id = $1 FOR UPDATE")
            .bind(server_id)
            .fetch_optional(&mut **tx)
            .await?;
    let before = before.ok_or_else(|| ApiError::not_found("passage", server_id))?;

    let after: crate::models::Passage = sqlx::query_as(
        r#"
        UPDATE passages
        SET notes = $1, date_passage = $2, synced_at = now(), updated_at = now()
        WHERE id = $3
        RETURNING *
        "#,
    )
    .bind(payload.notes.as_deref().or(before.notes.as_deref()))
    .bind(payload.date_passage.unwrap_or(before.date_passage))
    .bind(server_id)
    .fetch_one(&mut **tx)
    .await?;

    // Optional full replacement of the service lines, device prices kept
    if let Some(lignes) = payload.prestations {
        sqlx::query("DELETE FROM passage_prestations WHERE passage_id = $1")
            .bind(server_id)
            .execute(&mut **tx)
            .await?;

        for (index, ligne) in lignes.iter().enumerate() {
            let prestation_id = ligne.id.or(ligne.prestation_id).ok_or_else(|| {
                ApiError::Validation(format!(
                    "la prestation à l'index {index} doit avoir un champ 'id' ou 'prestation_id'"
                ))
            })?;
            let prix_catalogue: Option<f64> = sqlx::query_scalar(
                "SELECT prix::FLOAT8 FROM prestations WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(prestation_id)
            .fetch_optional(&mut **tx)
            .await?;
            let prix_catalogue = prix_catalogue.ok_or_else(|| {
                ApiError::Validation(format!("la prestation {prestation_id} n'existe pas"))
            })?;

            sqlx::query(
                r#"
                INSERT INTO passage_prestations
                    (passage_id, prestation_id, prix_applique, quantite, coiffeur_id)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(server_id)
            .bind(prestation_id)
            .bind(ligne.prix_unitaire.unwrap_or(prix_catalogue))
            .bind(ligne.quantite.max(1))
            .bind(ligne.coiffeur_id)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(Applied::Updated {
        server_id,
        data_before: to_json(&before),
        data_after: to_json(&after),
    })
}

/* ---------- paiements ---------- */

async fn create_paiement(
    tx: &mut Transaction<'_, Postgres>,
    device_id: &str,
    data: &Value,
) -> Result<Applied, ApiError> {
    let payload: PaiementPayload = parse_payload(data)?;
    let passage_id = payload
        .passage_id
        .ok_or_else(|| ApiError::Validation("passage_id est requis".to_string()))?;
    let montant_paye = payload
        .montant_paye
        .filter(|m| *m >= 0.0)
        .ok_or_else(|| ApiError::Validation("le montant payé est requis".to_string()))?;
    let mode = payload.mode_paiement.unwrap_or(ModePaiement::Especes);

    let passage: Option<(bool,)> =
        sqlx::query_as("SELECT est_gratuit FROM passages WHERE id = $1")
            .bind(passage_id)
            .fetch_optional(&mut **tx)
            .await?;
    let (est_gratuit,) = passage.ok_or_else(|| ApiError::not_found("passage", passage_id))?;

    let deja_paye: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM paiements WHERE passage_id = $1 AND statut <> 'annule')",
    )
    .bind(passage_id)
    .fetch_one(&mut **tx)
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
    .bind(passage_id)
    .fetch_one(&mut **tx)
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
    .bind(passage_id)
    .bind(montant_total)
    .bind(montant_paye)
    .bind(mode)
    .bind(&payload.notes)
    .bind(payload.date_paiement.unwrap_or_else(Utc::now))
    .bind(&numero_recu)
    .bind(device_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(Applied::Created {
        server_id: paiement.id,
        data_after: to_json(&paiement),
    })
}

async fn update_paiement(
    tx: &mut Transaction<'_, Postgres>,
    server_id: i64,
    data: &Value,
) -> Result<Applied, ApiError> {
    let payload: PaiementPayload = parse_payload(data)?;

    let before: Option<Paiement> = sqlx::query_as(&format!(
        "SELECT {PAIEMENT_COLUMNS} FROM paiements WHERE id = $1 FOR UPDATE"
    ))
    .bind(server_id)
    .fetch_optional(&mut **tx)
    .await?;
    let before = before.ok_or_else(|| ApiError::not_found("paiement", server_id))?;

    // numero_recu is assigned once at creation and never touched again
    let after: Paiement = sqlx::query_as(&format!(
        r#"
        UPDATE paiements
        SET montant_paye = $1, mode_paiement = $2, statut = $3, notes = $4,
            synced_at = now(), updated_at = now()
        WHERE id = $5
        RETURNING {PAIEMENT_COLUMNS}
        "#
    ))
    .bind(payload.montant_paye.unwrap_or(before.montant_paye))
    .bind(payload.mode_paiement.unwrap_or(before.mode_paiement))
    .bind(payload.statut.unwrap_or(before.statut))
    .bind(payload.notes.as_deref().or(before.notes.as_deref()))
    .bind(server_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(Applied::Updated {
        server_id,
        data_before: to_json(&before),
        data_after: to_json(&after),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(local_id: &str, entity: SyncEntity) -> SyncItem {
        SyncItem {
            local_id: local_id.to_string(),
            entity,
            action: SyncAction::Create,
            server_id: None,
            data: json!({}),
        }
    }

    #[test]
    fn items_apply_in_dependency_order() {
        let ordered = order_items(vec![
            item("p1", SyncEntity::Paiements),
            item("v1", SyncEntity::Passages),
            item("c1", SyncEntity::Clients),
            item("s1", SyncEntity::Prestations),
        ]);
        let entities: Vec<&str> = ordered.iter().map(|i| i.entity.as_str()).collect();
        assert_eq!(entities, vec!["clients", "prestations", "passages", "paiements"]);
    }

    #[test]
    fn ordering_is_stable_within_an_entity() {
        let ordered = order_items(vec![
            item("c1", SyncEntity::Clients),
            item("p1", SyncEntity::Paiements),
            item("c2", SyncEntity::Clients),
            item("c3", SyncEntity::Clients),
        ]);
        let locals: Vec<&str> = ordered.iter().map(|i| i.local_id.as_str()).collect();
        assert_eq!(locals, vec!["c1", "c2", "c3", "p1"]);
    }

    #[test]
    fn batch_items_deserialize_from_device_json() {
        let raw = json!({
            "device_id": "tablette-caisse-1",
            "items": [{
                "local_id": "tmp-42",
                "entity": "clients",
                "action": "create",
                "data": { "nom": "Kouassi", "prenom": "Awa", "telephone": "0102030405" }
            }]
        });
        let batch: SyncBatchRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].entity, SyncEntity::Clients);
        assert_eq!(batch.items[0].action, SyncAction::Create);
        assert!(batch.items[0].server_id.is_none());
    }

    #[test]
    fn ligne_payload_accepts_both_id_keys() {
        let with_id: PassageLignePayload =
            serde_json::from_value(json!({ "id": 3, "quantite": 1 })).unwrap();
        assert_eq!(with_id.id.or(with_id.prestation_id), Some(3));

        let with_prestation_id: PassageLignePayload =
            serde_json::from_value(json!({ "prestation_id": 9, "quantite": 2, "prix_unitaire": 1500.0 }))
                .unwrap();
        assert_eq!(
            with_prestation_id.id.or(with_prestation_id.prestation_id),
            Some(9)
        );
    }

    #[test]
    fn phone_cleaning_drops_blanks() {
        assert_eq!(clean_phone(Some("  ".to_string())), None);
        assert_eq!(clean_phone(Some("".to_string())), None);
        assert_eq!(
            clean_phone(Some(" 0102030405 ".to_string())),
            Some("0102030405".to_string())
        );
        assert_eq!(clean_phone(None), None);
    }

    #[test]
    fn phone_cleaning_preserves_realistic_numbers() {
        use fake::faker::phone_number::fr_fr::PhoneNumber;
        use fake::Fake;

        for _ in 0..20 {
            let phone: String = PhoneNumber().fake();
            let cleaned = clean_phone(Some(phone.clone()));
            assert_eq!(cleaned, Some(phone.trim().to_string()));
        }
    }
}
