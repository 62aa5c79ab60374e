//! Loyalty & visit engine.
//!
//! This module is the only code path that writes `passages` rows or the
//! `clients.nombre_passages` counter — both the REST handlers and the sync
//! reconciliation go through it, which is what keeps the denormalized count
//! equal to the number of stored visits.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;

use crate::config::LoyaltyConfig;
use crate::errors::ApiError;
use crate::models::{Passage, PassageLigne};

/// One requested service line for a new visit.
#[derive(Debug, Clone)]
pub struct VisitItem {
    pub prestation_id: i64,
    pub quantite: i32,
    pub coiffeur_id: Option<i64>,
    /// Price override for offline-created visits (the device snapshotted the
    /// price at sale time). `None` snapshots the current catalogue price.
    pub prix_applique: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NewVisit {
    pub client_id: i64,
    pub items: Vec<VisitItem>,
    pub notes: Option<String>,
    pub date_passage: Option<DateTime<Utc>>,
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VisitCreated {
    pub passage: Passage,
    pub lignes: Vec<PassageLigne>,
    pub est_gratuit: bool,
    pub montant_total: f64,
    pub montant_theorique: f64,
}

#[derive(Debug, Serialize)]
pub struct VisitDeleted {
    pub client_id: i64,
    pub numero_passage_supprime: i32,
    pub nouveau_nombre_passages: i32,
    pub passages_renumerotes: usize,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct FideliteStatus {
    pub nombre_passages_actuel: i32,
    pub prochain_numero: i32,
    pub est_gratuit: bool,
    pub passages_restants: u32,
}

/* ---------- pure rules ---------- */

/// The Nth visit is free when N is a multiple of the loyalty interval.
pub fn visit_is_free(numero: i32, loyalty: &LoyaltyConfig) -> bool {
    loyalty.enabled && loyalty.free_interval > 0 && numero % loyalty.free_interval as i32 == 0
}

pub fn montant_theorique(lignes: &[PassageLigne]) -> f64 {
    lignes
        .iter()
        .map(|l| l.prix_applique * l.quantite as f64)
        .sum()
}

pub fn montant_total(est_gratuit: bool, lignes: &[PassageLigne]) -> f64 {
    if est_gratuit {
        0.0
    } else {
        montant_theorique(lignes)
    }
}

/// Free-visit outlook for a client's NEXT visit. Read-only.
pub fn fidelite_status(nombre_passages: i32, loyalty: &LoyaltyConfig) -> FideliteStatus {
    let prochain = nombre_passages + 1;
    let gratuit = visit_is_free(prochain, loyalty);
    let restants = if gratuit || loyalty.free_interval == 0 || !loyalty.enabled {
        0
    } else {
        loyalty.free_interval - (prochain as u32 % loyalty.free_interval)
    };
    FideliteStatus {
        nombre_passages_actuel: nombre_passages,
        prochain_numero: prochain,
        est_gratuit: gratuit,
        passages_restants: restants,
    }
}

/// Dense renumbering of the remaining visits in (date, id) order.
pub fn renumber_in_date_order(mut remaining: Vec<(i64, DateTime<Utc>)>) -> Vec<(i64, i32)> {
    remaining.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
    remaining
        .into_iter()
        .enumerate()
        .map(|(i, (id, _))| (id, i as i32 + 1))
        .collect()
}

/* ---------- transactional operations ---------- */

/// Creates a visit: next sequential number, loyalty flag, one join row per
/// service with its price snapshot, counter + last-visit update. One
/// transaction; any failure leaves the client untouched.
pub async fn create_visit(
    pool: &PgPool,
    loyalty: &LoyaltyConfig,
    req: NewVisit,
) -> Result<VisitCreated, ApiError> {
    let mut tx = pool.begin().await?;
    let created = create_visit_in_tx(&mut tx, loyalty, req).await?;
    tx.commit().await?;

    info!(
        "passage {} créé pour client {} (numéro {}, gratuit: {})",
        created.passage.id,
        created.passage.client_id,
        created.passage.numero_passage,
        created.est_gratuit
    );
    Ok(created)
}

/// Same engine, caller-owned transaction — the sync reconciliation runs each
/// batch item in its own unit of work and commits (or rolls back) itself.
pub async fn create_visit_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    loyalty: &LoyaltyConfig,
    req: NewVisit,
) -> Result<VisitCreated, ApiError> {
    if req.items.is_empty() {
        return Err(ApiError::Validation(
            "au moins une prestation est requise".to_string(),
        ));
    }
    for item in &req.items {
        if item.quantite < 1 {
            return Err(ApiError::Validation(
                "la quantité doit être supérieure ou égale à 1".to_string(),
            ));
        }
    }

    // The row lock serializes numbering for this client across requests
    let client: Option<(i32,)> = sqlx::query_as(
        "SELECT nombre_passages FROM clients WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(req.client_id)
    .fetch_optional(&mut **tx)
    .await?;

    let nombre_passages = match client {
        Some((n,)) => n,
        None => return Err(ApiError::not_found("client", req.client_id)),
    };

    let numero_passage = nombre_passages + 1;
    let est_gratuit = visit_is_free(numero_passage, loyalty);
    let date_passage = req.date_passage.unwrap_or_else(Utc::now);

    let passage: Passage = sqlx::query_as(
        r#"
        INSERT INTO passages
            (client_id, numero_passage, est_gratuit, notes, date_passage, device_id, synced_at)
        VALUES ($1, $2, $3, $4, $5, $6, now())
        RETURNING *
        "#,
    )
    .bind(req.client_id)
    .bind(numero_passage)
    .bind(est_gratuit)
    .bind(&req.notes)
    .bind(date_passage)
    .bind(&req.device_id)
    .fetch_one(&mut **tx)
    .await?;

    let mut lignes = Vec::with_capacity(req.items.len());
    for item in &req.items {
        let prestation: Option<(String, f64)> = sqlx::query_as(
            "SELECT libelle, prix::FLOAT8 FROM prestations WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(item.prestation_id)
        .fetch_optional(&mut **tx)
        .await?;

        let (libelle, prix_catalogue) = match prestation {
            Some(p) => p,
            None => {
                return Err(ApiError::Validation(format!(
                    "la prestation {} n'existe pas",
                    item.prestation_id
                )))
            }
        };

        // Performer must be an active coiffeur
        let coiffeur_nom = match item.coiffeur_id {
            Some(coiffeur_id) => {
                let coiffeur: Option<(String, String)> = sqlx::query_as(
                    r#"
                    SELECT prenom, nom FROM users
                    WHERE id = $1 AND role = 'coiffeur' AND actif AND deleted_at IS NULL
                    "#,
                )
                .bind(coiffeur_id)
                .fetch_optional(&mut **tx)
                .await?;
                match coiffeur {
                    Some((prenom, nom)) => Some(format!("{prenom} {nom}")),
                    None => {
                        return Err(ApiError::Validation(
                            "l'utilisateur spécifié n'est pas un coiffeur".to_string(),
                        ))
                    }
                }
            }
            None => None,
        };

        let prix_applique = item.prix_applique.unwrap_or(prix_catalogue);

        sqlx::query(
            r#"
            INSERT INTO passage_prestations
                (passage_id, prestation_id, prix_applique, quantite, coiffeur_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(passage.id)
        .bind(item.prestation_id)
        .bind(prix_applique)
        .bind(item.quantite)
        .bind(item.coiffeur_id)
        .execute(&mut **tx)
        .await?;

        lignes.push(PassageLigne {
            prestation_id: item.prestation_id,
            libelle,
            prix_applique,
            quantite: item.quantite,
            coiffeur_id: item.coiffeur_id,
            coiffeur_nom,
        });
    }

    sqlx::query(
        r#"
        UPDATE clients
        SET nombre_passages = $1, derniere_visite = $2, updated_at = now()
        WHERE id = $3
        "#,
    )
    .bind(numero_passage)
    .bind(date_passage)
    .bind(req.client_id)
    .execute(&mut **tx)
    .await?;

    let theorique = montant_theorique(&lignes);
    Ok(VisitCreated {
        montant_total: if est_gratuit { 0.0 } else { theorique },
        montant_theorique: theorique,
        est_gratuit,
        passage,
        lignes,
    })
}

/// Deletes a visit and restores the per-client invariants: remaining visits
/// are renumbered densely in chronological order and the counter is set to
/// the new count. Join rows and the payment disappear with the passage via
/// the FK cascade. `est_gratuit` is intentionally NOT re-derived for the
/// shifted numbers: a free visit already granted stays granted.
pub async fn delete_visit(pool: &PgPool, passage_id: i64) -> Result<VisitDeleted, ApiError> {
    let mut tx = pool.begin().await?;

    let passage: Option<(i64, i32)> =
        sqlx::query_as("SELECT client_id, numero_passage FROM passages WHERE id = $1")
            .bind(passage_id)
            .fetch_optional(&mut *tx)
            .await?;

    let (client_id, numero_supprime) = match passage {
        Some(p) => p,
        None => return Err(ApiError::not_found("passage", passage_id)),
    };

    // Same lock order as create_visit: client row first, then its passages
    sqlx::query("SELECT id FROM clients WHERE id = $1 FOR UPDATE")
        .bind(client_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM passages WHERE id = $1")
        .bind(passage_id)
        .execute(&mut *tx)
        .await?;

    let remaining: Vec<(i64, DateTime<Utc>)> = sqlx::query_as(
        "SELECT id, date_passage FROM passages WHERE client_id = $1 ORDER BY date_passage ASC, id ASC",
    )
    .bind(client_id)
    .fetch_all(&mut *tx)
    .await?;

    let renumbered = renumber_in_date_order(remaining);
    let nouveau_count = renumbered.len() as i32;

    for (id, numero) in &renumbered {
        sqlx::query("UPDATE passages SET numero_passage = $1, updated_at = now() WHERE id = $2")
            .bind(numero)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("UPDATE clients SET nombre_passages = $1, updated_at = now() WHERE id = $2")
        .bind(nouveau_count)
        .bind(client_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(
        "passage {} supprimé (numéro {}), {} passages renumérotés pour client {}",
        passage_id, numero_supprime, nouveau_count, client_id
    );

    Ok(VisitDeleted {
        client_id,
        numero_passage_supprime: numero_supprime,
        nouveau_nombre_passages: nouveau_count,
        passages_renumerotes: renumbered.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn loyalty(interval: u32) -> LoyaltyConfig {
        LoyaltyConfig {
            free_interval: interval,
            enabled: true,
        }
    }

    fn ligne(prix: f64, quantite: i32) -> PassageLigne {
        PassageLigne {
            prestation_id: 1,
            libelle: "Coupe homme".to_string(),
            prix_applique: prix,
            quantite,
            coiffeur_id: None,
            coiffeur_nom: None,
        }
    }

    #[test]
    fn every_tenth_visit_is_free() {
        let l = loyalty(10);
        for numero in 1..=9 {
            assert!(!visit_is_free(numero, &l), "visit {numero} should be paid");
        }
        assert!(visit_is_free(10, &l));
        for numero in 11..=19 {
            assert!(!visit_is_free(numero, &l), "visit {numero} should be paid");
        }
        assert!(visit_is_free(20, &l));
    }

    #[test]
    fn disabled_loyalty_never_grants_free_visits() {
        let l = LoyaltyConfig {
            free_interval: 10,
            enabled: false,
        };
        assert!(!visit_is_free(10, &l));
        assert!(!visit_is_free(20, &l));
    }

    #[test]
    fn zero_interval_never_divides() {
        assert!(!visit_is_free(10, &loyalty(0)));
    }

    #[test]
    fn fidelite_reports_next_free_visit() {
        // 9 visits on file: the next (10th) is free
        let status = fidelite_status(9, &loyalty(10));
        assert_eq!(
            status,
            FideliteStatus {
                nombre_passages_actuel: 9,
                prochain_numero: 10,
                est_gratuit: true,
                passages_restants: 0,
            }
        );

        // 10 visits on file: 9 more before the 20th
        let status = fidelite_status(10, &loyalty(10));
        assert_eq!(status.prochain_numero, 11);
        assert!(!status.est_gratuit);
        assert_eq!(status.passages_restants, 9);

        let status = fidelite_status(3, &loyalty(10));
        assert_eq!(status.passages_restants, 6);
    }

    #[test]
    fn free_visit_costs_nothing_but_keeps_its_theoretical_amount() {
        let lignes = vec![ligne(5000.0, 1), ligne(2000.0, 2)];
        assert_eq!(montant_theorique(&lignes), 9000.0);
        assert_eq!(montant_total(true, &lignes), 0.0);
        assert_eq!(montant_total(false, &lignes), 9000.0);
    }

    #[test]
    fn renumbering_keeps_chronological_order() {
        let d = |day| Utc.with_ymd_and_hms(2026, 1, day, 10, 0, 0).unwrap();
        // visits 1..5 where #3 (id 30) was deleted; ids arrive unsorted
        let remaining = vec![(50, d(5)), (10, d(1)), (40, d(4)), (20, d(2))];
        let renumbered = renumber_in_date_order(remaining);
        assert_eq!(renumbered, vec![(10, 1), (20, 2), (40, 3), (50, 4)]);
    }

    #[test]
    fn renumbering_breaks_date_ties_by_id() {
        let d = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let renumbered = renumber_in_date_order(vec![(7, d), (3, d), (5, d)]);
        assert_eq!(renumbered, vec![(3, 1), (5, 2), (7, 3)]);
    }

    proptest! {
        #[test]
        fn renumbering_is_always_dense_from_one(ids in proptest::collection::hash_set(1i64..10_000, 0..50)) {
            let d = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
            let remaining: Vec<_> = ids.iter().map(|&id| (id, d)).collect();
            let renumbered = renumber_in_date_order(remaining);
            let numeros: Vec<i32> = renumbered.iter().map(|&(_, n)| n).collect();
            prop_assert_eq!(numeros, (1..=ids.len() as i32).collect::<Vec<_>>());
        }

        #[test]
        fn free_visits_recur_exactly_every_interval(interval in 1u32..50, numero in 1i32..1000) {
            let l = loyalty(interval);
            prop_assert_eq!(visit_is_free(numero, &l), numero % interval as i32 == 0);
        }
    }
}
