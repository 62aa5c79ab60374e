//! Receipt data assembly. The renderer (out of process) gets a fixed field
//! set; this module only builds the structure, it renders nothing.

use serde::Serialize;
use sqlx::PgPool;

use crate::config::SalonConfig;
use crate::errors::ApiError;
use crate::models::{Client, ModePaiement, Paiement, Passage, PassageLigne};

#[derive(Debug, Serialize)]
pub struct RecuClient {
    pub nom_complet: String,
    pub telephone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecuLigne {
    pub libelle: String,
    pub quantite: i32,
    pub prix_unitaire: f64,
    pub prix_total: f64,
}

#[derive(Debug, Serialize)]
pub struct RecuSalon {
    pub nom: String,
    pub adresse: String,
    pub telephone: String,
}

#[derive(Debug, Serialize)]
pub struct RecuData {
    pub numero_recu: String,
    pub date: String,
    pub client: RecuClient,
    pub prestations: Vec<RecuLigne>,
    pub montant_total: f64,
    pub montant_paye: f64,
    pub mode_paiement: ModePaiement,
    pub est_gratuit: bool,
    pub numero_passage: i32,
    pub salon: RecuSalon,
}

pub fn build_recu(
    paiement: &Paiement,
    passage: &Passage,
    client: &Client,
    lignes: &[PassageLigne],
    salon: &SalonConfig,
) -> RecuData {
    RecuData {
        numero_recu: paiement.numero_recu.clone(),
        date: paiement.date_paiement.format("%d/%m/%Y %H:%M").to_string(),
        client: RecuClient {
            nom_complet: client.nom_complet(),
            telephone: client.telephone.clone(),
        },
        prestations: lignes
            .iter()
            .map(|l| RecuLigne {
                libelle: l.libelle.clone(),
                quantite: l.quantite,
                prix_unitaire: l.prix_applique,
                prix_total: l.prix_applique * l.quantite as f64,
            })
            .collect(),
        montant_total: paiement.montant_total,
        montant_paye: paiement.montant_paye,
        mode_paiement: paiement.mode_paiement,
        est_gratuit: passage.est_gratuit,
        numero_passage: passage.numero_passage,
        salon: RecuSalon {
            nom: salon.nom.clone(),
            adresse: salon.adresse.clone(),
            telephone: salon.telephone.clone(),
        },
    }
}

pub async fn donnees_recu(
    pool: &PgPool,
    salon: &SalonConfig,
    paiement_id: i64,
) -> Result<RecuData, ApiError> {
    let paiement = Paiement::find(pool, paiement_id)
        .await?
        .ok_or_else(|| ApiError::not_found("paiement", paiement_id))?;
    let passage = Passage::find(pool, paiement.passage_id)
        .await?
        .ok_or_else(|| ApiError::not_found("passage", paiement.passage_id))?;
    // archived clients still appear on their old receipts
    let client: Option<Client> = sqlx::query_as("SELECT * FROM clients WHERE id = $1")
        .bind(passage.client_id)
        .fetch_optional(pool)
        .await?;
    let client = client.ok_or_else(|| ApiError::not_found("client", passage.client_id))?;
    let lignes = Passage::lignes(pool, passage.id).await?;

    Ok(build_recu(&paiement, &passage, &client, &lignes, salon))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatutPaiement;
    use chrono::{TimeZone, Utc};

    fn salon() -> SalonConfig {
        SalonConfig {
            nom: "Salon de Coiffure".to_string(),
            adresse: "Abidjan, Côte d'Ivoire".to_string(),
            telephone: "+225 00 00 00 00".to_string(),
            email: "contact@salon.ci".to_string(),
        }
    }

    #[test]
    fn receipt_carries_the_full_field_set() {
        let date = Utc.with_ymd_and_hms(2026, 2, 4, 16, 45, 0).unwrap();
        let client = Client {
            id: 1,
            nom: "Kouassi".to_string(),
            prenom: "Awa".to_string(),
            telephone: Some("0102030405".to_string()),
            code_client: "C007-26".to_string(),
            nombre_passages: 10,
            derniere_visite: Some(date),
            device_id: None,
            synced_at: None,
            created_at: date,
            updated_at: date,
            deleted_at: None,
        };
        let passage = Passage {
            id: 5,
            client_id: 1,
            numero_passage: 10,
            est_gratuit: true,
            notes: None,
            date_passage: date,
            device_id: None,
            synced_at: None,
            created_at: date,
            updated_at: date,
        };
        let paiement = Paiement {
            id: 9,
            passage_id: 5,
            montant_total: 0.0,
            montant_paye: 0.0,
            mode_paiement: ModePaiement::Especes,
            statut: StatutPaiement::Valide,
            notes: None,
            date_paiement: date,
            numero_recu: "REC-20260204-A1B2C3".to_string(),
            device_id: None,
            synced_at: None,
            created_at: date,
            updated_at: date,
        };
        let lignes = vec![PassageLigne {
            prestation_id: 2,
            libelle: "Coupe homme".to_string(),
            prix_applique: 5000.0,
            quantite: 2,
            coiffeur_id: None,
            coiffeur_nom: None,
        }];

        let recu = build_recu(&paiement, &passage, &client, &lignes, &salon());

        assert_eq!(recu.numero_recu, "REC-20260204-A1B2C3");
        assert_eq!(recu.date, "04/02/2026 16:45");
        assert_eq!(recu.client.nom_complet, "Awa Kouassi");
        assert_eq!(recu.prestations.len(), 1);
        assert_eq!(recu.prestations[0].prix_total, 10000.0);
        assert!(recu.est_gratuit);
        assert_eq!(recu.numero_passage, 10);
        assert_eq!(recu.salon.nom, "Salon de Coiffure");
    }
}
