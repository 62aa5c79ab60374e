//! Unique identifier generation: client codes (`C###-YY`) and receipt
//! numbers (`REC-YYYYMMDD-XXXXXX`).
//!
//! Client codes are derived from the maximum sequence already on file, so
//! generation and insertion must share one transaction. A transaction-scoped
//! advisory lock keyed on the code scope serializes concurrent generators;
//! the bounded candidate walk below it only matters for codes inserted
//! without the lock (hand-supplied codes) and stops at `MAX_ATTEMPTS`.

use chrono::{DateTime, Datelike, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::errors::ApiError;

pub const MAX_ATTEMPTS: u32 = 1000;

// Lock class for pg_advisory_xact_lock: one scope per code family + year
const CODE_LOCK_CLASS: i32 = 0x434C43; // "CLC"

pub fn current_year2(now: DateTime<Utc>) -> u32 {
    (now.year() % 100) as u32
}

pub fn format_client_code(sequence: u32, year2: u32) -> String {
    format!("C{:03}-{:02}", sequence, year2 % 100)
}

/// Numeric sequence component of a well-formed client code, `None` otherwise.
pub fn parse_client_code(code: &str) -> Option<u32> {
    let rest = code.strip_prefix('C')?;
    let (num, year) = rest.split_once('-')?;
    if num.len() < 3 || year.len() != 2 {
        return None;
    }
    if !num.bytes().all(|b| b.is_ascii_digit()) || !year.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    num.parse().ok()
}

/// Highest sequence component among all existing client codes, every year
/// included. Archived clients keep their codes reserved.
pub async fn max_existing_sequence(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<u32, sqlx::Error> {
    let max: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(MAX((regexp_match(code_client, '^C(\d{3,})-\d{2}$'))[1]::BIGINT), 0)
        FROM clients
        WHERE code_client ~ '^C\d{3,}-\d{2}$'
        "#,
    )
    .fetch_one(&mut **tx)
    .await?;
    Ok(max.max(0) as u32)
}

/// Next free client code for the current year, generated inside the caller's
/// transaction. Takes the advisory lock first so two concurrent creations
/// cannot scan the same maximum.
pub async fn next_client_code(
    tx: &mut Transaction<'_, Postgres>,
    now: DateTime<Utc>,
) -> Result<String, ApiError> {
    let year2 = current_year2(now);

    sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
        .bind(CODE_LOCK_CLASS)
        .bind(year2 as i32)
        .execute(&mut **tx)
        .await?;

    let max = max_existing_sequence(tx).await?;

    for attempt in 0..MAX_ATTEMPTS {
        let candidate = format_client_code(max + 1 + attempt, year2);
        let taken: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM clients WHERE code_client = $1)")
                .bind(&candidate)
                .fetch_one(&mut **tx)
                .await?;
        if !taken {
            return Ok(candidate);
        }
    }

    tracing::error!("client code generation exhausted after {} attempts", MAX_ATTEMPTS);
    Err(ApiError::GenerationExhausted(MAX_ATTEMPTS))
}

/// Receipt number: date stamp plus a random suffix. Assigned exactly once at
/// payment creation; the UNIQUE constraint on `paiements.numero_recu` turns
/// the (practically impossible) collision into a Conflict instead of an
/// overwrite, so no retry loop here.
pub fn next_receipt_number(now: DateTime<Utc>) -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(6)
        .collect::<String>()
        .to_uppercase();
    format!("REC-{}-{}", now.format("%Y%m%d"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn formats_with_zero_padding() {
        assert_eq!(format_client_code(7, 26), "C007-26");
        assert_eq!(format_client_code(46, 26), "C046-26");
        assert_eq!(format_client_code(999, 26), "C999-26");
    }

    #[test]
    fn sequence_past_999_still_formats_and_parses() {
        let code = format_client_code(1000, 26);
        assert_eq!(code, "C1000-26");
        assert_eq!(parse_client_code(&code), Some(1000));
    }

    #[test]
    fn parse_rejects_malformed_codes() {
        assert_eq!(parse_client_code("C45-26"), None);
        assert_eq!(parse_client_code("C045-2026"), None);
        assert_eq!(parse_client_code("X045-26"), None);
        assert_eq!(parse_client_code("C045"), None);
        assert_eq!(parse_client_code("C0a5-26"), None);
        assert_eq!(parse_client_code(""), None);
    }

    #[test]
    fn receipt_number_shape() {
        let now = Utc.with_ymd_and_hms(2026, 2, 4, 15, 30, 0).unwrap();
        let numero = next_receipt_number(now);
        assert!(numero.starts_with("REC-20260204-"));
        let suffix = numero.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn receipt_numbers_differ() {
        let now = Utc::now();
        assert_ne!(next_receipt_number(now), next_receipt_number(now));
    }

    proptest! {
        #[test]
        fn format_parse_round_trip(seq in 1u32..100_000, year in 0u32..100) {
            let code = format_client_code(seq, year);
            prop_assert_eq!(parse_client_code(&code), Some(seq));
        }

        #[test]
        fn formatted_codes_match_the_wire_pattern(seq in 1u32..1000, year in 0u32..100) {
            let code = format_client_code(seq, year);
            prop_assert!(code.len() == 8);
            prop_assert!(code.starts_with('C'));
            prop_assert_eq!(&code[4..5], "-");
        }
    }
}
