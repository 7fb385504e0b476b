//! # Serial Reconciler
//!
//! Serial numbers arrive as comma-joined text at the document stage (they
//! are unknown until physical dispatch). The reconciler splits, trims and
//! validates the tokens against the line's dispatched quantity, then
//! persists them as an explicit ordered child collection, one row per unit.

use sqlx::{Postgres, Transaction};

use crate::error::{FulfillmentError, Result};

/// Split on commas, trim whitespace, discard empty tokens.
pub fn parse_serials(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// The token count must equal the dispatched quantity exactly; duplicate
/// tokens within one line are rejected before they can hit the unique
/// constraint. Returns the parsed tokens on success.
pub fn validate_serial_count(dispatched_quantity: i32, serials: &str) -> Result<Vec<String>> {
    let tokens = parse_serials(serials);
    if tokens.len() != dispatched_quantity.max(0) as usize {
        return Err(FulfillmentError::SerialCountMismatch {
            expected: dispatched_quantity,
            actual: tokens.len(),
        });
    }
    let mut seen = std::collections::HashSet::new();
    for token in &tokens {
        if !seen.insert(token.as_str()) {
            return Err(FulfillmentError::validation(format!(
                "duplicate serial number '{token}' in one dispatched line"
            )));
        }
    }
    Ok(tokens)
}

/// Replace the recorded serial set for a dispatched line with the given
/// tokens, preserving entry order.
pub(crate) async fn record_serials(
    tx: &mut Transaction<'_, Postgres>,
    dispatched_line_id: i64,
    tokens: &[String],
) -> Result<()> {
    sqlx::query("DELETE FROM serial_numbers WHERE dispatched_line_id = $1")
        .bind(dispatched_line_id)
        .execute(&mut **tx)
        .await?;

    for (position, serial) in tokens.iter().enumerate() {
        sqlx::query(
            "INSERT INTO serial_numbers (dispatched_line_id, position, serial) VALUES ($1, $2, $3)",
        )
        .bind(dispatched_line_id)
        .bind(position as i32)
        .bind(serial)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsing_trims_and_drops_empty_tokens() {
        assert_eq!(parse_serials("A1, A2 ,A3"), vec!["A1", "A2", "A3"]);
        assert_eq!(parse_serials("A1,,A2,"), vec!["A1", "A2"]);
        assert_eq!(parse_serials("  "), Vec::<String>::new());
        assert_eq!(parse_serials(""), Vec::<String>::new());
    }

    #[test]
    fn count_must_match_dispatched_quantity() {
        // quantity 3 with two tokens fails naming both counts
        let err = validate_serial_count(3, "A1, A2").unwrap_err();
        match err {
            FulfillmentError::SerialCountMismatch { expected, actual } => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("expected count mismatch, got {other}"),
        }

        let tokens = validate_serial_count(3, "A1,A2,A3").unwrap();
        assert_eq!(tokens, vec!["A1", "A2", "A3"]);
    }

    #[test]
    fn duplicate_serials_are_rejected() {
        let err = validate_serial_count(2, "A1,A1").unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation { .. }));
    }

    #[test]
    fn zero_quantity_accepts_only_empty_text() {
        assert!(validate_serial_count(0, "").unwrap().is_empty());
        assert!(validate_serial_count(0, "A1").is_err());
    }
}
