//! # Eligibility Resolver
//!
//! Candidate sets for the three stage boundaries: items whose upstream
//! stage is done and which have no downstream record yet. Every resolution
//! is computed fresh from persisted state — no caching across calls — so a
//! candidate consumed by a concurrent creation disappears from the next
//! resolution. The set identity is
//! `eligible == upstream_done \ has_downstream`, expressed as
//! `LEFT JOIN ... IS NULL` against the child table.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::constants::statuses;
use crate::error::Result;

/// A delivered unit awaiting pre-commissioning. One candidate per serial
/// number token, not one per dispatched line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PreCommissioningCandidate {
    pub serial_number_id: i64,
    pub serial_number: String,
    pub product_name: String,
    pub dispatch_id: i64,
}

/// A done pre-commissioning record awaiting commissioning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CommissioningCandidate {
    pub pre_commissioning_id: i64,
    pub serial_number: String,
    pub product_name: String,
    pub dispatch_id: i64,
}

/// A done commissioning record awaiting its warranty certificate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WarrantyCandidate {
    pub commissioning_id: i64,
    pub pre_commissioning_id: i64,
    pub serial_number: String,
    pub product_name: String,
    pub commissioning_date: Option<NaiveDate>,
}

/// Resolves per-stage candidate sets for one backing store
#[derive(Clone)]
pub struct EligibilityResolver {
    pool: PgPool,
}

impl EligibilityResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Every (dispatch, serial) pair on this order whose dispatch has a
    /// confirmed delivery and no pre-commissioning record yet.
    pub async fn eligible_for_pre_commissioning(
        &self,
        po_id: &str,
    ) -> Result<Vec<PreCommissioningCandidate>> {
        let candidates = sqlx::query_as::<_, PreCommissioningCandidate>(
            r#"
            SELECT sn.id AS serial_number_id,
                   sn.serial AS serial_number,
                   dl.product AS product_name,
                   dl.dispatch_id
            FROM serial_numbers sn
            JOIN dispatched_lines dl ON dl.id = sn.dispatched_line_id
            JOIN dispatch_records dr ON dr.id = dl.dispatch_id
            LEFT JOIN pre_commissioning_records pc ON pc.serial_number_id = sn.id
            WHERE dr.po_id = $1
              AND dr.delivery_status = $2
              AND pc.id IS NULL
            ORDER BY dl.dispatch_id, dl.id, sn.position
            "#,
        )
        .bind(po_id)
        .bind(statuses::DONE)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(po_id, candidates = candidates.len(), "resolved pre-commissioning candidates");
        Ok(candidates)
    }

    /// Every done pre-commissioning record on this order lacking a
    /// commissioning record.
    pub async fn eligible_for_commissioning(
        &self,
        po_id: &str,
    ) -> Result<Vec<CommissioningCandidate>> {
        let candidates = sqlx::query_as::<_, CommissioningCandidate>(
            r#"
            SELECT pc.id AS pre_commissioning_id,
                   sn.serial AS serial_number,
                   dl.product AS product_name,
                   dl.dispatch_id
            FROM pre_commissioning_records pc
            JOIN serial_numbers sn ON sn.id = pc.serial_number_id
            JOIN dispatched_lines dl ON dl.id = sn.dispatched_line_id
            JOIN dispatch_records dr ON dr.id = dl.dispatch_id
            LEFT JOIN commissioning_records c ON c.pre_commissioning_id = pc.id
            WHERE dr.po_id = $1
              AND pc.status = $2
              AND c.id IS NULL
            ORDER BY pc.id
            "#,
        )
        .bind(po_id)
        .bind(statuses::DONE)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(po_id, candidates = candidates.len(), "resolved commissioning candidates");
        Ok(candidates)
    }

    /// Every done commissioning record on this order lacking a warranty
    /// certificate.
    pub async fn eligible_for_warranty(&self, po_id: &str) -> Result<Vec<WarrantyCandidate>> {
        let candidates = sqlx::query_as::<_, WarrantyCandidate>(
            r#"
            SELECT c.id AS commissioning_id,
                   c.pre_commissioning_id,
                   sn.serial AS serial_number,
                   dl.product AS product_name,
                   c.commissioning_date
            FROM commissioning_records c
            JOIN pre_commissioning_records pc ON pc.id = c.pre_commissioning_id
            JOIN serial_numbers sn ON sn.id = pc.serial_number_id
            JOIN dispatched_lines dl ON dl.id = sn.dispatched_line_id
            JOIN dispatch_records dr ON dr.id = dl.dispatch_id
            LEFT JOIN warranty_certificates w ON w.commissioning_id = c.id
            WHERE dr.po_id = $1
              AND c.status = $2
              AND w.id IS NULL
            ORDER BY c.id
            "#,
        )
        .bind(po_id)
        .bind(statuses::DONE)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(po_id, candidates = candidates.len(), "resolved warranty candidates");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Candidate DTOs go over the wire to the UI; field spellings are part
    // of the contract.
    #[test]
    fn candidate_json_field_names_are_stable() {
        let candidate = PreCommissioningCandidate {
            serial_number_id: 12,
            serial_number: "SN-1001".to_string(),
            product_name: "P-100".to_string(),
            dispatch_id: 7,
        };
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["serial_number_id"], 12);
        assert_eq!(json["serial_number"], "SN-1001");
        assert_eq!(json["product_name"], "P-100");
        assert_eq!(json["dispatch_id"], 7);

        let warranty = WarrantyCandidate {
            commissioning_id: 3,
            pre_commissioning_id: 2,
            serial_number: "SN-1001".to_string(),
            product_name: "P-100".to_string(),
            commissioning_date: None,
        };
        let json = serde_json::to_value(&warranty).unwrap();
        assert!(json["commissioning_date"].is_null());
        assert_eq!(json["commissioning_id"], 3);
    }
}
