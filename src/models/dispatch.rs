//! # Dispatch Record Model
//!
//! A dispatch against a purchase order: a set of dispatched lines plus
//! three independently-updatable sections (core details, shipping
//! documents, delivery confirmation), each with its own status scalar and
//! last-updated timestamp. Maps to `dispatch_records`, `dispatched_lines`
//! and `serial_numbers`.
//!
//! Allocation is gated by the quantity ledger: the sum of dispatched
//! quantities per product never exceeds the order line's total. Serial
//! numbers are recorded at the document stage as an explicit child
//! collection, one row per unit.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::constants::{entities, statuses, RecordStatus};
use crate::error::{FulfillmentError, Result};
use crate::lifecycle::quantity_ledger;
use crate::lifecycle::serial;
use crate::models::purchase_order::PurchaseOrder;

/// One dispatch against a purchase order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DispatchRecord {
    pub id: i64,
    pub po_id: String,
    // Core details section
    pub core_status: String,
    pub core_updated_at: DateTime<Utc>,
    // Shipping document section
    pub document_status: String,
    pub document_updated_at: DateTime<Utc>,
    pub lr_number: Option<String>,
    pub lr_date: Option<NaiveDate>,
    pub invoice_number: Option<String>,
    pub courier: Option<String>,
    // Delivery confirmation section
    pub delivery_status: String,
    pub delivery_updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub receiver: Option<String>,
    pub created_by_id: i64,
    pub updated_by_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One product allocation within a dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DispatchedLine {
    pub id: i64,
    pub dispatch_id: i64,
    pub product: String,
    pub dispatched_quantity: i32,
}

/// One physical unit's serial number, recorded at the document stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SerialNumber {
    pub id: i64,
    pub dispatched_line_id: i64,
    pub position: i32,
    pub serial: String,
}

/// New dispatch for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDispatchRecord {
    pub po_id: String,
    pub lines: Vec<NewDispatchedLine>,
}

/// New dispatched line for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDispatchedLine {
    pub product: String,
    pub dispatched_quantity: i32,
}

/// Partial update of the core details section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCoreSection {
    pub status: Option<String>,
    /// When present, replaces the dispatched lines wholesale. Serial
    /// numbers recorded against the old lines are dropped with them.
    pub lines: Option<Vec<NewDispatchedLine>>,
}

/// Serial text for one dispatched line, comma-joined as entered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSerials {
    pub dispatched_line_id: i64,
    pub serials: String,
}

/// Partial update of the shipping document section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDocumentSection {
    pub status: Option<String>,
    pub lr_number: Option<String>,
    pub lr_date: Option<NaiveDate>,
    pub invoice_number: Option<String>,
    pub courier: Option<String>,
    /// When present, validated against each line's dispatched quantity and
    /// persisted as `serial_numbers` rows replacing the prior set.
    pub serials: Option<Vec<LineSerials>>,
}

/// Partial update of the delivery confirmation section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDeliverySection {
    pub status: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub receiver: Option<String>,
}

impl DispatchRecord {
    /// Create a dispatch with its lines, enforcing quantity conservation.
    ///
    /// Each requested allocation is checked against the remaining
    /// dispatchable quantity for its product inside the transaction; a
    /// request that exceeds it fails the whole create with a validation
    /// error, never a silent clamp.
    pub async fn create(
        pool: &PgPool,
        new_dispatch: NewDispatchRecord,
        actor_id: i64,
    ) -> Result<DispatchRecord> {
        PurchaseOrder::get(pool, &new_dispatch.po_id)
            .await?
            .ensure_open()?;
        validate_lines(&new_dispatch.lines)?;

        let mut tx = pool.begin().await?;

        quantity_ledger::lock_lines(
            &mut tx,
            &new_dispatch.po_id,
            new_dispatch.lines.iter().map(|l| l.product.clone()).collect(),
        )
        .await?;
        for line in &new_dispatch.lines {
            quantity_ledger::validate_allocation(
                &mut *tx,
                &new_dispatch.po_id,
                &line.product,
                line.dispatched_quantity,
                None,
            )
            .await?;
        }

        let record = sqlx::query_as::<_, DispatchRecord>(
            r#"
            INSERT INTO dispatch_records
                (po_id, core_status, document_status, delivery_status, created_by_id, updated_by_id)
            VALUES ($1, $2, $3, $3, $4, $4)
            RETURNING *
            "#,
        )
        .bind(&new_dispatch.po_id)
        .bind(statuses::DONE)
        .bind(statuses::PENDING)
        .bind(actor_id)
        .fetch_one(&mut *tx)
        .await?;

        for line in &new_dispatch.lines {
            sqlx::query(
                "INSERT INTO dispatched_lines (dispatch_id, product, dispatched_quantity) VALUES ($1, $2, $3)",
            )
            .bind(record.id)
            .bind(&line.product)
            .bind(line.dispatched_quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(
            po_id = %record.po_id,
            dispatch_id = record.id,
            lines = new_dispatch.lines.len(),
            "dispatch created"
        );
        Ok(record)
    }

    /// Find a dispatch by id
    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<DispatchRecord>> {
        let record =
            sqlx::query_as::<_, DispatchRecord>("SELECT * FROM dispatch_records WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        Ok(record)
    }

    /// Find a dispatch by id, or fail with NotFound
    pub async fn get(pool: &PgPool, id: i64) -> Result<DispatchRecord> {
        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| FulfillmentError::not_found(entities::DISPATCH_RECORD, id))
    }

    /// All dispatches for an order, oldest first
    pub async fn find_by_po(pool: &PgPool, po_id: &str) -> Result<Vec<DispatchRecord>> {
        let records = sqlx::query_as::<_, DispatchRecord>(
            "SELECT * FROM dispatch_records WHERE po_id = $1 ORDER BY created_at ASC",
        )
        .bind(po_id)
        .fetch_all(pool)
        .await?;
        Ok(records)
    }

    /// Dispatched lines for this record
    pub async fn lines(pool: &PgPool, dispatch_id: i64) -> Result<Vec<DispatchedLine>> {
        let lines = sqlx::query_as::<_, DispatchedLine>(
            "SELECT * FROM dispatched_lines WHERE dispatch_id = $1 ORDER BY id",
        )
        .bind(dispatch_id)
        .fetch_all(pool)
        .await?;
        Ok(lines)
    }

    /// Recorded serial numbers for one dispatched line, in entry order
    pub async fn serials_for_line(pool: &PgPool, dispatched_line_id: i64) -> Result<Vec<SerialNumber>> {
        let serials = sqlx::query_as::<_, SerialNumber>(
            "SELECT * FROM serial_numbers WHERE dispatched_line_id = $1 ORDER BY position",
        )
        .bind(dispatched_line_id)
        .fetch_all(pool)
        .await?;
        Ok(serials)
    }

    /// Update the core details section; replacing lines re-runs the
    /// quantity ledger excluding this dispatch's own allocations.
    pub async fn update_core(
        pool: &PgPool,
        dispatch_id: i64,
        update: UpdateCoreSection,
        actor_id: i64,
    ) -> Result<DispatchRecord> {
        let record = Self::get(pool, dispatch_id).await?;
        PurchaseOrder::get(pool, &record.po_id).await?.ensure_open()?;
        let status = RecordStatus::normalize(update.status.as_deref())?;

        let mut tx = pool.begin().await?;

        if let Some(lines) = &update.lines {
            validate_lines(lines)?;
            quantity_ledger::lock_lines(
                &mut tx,
                &record.po_id,
                lines.iter().map(|l| l.product.clone()).collect(),
            )
            .await?;
            for line in lines {
                quantity_ledger::validate_allocation(
                    &mut *tx,
                    &record.po_id,
                    &line.product,
                    line.dispatched_quantity,
                    Some(dispatch_id),
                )
                .await?;
            }
            // Serial rows go with their lines (ON DELETE CASCADE).
            sqlx::query("DELETE FROM dispatched_lines WHERE dispatch_id = $1")
                .bind(dispatch_id)
                .execute(&mut *tx)
                .await?;
            for line in lines {
                sqlx::query(
                    "INSERT INTO dispatched_lines (dispatch_id, product, dispatched_quantity) VALUES ($1, $2, $3)",
                )
                .bind(dispatch_id)
                .bind(&line.product)
                .bind(line.dispatched_quantity)
                .execute(&mut *tx)
                .await?;
            }
        }

        let record = sqlx::query_as::<_, DispatchRecord>(
            r#"
            UPDATE dispatch_records
            SET core_status = COALESCE($2, core_status),
                core_updated_at = NOW(),
                updated_by_id = $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(dispatch_id)
        .bind(status)
        .bind(actor_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Update the shipping document section. Serials, when supplied, must
    /// reconcile: token count equals the line's dispatched quantity.
    pub async fn update_document(
        pool: &PgPool,
        dispatch_id: i64,
        update: UpdateDocumentSection,
        actor_id: i64,
    ) -> Result<DispatchRecord> {
        let record = Self::get(pool, dispatch_id).await?;
        PurchaseOrder::get(pool, &record.po_id).await?.ensure_open()?;
        let status = RecordStatus::normalize(update.status.as_deref())?;

        let mut tx = pool.begin().await?;

        if let Some(line_serials) = &update.serials {
            for entry in line_serials {
                let line = sqlx::query_as::<_, DispatchedLine>(
                    "SELECT * FROM dispatched_lines WHERE id = $1 AND dispatch_id = $2",
                )
                .bind(entry.dispatched_line_id)
                .bind(dispatch_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| {
                    FulfillmentError::not_found(entities::DISPATCHED_LINE, entry.dispatched_line_id)
                })?;

                let tokens = serial::validate_serial_count(line.dispatched_quantity, &entry.serials)?;
                serial::record_serials(&mut tx, line.id, &tokens).await?;
            }
        }

        let record = sqlx::query_as::<_, DispatchRecord>(
            r#"
            UPDATE dispatch_records
            SET document_status = COALESCE($2, document_status),
                document_updated_at = NOW(),
                lr_number = COALESCE($3, lr_number),
                lr_date = COALESCE($4, lr_date),
                invoice_number = COALESCE($5, invoice_number),
                courier = COALESCE($6, courier),
                updated_by_id = $7,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(dispatch_id)
        .bind(status)
        .bind(update.lr_number)
        .bind(update.lr_date)
        .bind(update.invoice_number)
        .bind(update.courier)
        .bind(actor_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Update the delivery confirmation section.
    pub async fn update_delivery(
        pool: &PgPool,
        dispatch_id: i64,
        update: UpdateDeliverySection,
        actor_id: i64,
    ) -> Result<DispatchRecord> {
        let record = Self::get(pool, dispatch_id).await?;
        PurchaseOrder::get(pool, &record.po_id).await?.ensure_open()?;
        let status = RecordStatus::normalize(update.status.as_deref())?;

        let record = sqlx::query_as::<_, DispatchRecord>(
            r#"
            UPDATE dispatch_records
            SET delivery_status = COALESCE($2, delivery_status),
                delivery_updated_at = NOW(),
                delivered_at = COALESCE($3, delivered_at),
                receiver = COALESCE($4, receiver),
                updated_by_id = $5,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(dispatch_id)
        .bind(status)
        .bind(update.delivered_at)
        .bind(update.receiver)
        .bind(actor_id)
        .fetch_one(pool)
        .await?;

        Ok(record)
    }
}

/// Each line must carry a positive quantity, and a product may appear on
/// one line only. Duplicate products would let each line pass the ledger
/// check individually while their sum over-allocates; the table carries a
/// UNIQUE constraint to the same effect.
fn validate_lines(lines: &[NewDispatchedLine]) -> Result<()> {
    if lines.is_empty() {
        return Err(FulfillmentError::validation(
            "a dispatch needs at least one line",
        ));
    }
    let mut products = std::collections::HashSet::new();
    for line in lines {
        if line.dispatched_quantity <= 0 {
            return Err(FulfillmentError::validation(format!(
                "dispatched quantity for product '{}' must be positive",
                line.product
            )));
        }
        if !products.insert(line.product.as_str()) {
            return Err(FulfillmentError::validation(format!(
                "product '{}' appears on more than one dispatch line",
                line.product
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_or_nonpositive_lines_are_rejected() {
        assert!(validate_lines(&[]).is_err());
        assert!(validate_lines(&[NewDispatchedLine {
            product: "P-100".to_string(),
            dispatched_quantity: 0,
        }])
        .is_err());
        assert!(validate_lines(&[NewDispatchedLine {
            product: "P-100".to_string(),
            dispatched_quantity: 3,
        }])
        .is_ok());
    }

    #[test]
    fn duplicate_product_lines_are_rejected() {
        // Two lines for one product would each pass the ledger check on
        // its own while their sum over-allocates the order line.
        let err = validate_lines(&[
            NewDispatchedLine {
                product: "P-100".to_string(),
                dispatched_quantity: 3,
            },
            NewDispatchedLine {
                product: "P-100".to_string(),
                dispatched_quantity: 3,
            },
        ])
        .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation { .. }));
        assert!(err.to_string().contains("more than one dispatch line"));
    }
}
