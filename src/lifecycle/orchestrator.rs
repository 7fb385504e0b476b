//! # Lifecycle Orchestrator
//!
//! The only mutation surface for the downstream chain: bulk creation of
//! pre-commissioning, commissioning and warranty records, single-record
//! edits, and the terminal close-order transition.
//!
//! Every batch runs as one all-or-nothing transaction. Inside it, each
//! referenced upstream row is re-fetched and asserted done with no
//! downstream record — a fast-fail pre-check; the UNIQUE constraint on the
//! child table is the actual race-breaker, and a unique violation on
//! insert rolls the batch back as a conflict. Partial success is not
//! permitted.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashSet;

use crate::config::ExecutionConfig;
use crate::constants::{entities, statuses, RecordStatus};
use crate::error::{FulfillmentError, Result};
use crate::lifecycle::status::StageStatusAggregator;
use crate::models::commissioning::{CommissioningDetail, CommissioningRecord, CommissioningShared, UpdateCommissioning};
use crate::models::pre_commissioning::{
    PreCommissioningDetail, PreCommissioningRecord, PreCommissioningShared, UpdatePreCommissioning,
};
use crate::models::purchase_order::PurchaseOrder;
use crate::models::warranty::{UpdateWarranty, WarrantyCertificate, WarrantyDetail, WarrantyShared};

/// Outcome of a close-order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CloseOutcome {
    /// The order was closed by this request
    Closed(PurchaseOrder),
    /// The order was already closed; closing is idempotent
    AlreadyClosed(PurchaseOrder),
}

/// Validates and performs stage-transition writes
#[derive(Clone)]
pub struct LifecycleOrchestrator {
    pool: PgPool,
    aggregator: StageStatusAggregator,
    max_batch_size: usize,
}

impl LifecycleOrchestrator {
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, &ExecutionConfig::default())
    }

    pub fn with_config(pool: PgPool, execution: &ExecutionConfig) -> Self {
        let aggregator = StageStatusAggregator::new(pool.clone());
        Self {
            pool,
            aggregator,
            max_batch_size: execution.max_batch_size,
        }
    }

    /// Create one pre-commissioning record per referenced serial number.
    /// Each serial's dispatch must have a confirmed delivery and no
    /// pre-commissioning record yet.
    pub async fn create_pre_commissioning_batch(
        &self,
        serial_number_ids: &[i64],
        shared: &PreCommissioningShared,
        actor_id: i64,
    ) -> Result<Vec<PreCommissioningDetail>> {
        validate_batch_shape(serial_number_ids, self.max_batch_size)?;
        let mut tx = self.pool.begin().await?;

        let mut details = Vec::with_capacity(serial_number_ids.len());
        let mut batch_po: Option<String> = None;
        for &serial_number_id in serial_number_ids {
            let upstream = sqlx::query_as::<_, PreCommissioningUpstream>(
                r#"
                SELECT sn.id AS serial_number_id,
                       sn.serial,
                       dl.product,
                       dl.dispatch_id,
                       dr.po_id,
                       dr.delivery_status,
                       pc.id AS existing_id
                FROM serial_numbers sn
                JOIN dispatched_lines dl ON dl.id = sn.dispatched_line_id
                JOIN dispatch_records dr ON dr.id = dl.dispatch_id
                LEFT JOIN pre_commissioning_records pc ON pc.serial_number_id = sn.id
                WHERE sn.id = $1
                "#,
            )
            .bind(serial_number_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| FulfillmentError::not_found(entities::SERIAL_NUMBER, serial_number_id))?;

            self.check_batch_order(&mut tx, &mut batch_po, &upstream.po_id)
                .await
                .map_err(batchify)?;

            if upstream.delivery_status != statuses::DONE {
                return Err(batchify(FulfillmentError::conflict(
                    entities::SERIAL_NUMBER,
                    serial_number_id,
                    format!(
                        "delivery for dispatch {} is '{}', must be 'done'",
                        upstream.dispatch_id, upstream.delivery_status
                    ),
                )));
            }
            if upstream.existing_id.is_some() {
                return Err(batchify(FulfillmentError::conflict(
                    entities::SERIAL_NUMBER,
                    serial_number_id,
                    format!(
                        "pre-commissioning already exists for serial '{}'",
                        upstream.serial
                    ),
                )));
            }

            let record = PreCommissioningRecord::insert(
                &mut tx,
                serial_number_id,
                shared,
                statuses::PENDING,
                actor_id,
            )
            .await
            .map_err(batchify)?;

            details.push(PreCommissioningDetail {
                id: record.id,
                serial_number_id,
                status: record.status,
                engineer: record.engineer,
                visit_date: record.visit_date,
                remarks: record.remarks,
                serial_number: upstream.serial,
                product_name: upstream.product,
                dispatch_id: upstream.dispatch_id,
                po_id: upstream.po_id,
            });
        }

        tx.commit().await?;
        tracing::info!(
            po_id = batch_po.as_deref().unwrap_or_default(),
            created = details.len(),
            "pre-commissioning batch created"
        );
        Ok(details)
    }

    /// Create one commissioning record per referenced pre-commissioning
    /// record; each must be done and not yet commissioned.
    pub async fn create_commissioning_batch(
        &self,
        pre_commissioning_ids: &[i64],
        shared: &CommissioningShared,
        actor_id: i64,
    ) -> Result<Vec<CommissioningDetail>> {
        validate_batch_shape(pre_commissioning_ids, self.max_batch_size)?;
        let mut tx = self.pool.begin().await?;

        let mut details = Vec::with_capacity(pre_commissioning_ids.len());
        let mut batch_po: Option<String> = None;
        for &pre_commissioning_id in pre_commissioning_ids {
            let upstream = sqlx::query_as::<_, ChainUpstream>(
                r#"
                SELECT pc.id AS upstream_id,
                       pc.status AS upstream_status,
                       sn.serial,
                       dl.product,
                       dl.dispatch_id,
                       dr.po_id,
                       c.id AS existing_id,
                       NULL::DATE AS commissioning_date
                FROM pre_commissioning_records pc
                JOIN serial_numbers sn ON sn.id = pc.serial_number_id
                JOIN dispatched_lines dl ON dl.id = sn.dispatched_line_id
                JOIN dispatch_records dr ON dr.id = dl.dispatch_id
                LEFT JOIN commissioning_records c ON c.pre_commissioning_id = pc.id
                WHERE pc.id = $1
                "#,
            )
            .bind(pre_commissioning_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| {
                FulfillmentError::not_found(entities::PRE_COMMISSIONING, pre_commissioning_id)
            })?;

            self.check_batch_order(&mut tx, &mut batch_po, &upstream.po_id)
                .await
                .map_err(batchify)?;
            upstream.ensure_ready(
                entities::PRE_COMMISSIONING,
                pre_commissioning_id,
                "commissioning",
            )?;

            let record = CommissioningRecord::insert(
                &mut tx,
                pre_commissioning_id,
                shared,
                statuses::PENDING,
                actor_id,
            )
            .await
            .map_err(batchify)?;

            details.push(CommissioningDetail {
                id: record.id,
                pre_commissioning_id,
                status: record.status,
                commissioning_date: record.commissioning_date,
                engineer: record.engineer,
                remarks: record.remarks,
                serial_number: upstream.serial,
                product_name: upstream.product,
                dispatch_id: upstream.dispatch_id,
                po_id: upstream.po_id,
            });
        }

        tx.commit().await?;
        tracing::info!(
            po_id = batch_po.as_deref().unwrap_or_default(),
            created = details.len(),
            "commissioning batch created"
        );
        Ok(details)
    }

    /// Create one warranty certificate per referenced commissioning
    /// record; each must be done and not yet certified. Shared fields
    /// (certificate number, warranty window) are stamped identically
    /// across the batch.
    pub async fn create_warranty_batch(
        &self,
        commissioning_ids: &[i64],
        shared: &WarrantyShared,
        actor_id: i64,
    ) -> Result<Vec<WarrantyDetail>> {
        validate_batch_shape(commissioning_ids, self.max_batch_size)?;
        let mut tx = self.pool.begin().await?;

        let mut details = Vec::with_capacity(commissioning_ids.len());
        let mut batch_po: Option<String> = None;
        for &commissioning_id in commissioning_ids {
            let upstream = sqlx::query_as::<_, ChainUpstream>(
                r#"
                SELECT c.id AS upstream_id,
                       c.status AS upstream_status,
                       sn.serial,
                       dl.product,
                       dl.dispatch_id,
                       dr.po_id,
                       w.id AS existing_id,
                       c.commissioning_date
                FROM commissioning_records c
                JOIN pre_commissioning_records pc ON pc.id = c.pre_commissioning_id
                JOIN serial_numbers sn ON sn.id = pc.serial_number_id
                JOIN dispatched_lines dl ON dl.id = sn.dispatched_line_id
                JOIN dispatch_records dr ON dr.id = dl.dispatch_id
                LEFT JOIN warranty_certificates w ON w.commissioning_id = c.id
                WHERE c.id = $1
                "#,
            )
            .bind(commissioning_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| FulfillmentError::not_found(entities::COMMISSIONING, commissioning_id))?;

            self.check_batch_order(&mut tx, &mut batch_po, &upstream.po_id)
                .await
                .map_err(batchify)?;
            upstream.ensure_ready(entities::COMMISSIONING, commissioning_id, "warranty certificate")?;

            let record = WarrantyCertificate::insert(
                &mut tx,
                commissioning_id,
                shared,
                statuses::PENDING,
                actor_id,
            )
            .await
            .map_err(batchify)?;

            details.push(WarrantyDetail {
                id: record.id,
                commissioning_id,
                pre_commissioning_id: upstream.upstream_id,
                status: record.status,
                certificate_number: record.certificate_number,
                warranty_start: record.warranty_start,
                warranty_end: record.warranty_end,
                commissioning_date: upstream.commissioning_date,
                serial_number: upstream.serial,
                product_name: upstream.product,
                dispatch_id: upstream.dispatch_id,
                po_id: upstream.po_id,
            });
        }

        tx.commit().await?;
        tracing::info!(
            po_id = batch_po.as_deref().unwrap_or_default(),
            created = details.len(),
            "warranty batch created"
        );
        Ok(details)
    }

    /// Partial edit of one pre-commissioning record. The status may not
    /// leave `done` once a commissioning record hangs off it.
    pub async fn update_pre_commissioning(
        &self,
        id: i64,
        update: UpdatePreCommissioning,
        actor_id: i64,
    ) -> Result<PreCommissioningRecord> {
        let detail = PreCommissioningRecord::detail(&self.pool, id).await?;
        PurchaseOrder::get(&self.pool, &detail.po_id)
            .await?
            .ensure_open()?;
        let status = RecordStatus::normalize(update.status.as_deref())?;
        self.ensure_no_pinned_downgrade(
            entities::PRE_COMMISSIONING,
            id,
            status.as_deref(),
            "commissioning_records",
            "pre_commissioning_id",
            "commissioning record",
        )
        .await?;
        PreCommissioningRecord::apply_update(&self.pool, id, status, update, actor_id).await
    }

    /// Partial edit of one commissioning record. The status may not leave
    /// `done` once a warranty certificate hangs off it.
    pub async fn update_commissioning(
        &self,
        id: i64,
        update: UpdateCommissioning,
        actor_id: i64,
    ) -> Result<CommissioningRecord> {
        let detail = CommissioningRecord::detail(&self.pool, id).await?;
        PurchaseOrder::get(&self.pool, &detail.po_id)
            .await?
            .ensure_open()?;
        let status = RecordStatus::normalize(update.status.as_deref())?;
        self.ensure_no_pinned_downgrade(
            entities::COMMISSIONING,
            id,
            status.as_deref(),
            "warranty_certificates",
            "commissioning_id",
            "warranty certificate",
        )
        .await?;
        CommissioningRecord::apply_update(&self.pool, id, status, update, actor_id).await
    }

    /// Partial edit of one warranty certificate.
    pub async fn update_warranty(
        &self,
        id: i64,
        update: UpdateWarranty,
        actor_id: i64,
    ) -> Result<WarrantyCertificate> {
        let detail = WarrantyCertificate::detail(&self.pool, id).await?;
        PurchaseOrder::get(&self.pool, &detail.po_id)
            .await?
            .ensure_open()?;
        let status = RecordStatus::normalize(update.status.as_deref())?;
        WarrantyCertificate::apply_update(&self.pool, id, status, update, actor_id).await
    }

    /// A record consumed by a downstream record is pinned at done; edits
    /// may touch other fields, but a status change away from done would
    /// regress a completed stage under its child.
    async fn ensure_no_pinned_downgrade(
        &self,
        entity: &'static str,
        id: i64,
        new_status: Option<&str>,
        child_table: &'static str,
        fk_column: &'static str,
        child_name: &'static str,
    ) -> Result<()> {
        let Some(status) = new_status else {
            return Ok(());
        };
        if status == statuses::DONE {
            return Ok(());
        }
        let sql = format!("SELECT COUNT(*) FROM {child_table} WHERE {fk_column} = $1");
        let children = sqlx::query_scalar::<_, i64>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        if status_change_blocked(Some(status), children) {
            return Err(FulfillmentError::conflict(
                entity,
                id,
                format!("status cannot leave 'done' while a {child_name} exists"),
            ));
        }
        Ok(())
    }

    /// Close an order. One-way: succeeds only when every stage is Done,
    /// and reports the already-closed state without error on a repeat
    /// call.
    pub async fn close_order(&self, po_id: &str, actor_id: i64) -> Result<CloseOutcome> {
        let order = PurchaseOrder::get(&self.pool, po_id).await?;
        if order.is_closed() {
            return Ok(CloseOutcome::AlreadyClosed(order));
        }

        let unfinished = self.aggregator.unfinished_stages(po_id).await?;
        if !unfinished.is_empty() {
            let names: Vec<String> = unfinished.iter().map(|s| s.to_string()).collect();
            return Err(FulfillmentError::NotReady {
                po_id: po_id.to_string(),
                reason: format!("stages not done: {}", names.join(", ")),
            });
        }

        let closed = sqlx::query_as::<_, PurchaseOrder>(
            r#"
            UPDATE purchase_orders
            SET status = $2, updated_by_id = $3, updated_at = NOW()
            WHERE po_id = $1 AND status = $4
            RETURNING *
            "#,
        )
        .bind(po_id)
        .bind(statuses::ORDER_CLOSED)
        .bind(actor_id)
        .bind(statuses::ORDER_OPEN)
        .fetch_optional(&self.pool)
        .await?;

        match closed {
            Some(order) => {
                tracing::info!(po_id, "order closed");
                Ok(CloseOutcome::Closed(order))
            }
            // Lost the race to another closer; report their result.
            None => Ok(CloseOutcome::AlreadyClosed(
                PurchaseOrder::get(&self.pool, po_id).await?,
            )),
        }
    }

    /// Items of one batch must all belong to the same open order; the
    /// order row is fetched once, inside the batch transaction.
    async fn check_batch_order(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        batch_po: &mut Option<String>,
        po_id: &str,
    ) -> Result<()> {
        match batch_po {
            Some(existing) if existing == po_id => Ok(()),
            Some(existing) => Err(FulfillmentError::validation(format!(
                "batch spans orders {existing} and {po_id}; one order per batch"
            ))),
            None => {
                let order = sqlx::query_as::<_, PurchaseOrder>(
                    "SELECT * FROM purchase_orders WHERE po_id = $1",
                )
                .bind(po_id)
                .fetch_optional(&mut **tx)
                .await?
                .ok_or_else(|| FulfillmentError::not_found(entities::PURCHASE_ORDER, po_id))?;
                order.ensure_open()?;
                *batch_po = Some(po_id.to_string());
                Ok(())
            }
        }
    }
}

/// Upstream context for a pre-commissioning batch item
#[derive(Debug, FromRow)]
struct PreCommissioningUpstream {
    #[allow(dead_code)]
    serial_number_id: i64,
    serial: String,
    product: String,
    dispatch_id: i64,
    po_id: String,
    delivery_status: String,
    existing_id: Option<i64>,
}

/// Upstream context shared by the commissioning and warranty batches
#[derive(Debug, FromRow)]
struct ChainUpstream {
    upstream_id: i64,
    upstream_status: String,
    serial: String,
    product: String,
    dispatch_id: i64,
    po_id: String,
    existing_id: Option<i64>,
    commissioning_date: Option<chrono::NaiveDate>,
}

impl ChainUpstream {
    /// Assert the upstream record is done and has no downstream record.
    fn ensure_ready(
        &self,
        entity: &'static str,
        id: i64,
        downstream_name: &str,
    ) -> Result<()> {
        if self.upstream_status != statuses::DONE {
            return Err(batchify(FulfillmentError::conflict(
                entity,
                id,
                format!(
                    "status is '{}', must be 'done' before {downstream_name} creation",
                    self.upstream_status
                ),
            )));
        }
        if self.existing_id.is_some() {
            let entity_name = entity.replace('_', "-");
            return Err(batchify(FulfillmentError::conflict(
                entity,
                id,
                format!("{downstream_name} already exists for {entity_name} {id}"),
            )));
        }
        Ok(())
    }
}

/// Reject empty, oversized, or duplicate-carrying batches up front.
fn validate_batch_shape(ids: &[i64], max_batch_size: usize) -> Result<()> {
    if ids.is_empty() {
        return Err(FulfillmentError::validation("batch must not be empty"));
    }
    if ids.len() > max_batch_size {
        return Err(FulfillmentError::validation(format!(
            "batch of {} exceeds the maximum of {max_batch_size}",
            ids.len()
        )));
    }
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(FulfillmentError::validation(format!(
                "duplicate id {id} in batch"
            )));
        }
    }
    Ok(())
}

/// Wrap deterministic mid-batch failures so the caller knows the batch
/// rolled back; missing ids pass through as NotFound.
fn batchify(err: FulfillmentError) -> FulfillmentError {
    match err {
        e @ (FulfillmentError::Validation { .. }
        | FulfillmentError::SerialCountMismatch { .. }
        | FulfillmentError::Conflict { .. }) => FulfillmentError::batch(e),
        other => other,
    }
}

/// A requested status change is blocked when it moves away from done
/// while downstream children exist.
fn status_change_blocked(new_status: Option<&str>, downstream_children: i64) -> bool {
    matches!(new_status, Some(s) if s != statuses::DONE) && downstream_children > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(status: &str, existing: Option<i64>) -> ChainUpstream {
        ChainUpstream {
            upstream_id: 42,
            upstream_status: status.to_string(),
            serial: "SN-1001".to_string(),
            product: "P-100".to_string(),
            dispatch_id: 7,
            po_id: "PO-2024-001".to_string(),
            existing_id: existing,
            commissioning_date: None,
        }
    }

    #[test]
    fn upstream_must_be_done() {
        let err = upstream("pending", None)
            .ensure_ready(entities::PRE_COMMISSIONING, 42, "commissioning")
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("must be 'done'"));
    }

    #[test]
    fn existing_downstream_is_a_conflict_naming_the_id() {
        let err = upstream("done", Some(9))
            .ensure_ready(entities::PRE_COMMISSIONING, 42, "commissioning")
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(err
            .to_string()
            .contains("commissioning already exists for pre-commissioning 42"));
    }

    #[test]
    fn ready_upstream_passes() {
        assert!(upstream("done", None)
            .ensure_ready(entities::PRE_COMMISSIONING, 42, "commissioning")
            .is_ok());
    }

    #[test]
    fn batch_shape_rejects_empty_oversize_and_duplicates() {
        assert!(validate_batch_shape(&[], 3).is_err());
        assert!(validate_batch_shape(&[1, 2, 3, 4], 3).is_err());
        assert!(validate_batch_shape(&[1, 2, 1], 3).is_err());
        assert!(validate_batch_shape(&[1, 2, 3], 3).is_ok());
    }

    #[test]
    fn batch_wrapper_marks_rollback_and_passes_not_found_through() {
        let wrapped = batchify(FulfillmentError::validation("bad input"));
        assert!(matches!(wrapped, FulfillmentError::Batch { .. }));

        let not_found = batchify(FulfillmentError::not_found(entities::COMMISSIONING, 5));
        assert!(matches!(not_found, FulfillmentError::NotFound { .. }));
    }

    #[test]
    fn downgrade_is_blocked_only_under_a_downstream_child() {
        // done -> hold with a child would regress a completed stage
        assert!(status_change_blocked(Some("hold"), 1));
        assert!(status_change_blocked(Some("pending"), 2));
        assert!(status_change_blocked(Some("cancelled"), 1));
        // staying done, editing without a status, or having no child is fine
        assert!(!status_change_blocked(Some("done"), 1));
        assert!(!status_change_blocked(None, 1));
        assert!(!status_change_blocked(Some("hold"), 0));
    }
}
