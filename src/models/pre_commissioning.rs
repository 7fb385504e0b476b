//! # Pre-Commissioning Model
//!
//! One pre-commissioning visit per delivered physical unit. The record
//! references a `serial_numbers` row through a UNIQUE foreign key, so a
//! given serial can never be pre-commissioned twice — the constraint, not
//! the application pre-check, is what breaks concurrent duplicate creation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::constants::entities;
use crate::error::{FulfillmentError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PreCommissioningRecord {
    pub id: i64,
    pub serial_number_id: i64,
    pub status: String,
    pub engineer: Option<String>,
    pub visit_date: Option<NaiveDate>,
    pub remarks: Option<String>,
    pub created_by_id: i64,
    pub updated_by_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields shared by every record in one creation batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreCommissioningShared {
    pub engineer: Option<String>,
    pub visit_date: Option<NaiveDate>,
    pub remarks: Option<String>,
}

/// Partial update; unspecified fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePreCommissioning {
    pub status: Option<String>,
    pub engineer: Option<String>,
    pub visit_date: Option<NaiveDate>,
    pub remarks: Option<String>,
}

/// A record joined with its upstream context (serial, product, dispatch,
/// order), as returned by batch creation and the detail finders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PreCommissioningDetail {
    pub id: i64,
    pub serial_number_id: i64,
    pub status: String,
    pub engineer: Option<String>,
    pub visit_date: Option<NaiveDate>,
    pub remarks: Option<String>,
    pub serial_number: String,
    pub product_name: String,
    pub dispatch_id: i64,
    pub po_id: String,
}

const DETAIL_SELECT: &str = r#"
    SELECT pc.id, pc.serial_number_id, pc.status, pc.engineer, pc.visit_date, pc.remarks,
           sn.serial AS serial_number,
           dl.product AS product_name,
           dl.dispatch_id,
           dr.po_id
    FROM pre_commissioning_records pc
    JOIN serial_numbers sn ON sn.id = pc.serial_number_id
    JOIN dispatched_lines dl ON dl.id = sn.dispatched_line_id
    JOIN dispatch_records dr ON dr.id = dl.dispatch_id
"#;

impl PreCommissioningRecord {
    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<PreCommissioningRecord>> {
        let record = sqlx::query_as::<_, PreCommissioningRecord>(
            "SELECT * FROM pre_commissioning_records WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(record)
    }

    pub async fn get(pool: &PgPool, id: i64) -> Result<PreCommissioningRecord> {
        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| FulfillmentError::not_found(entities::PRE_COMMISSIONING, id))
    }

    /// Detail row for one record
    pub async fn detail(pool: &PgPool, id: i64) -> Result<PreCommissioningDetail> {
        let sql = format!("{DETAIL_SELECT} WHERE pc.id = $1");
        sqlx::query_as::<_, PreCommissioningDetail>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| FulfillmentError::not_found(entities::PRE_COMMISSIONING, id))
    }

    /// All records for an order, with upstream context
    pub async fn details_for_po(pool: &PgPool, po_id: &str) -> Result<Vec<PreCommissioningDetail>> {
        let sql = format!("{DETAIL_SELECT} WHERE dr.po_id = $1 ORDER BY pc.id");
        let rows = sqlx::query_as::<_, PreCommissioningDetail>(&sql)
            .bind(po_id)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    /// Insert one record inside a batch transaction. A unique violation on
    /// `serial_number_id` is surfaced as the conflict it represents.
    pub(crate) async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        serial_number_id: i64,
        shared: &PreCommissioningShared,
        status: &str,
        actor_id: i64,
    ) -> Result<PreCommissioningRecord> {
        sqlx::query_as::<_, PreCommissioningRecord>(
            r#"
            INSERT INTO pre_commissioning_records
                (serial_number_id, status, engineer, visit_date, remarks, created_by_id, updated_by_id)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING *
            "#,
        )
        .bind(serial_number_id)
        .bind(status)
        .bind(&shared.engineer)
        .bind(shared.visit_date)
        .bind(&shared.remarks)
        .bind(actor_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            crate::error::map_unique_violation(
                e,
                entities::SERIAL_NUMBER,
                serial_number_id,
                "pre-commissioning already exists for this serial number",
            )
        })
    }

    pub(crate) async fn apply_update(
        pool: &PgPool,
        id: i64,
        status: Option<String>,
        update: UpdatePreCommissioning,
        actor_id: i64,
    ) -> Result<PreCommissioningRecord> {
        let record = sqlx::query_as::<_, PreCommissioningRecord>(
            r#"
            UPDATE pre_commissioning_records
            SET status = COALESCE($2, status),
                engineer = COALESCE($3, engineer),
                visit_date = COALESCE($4, visit_date),
                remarks = COALESCE($5, remarks),
                updated_by_id = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(update.engineer)
        .bind(update.visit_date)
        .bind(update.remarks)
        .bind(actor_id)
        .fetch_one(pool)
        .await?;
        Ok(record)
    }
}
