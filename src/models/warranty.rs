//! # Warranty Certificate Model
//!
//! The last link of the chain: one certificate per commissioned unit, 1:1
//! through a UNIQUE foreign key on `commissioning_id`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::constants::entities;
use crate::error::{FulfillmentError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WarrantyCertificate {
    pub id: i64,
    pub commissioning_id: i64,
    pub status: String,
    pub certificate_number: Option<String>,
    pub warranty_start: Option<NaiveDate>,
    pub warranty_end: Option<NaiveDate>,
    pub created_by_id: i64,
    pub updated_by_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields shared by every certificate in one creation batch, e.g. one
/// certificate number and date range stamped onto the whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarrantyShared {
    pub certificate_number: Option<String>,
    pub warranty_start: Option<NaiveDate>,
    pub warranty_end: Option<NaiveDate>,
}

/// Partial update; unspecified fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateWarranty {
    pub status: Option<String>,
    pub certificate_number: Option<String>,
    pub warranty_start: Option<NaiveDate>,
    pub warranty_end: Option<NaiveDate>,
}

/// A certificate joined with its upstream context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WarrantyDetail {
    pub id: i64,
    pub commissioning_id: i64,
    pub pre_commissioning_id: i64,
    pub status: String,
    pub certificate_number: Option<String>,
    pub warranty_start: Option<NaiveDate>,
    pub warranty_end: Option<NaiveDate>,
    pub commissioning_date: Option<NaiveDate>,
    pub serial_number: String,
    pub product_name: String,
    pub dispatch_id: i64,
    pub po_id: String,
}

const DETAIL_SELECT: &str = r#"
    SELECT w.id, w.commissioning_id, c.pre_commissioning_id, w.status,
           w.certificate_number, w.warranty_start, w.warranty_end,
           c.commissioning_date,
           sn.serial AS serial_number,
           dl.product AS product_name,
           dl.dispatch_id,
           dr.po_id
    FROM warranty_certificates w
    JOIN commissioning_records c ON c.id = w.commissioning_id
    JOIN pre_commissioning_records pc ON pc.id = c.pre_commissioning_id
    JOIN serial_numbers sn ON sn.id = pc.serial_number_id
    JOIN dispatched_lines dl ON dl.id = sn.dispatched_line_id
    JOIN dispatch_records dr ON dr.id = dl.dispatch_id
"#;

impl WarrantyCertificate {
    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<WarrantyCertificate>> {
        let record = sqlx::query_as::<_, WarrantyCertificate>(
            "SELECT * FROM warranty_certificates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(record)
    }

    pub async fn get(pool: &PgPool, id: i64) -> Result<WarrantyCertificate> {
        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| FulfillmentError::not_found(entities::WARRANTY_CERTIFICATE, id))
    }

    pub async fn detail(pool: &PgPool, id: i64) -> Result<WarrantyDetail> {
        let sql = format!("{DETAIL_SELECT} WHERE w.id = $1");
        sqlx::query_as::<_, WarrantyDetail>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| FulfillmentError::not_found(entities::WARRANTY_CERTIFICATE, id))
    }

    pub async fn details_for_po(pool: &PgPool, po_id: &str) -> Result<Vec<WarrantyDetail>> {
        let sql = format!("{DETAIL_SELECT} WHERE dr.po_id = $1 ORDER BY w.id");
        let rows = sqlx::query_as::<_, WarrantyDetail>(&sql)
            .bind(po_id)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    pub(crate) async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        commissioning_id: i64,
        shared: &WarrantyShared,
        status: &str,
        actor_id: i64,
    ) -> Result<WarrantyCertificate> {
        sqlx::query_as::<_, WarrantyCertificate>(
            r#"
            INSERT INTO warranty_certificates
                (commissioning_id, status, certificate_number, warranty_start, warranty_end, created_by_id, updated_by_id)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING *
            "#,
        )
        .bind(commissioning_id)
        .bind(status)
        .bind(&shared.certificate_number)
        .bind(shared.warranty_start)
        .bind(shared.warranty_end)
        .bind(actor_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            crate::error::map_unique_violation(
                e,
                entities::COMMISSIONING,
                commissioning_id,
                format!("warranty certificate already exists for commissioning {commissioning_id}"),
            )
        })
    }

    pub(crate) async fn apply_update(
        pool: &PgPool,
        id: i64,
        status: Option<String>,
        update: UpdateWarranty,
        actor_id: i64,
    ) -> Result<WarrantyCertificate> {
        let record = sqlx::query_as::<_, WarrantyCertificate>(
            r#"
            UPDATE warranty_certificates
            SET status = COALESCE($2, status),
                certificate_number = COALESCE($3, certificate_number),
                warranty_start = COALESCE($4, warranty_start),
                warranty_end = COALESCE($5, warranty_end),
                updated_by_id = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(update.certificate_number)
        .bind(update.warranty_start)
        .bind(update.warranty_end)
        .bind(actor_id)
        .fetch_one(pool)
        .await?;
        Ok(record)
    }
}
