//! # Commissioning Model
//!
//! One commissioning per pre-commissioned unit, 1:1 through a UNIQUE
//! foreign key on `pre_commissioning_id`. Created only when the referenced
//! pre-commissioning record is done.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::constants::entities;
use crate::error::{FulfillmentError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CommissioningRecord {
    pub id: i64,
    pub pre_commissioning_id: i64,
    pub status: String,
    pub commissioning_date: Option<NaiveDate>,
    pub engineer: Option<String>,
    pub remarks: Option<String>,
    pub created_by_id: i64,
    pub updated_by_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields shared by every record in one creation batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommissioningShared {
    pub commissioning_date: Option<NaiveDate>,
    pub engineer: Option<String>,
    pub remarks: Option<String>,
}

/// Partial update; unspecified fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCommissioning {
    pub status: Option<String>,
    pub commissioning_date: Option<NaiveDate>,
    pub engineer: Option<String>,
    pub remarks: Option<String>,
}

/// A record joined with its upstream context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CommissioningDetail {
    pub id: i64,
    pub pre_commissioning_id: i64,
    pub status: String,
    pub commissioning_date: Option<NaiveDate>,
    pub engineer: Option<String>,
    pub remarks: Option<String>,
    pub serial_number: String,
    pub product_name: String,
    pub dispatch_id: i64,
    pub po_id: String,
}

const DETAIL_SELECT: &str = r#"
    SELECT c.id, c.pre_commissioning_id, c.status, c.commissioning_date, c.engineer, c.remarks,
           sn.serial AS serial_number,
           dl.product AS product_name,
           dl.dispatch_id,
           dr.po_id
    FROM commissioning_records c
    JOIN pre_commissioning_records pc ON pc.id = c.pre_commissioning_id
    JOIN serial_numbers sn ON sn.id = pc.serial_number_id
    JOIN dispatched_lines dl ON dl.id = sn.dispatched_line_id
    JOIN dispatch_records dr ON dr.id = dl.dispatch_id
"#;

impl CommissioningRecord {
    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<CommissioningRecord>> {
        let record = sqlx::query_as::<_, CommissioningRecord>(
            "SELECT * FROM commissioning_records WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(record)
    }

    pub async fn get(pool: &PgPool, id: i64) -> Result<CommissioningRecord> {
        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| FulfillmentError::not_found(entities::COMMISSIONING, id))
    }

    pub async fn detail(pool: &PgPool, id: i64) -> Result<CommissioningDetail> {
        let sql = format!("{DETAIL_SELECT} WHERE c.id = $1");
        sqlx::query_as::<_, CommissioningDetail>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| FulfillmentError::not_found(entities::COMMISSIONING, id))
    }

    pub async fn details_for_po(pool: &PgPool, po_id: &str) -> Result<Vec<CommissioningDetail>> {
        let sql = format!("{DETAIL_SELECT} WHERE dr.po_id = $1 ORDER BY c.id");
        let rows = sqlx::query_as::<_, CommissioningDetail>(&sql)
            .bind(po_id)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    pub(crate) async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        pre_commissioning_id: i64,
        shared: &CommissioningShared,
        status: &str,
        actor_id: i64,
    ) -> Result<CommissioningRecord> {
        sqlx::query_as::<_, CommissioningRecord>(
            r#"
            INSERT INTO commissioning_records
                (pre_commissioning_id, status, commissioning_date, engineer, remarks, created_by_id, updated_by_id)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING *
            "#,
        )
        .bind(pre_commissioning_id)
        .bind(status)
        .bind(shared.commissioning_date)
        .bind(&shared.engineer)
        .bind(&shared.remarks)
        .bind(actor_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            crate::error::map_unique_violation(
                e,
                entities::PRE_COMMISSIONING,
                pre_commissioning_id,
                format!("commissioning already exists for pre-commissioning {pre_commissioning_id}"),
            )
        })
    }

    pub(crate) async fn apply_update(
        pool: &PgPool,
        id: i64,
        status: Option<String>,
        update: UpdateCommissioning,
        actor_id: i64,
    ) -> Result<CommissioningRecord> {
        let record = sqlx::query_as::<_, CommissioningRecord>(
            r#"
            UPDATE commissioning_records
            SET status = COALESCE($2, status),
                commissioning_date = COALESCE($3, commissioning_date),
                engineer = COALESCE($4, engineer),
                remarks = COALESCE($5, remarks),
                updated_by_id = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(update.commissioning_date)
        .bind(update.engineer)
        .bind(update.remarks)
        .bind(actor_id)
        .fetch_one(pool)
        .await?;
        Ok(record)
    }
}
