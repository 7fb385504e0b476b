//! # Purchase Order Model
//!
//! Order header plus its ordered sequence of line items. Maps to the
//! `purchase_orders` and `order_lines` tables.
//!
//! Line items are replaced wholesale on update (delete-all-then-recreate in
//! one transaction), never partially patched. The header `status` is
//! `open` until the order is closed; closing is terminal and every
//! mutating path checks it first.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::constants::{entities, statuses};
use crate::error::{map_unique_violation, FulfillmentError, Result};

/// Order header. The id is the user-facing order number, an opaque string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PurchaseOrder {
    pub po_id: String,
    pub client: String,
    pub order_date: NaiveDate,
    pub delivery_date: Option<NaiveDate>,
    pub status: String,
    pub created_by_id: i64,
    pub updated_by_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One ordered product line within a purchase order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrderLine {
    pub id: i64,
    pub po_id: String,
    pub category: String,
    pub product: String,
    pub ordered_quantity: i32,
    pub spare_quantity: i32,
    pub total_quantity: i32,
}

/// New purchase order for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub po_id: String,
    pub client: String,
    pub order_date: NaiveDate,
    pub delivery_date: Option<NaiveDate>,
    pub lines: Vec<NewOrderLine>,
}

/// New order line for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub category: String,
    pub product: String,
    pub ordered_quantity: i32,
    pub spare_quantity: i32,
}

impl NewOrderLine {
    /// Total dispatchable quantity. `ordered + spare == total` by
    /// construction; the table carries a CHECK to the same effect.
    pub fn total_quantity(&self) -> i32 {
        self.ordered_quantity + self.spare_quantity
    }

    fn validate(&self) -> Result<()> {
        if self.product.trim().is_empty() {
            return Err(FulfillmentError::validation("product must not be empty"));
        }
        if self.ordered_quantity < 0 || self.spare_quantity < 0 {
            return Err(FulfillmentError::validation(format!(
                "quantities for product '{}' must not be negative",
                self.product
            )));
        }
        if self.total_quantity() == 0 {
            return Err(FulfillmentError::validation(format!(
                "product '{}' must order at least one unit",
                self.product
            )));
        }
        Ok(())
    }
}

/// Partial header update; unspecified fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePurchaseOrder {
    pub client: Option<String>,
    pub order_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
}

impl PurchaseOrder {
    /// Create the header and its lines in one transaction.
    pub async fn create(
        pool: &PgPool,
        new_order: NewPurchaseOrder,
        actor_id: i64,
    ) -> Result<PurchaseOrder> {
        if new_order.po_id.trim().is_empty() {
            return Err(FulfillmentError::validation("po_id must not be empty"));
        }
        if new_order.lines.is_empty() {
            return Err(FulfillmentError::validation(
                "a purchase order needs at least one line item",
            ));
        }
        validate_line_set(&new_order.lines)?;

        let mut tx = pool.begin().await?;

        let order = sqlx::query_as::<_, PurchaseOrder>(
            r#"
            INSERT INTO purchase_orders
                (po_id, client, order_date, delivery_date, status, created_by_id, updated_by_id)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING *
            "#,
        )
        .bind(&new_order.po_id)
        .bind(&new_order.client)
        .bind(new_order.order_date)
        .bind(new_order.delivery_date)
        .bind(statuses::ORDER_OPEN)
        .bind(actor_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            map_unique_violation(
                e,
                entities::PURCHASE_ORDER,
                &new_order.po_id,
                "purchase order already exists",
            )
        })?;

        insert_lines(&mut tx, &new_order.po_id, &new_order.lines).await?;
        tx.commit().await?;

        tracing::info!(po_id = %order.po_id, lines = new_order.lines.len(), "purchase order created");
        Ok(order)
    }

    /// Find an order by id
    pub async fn find_by_id(pool: &PgPool, po_id: &str) -> Result<Option<PurchaseOrder>> {
        let order =
            sqlx::query_as::<_, PurchaseOrder>("SELECT * FROM purchase_orders WHERE po_id = $1")
                .bind(po_id)
                .fetch_optional(pool)
                .await?;
        Ok(order)
    }

    /// Find an order by id, or fail with NotFound
    pub async fn get(pool: &PgPool, po_id: &str) -> Result<PurchaseOrder> {
        Self::find_by_id(pool, po_id)
            .await?
            .ok_or_else(|| FulfillmentError::not_found(entities::PURCHASE_ORDER, po_id))
    }

    /// Line items in their ordered sequence
    pub async fn lines(pool: &PgPool, po_id: &str) -> Result<Vec<OrderLine>> {
        let lines =
            sqlx::query_as::<_, OrderLine>("SELECT * FROM order_lines WHERE po_id = $1 ORDER BY id")
                .bind(po_id)
                .fetch_all(pool)
                .await?;
        Ok(lines)
    }

    /// Partial header update. Refused once the order is closed.
    pub async fn update_header(
        pool: &PgPool,
        po_id: &str,
        update: UpdatePurchaseOrder,
        actor_id: i64,
    ) -> Result<PurchaseOrder> {
        Self::get(pool, po_id).await?.ensure_open()?;

        let order = sqlx::query_as::<_, PurchaseOrder>(
            r#"
            UPDATE purchase_orders
            SET client = COALESCE($2, client),
                order_date = COALESCE($3, order_date),
                delivery_date = COALESCE($4, delivery_date),
                updated_by_id = $5,
                updated_at = NOW()
            WHERE po_id = $1
            RETURNING *
            "#,
        )
        .bind(po_id)
        .bind(update.client)
        .bind(update.order_date)
        .bind(update.delivery_date)
        .bind(actor_id)
        .fetch_one(pool)
        .await?;

        Ok(order)
    }

    /// Replace every line item (delete-all-then-recreate, one transaction).
    /// Refused once the order is closed or once any dispatch exists, since
    /// dispatched quantities are conserved against the lines.
    pub async fn replace_lines(
        pool: &PgPool,
        po_id: &str,
        lines: Vec<NewOrderLine>,
        actor_id: i64,
    ) -> Result<Vec<OrderLine>> {
        Self::get(pool, po_id).await?.ensure_open()?;
        if lines.is_empty() {
            return Err(FulfillmentError::validation(
                "a purchase order needs at least one line item",
            ));
        }
        validate_line_set(&lines)?;

        let mut tx = pool.begin().await?;

        let dispatch_count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM dispatch_records WHERE po_id = $1")
                .bind(po_id)
                .fetch_one(&mut *tx)
                .await?;
        if dispatch_count > 0 {
            return Err(FulfillmentError::conflict(
                entities::PURCHASE_ORDER,
                po_id,
                "line items cannot be replaced after dispatch has begun",
            ));
        }

        sqlx::query("DELETE FROM order_lines WHERE po_id = $1")
            .bind(po_id)
            .execute(&mut *tx)
            .await?;
        insert_lines(&mut tx, po_id, &lines).await?;

        sqlx::query(
            "UPDATE purchase_orders SET updated_by_id = $2, updated_at = NOW() WHERE po_id = $1",
        )
        .bind(po_id)
        .bind(actor_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Self::lines(pool, po_id).await
    }

    /// Whether this order has been closed
    pub fn is_closed(&self) -> bool {
        self.status == statuses::ORDER_CLOSED
    }

    /// Fail with a conflict if the order is closed.
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(FulfillmentError::conflict(
                entities::PURCHASE_ORDER,
                &self.po_id,
                "order is closed and accepts no further writes",
            ));
        }
        Ok(())
    }
}

/// Each line must validate on its own, and a product may appear on one
/// line only — the ledger conserves quantity per (order, product), backed
/// by a UNIQUE constraint on the table.
fn validate_line_set(lines: &[NewOrderLine]) -> Result<()> {
    let mut products = std::collections::HashSet::new();
    for line in lines {
        line.validate()?;
        if !products.insert(line.product.as_str()) {
            return Err(FulfillmentError::validation(format!(
                "product '{}' appears on more than one line",
                line.product
            )));
        }
    }
    Ok(())
}

async fn insert_lines(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    po_id: &str,
    lines: &[NewOrderLine],
) -> Result<()> {
    for line in lines {
        sqlx::query(
            r#"
            INSERT INTO order_lines
                (po_id, category, product, ordered_quantity, spare_quantity, total_quantity)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(po_id)
        .bind(&line.category)
        .bind(&line.product)
        .bind(line.ordered_quantity)
        .bind(line.spare_quantity)
        .bind(line.total_quantity())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product: &str, ordered: i32, spare: i32) -> NewOrderLine {
        NewOrderLine {
            category: "pumps".to_string(),
            product: product.to_string(),
            ordered_quantity: ordered,
            spare_quantity: spare,
        }
    }

    #[test]
    fn total_is_ordered_plus_spare() {
        assert_eq!(line("P-100", 8, 2).total_quantity(), 10);
        assert_eq!(line("P-100", 5, 0).total_quantity(), 5);
    }

    #[test]
    fn negative_and_zero_quantities_are_rejected() {
        assert!(line("P-100", -1, 2).validate().is_err());
        assert!(line("P-100", 0, 0).validate().is_err());
        assert!(line("", 1, 0).validate().is_err());
        assert!(line("P-100", 1, 0).validate().is_ok());
    }

    #[test]
    fn a_product_may_appear_on_one_line_only() {
        let err = validate_line_set(&[line("P-100", 5, 0), line("P-100", 3, 0)]).unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation { .. }));
        assert!(validate_line_set(&[line("P-100", 5, 0), line("P-200", 3, 0)]).is_ok());
    }

    #[test]
    fn closed_orders_refuse_writes() {
        let order = PurchaseOrder {
            po_id: "PO-2024-001".to_string(),
            client: "Acme Water".to_string(),
            order_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            delivery_date: None,
            status: statuses::ORDER_CLOSED.to_string(),
            created_by_id: 1,
            updated_by_id: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(order.is_closed());
        let err = order.ensure_open().unwrap_err();
        assert!(err.is_conflict());
    }
}
