//! # Quantity Ledger
//!
//! Conservation of dispatched quantity against the ordered quantity. For a
//! product on an order line, the remaining dispatchable quantity is the
//! line's total minus everything already allocated across the order's
//! dispatch records, floored at zero. The record currently being edited is
//! excluded so an edit can re-allocate its own quantity.

use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Postgres, Row, Transaction};

use crate::constants::entities;
use crate::error::{FulfillmentError, Result};

/// Remaining dispatchable quantity: `max(0, total - sum(dispatched))`.
pub fn available_quantity(total_quantity: i32, dispatched: &[i32]) -> i32 {
    let allocated: i32 = dispatched.iter().sum();
    (total_quantity - allocated).max(0)
}

/// Remaining dispatchable quantity for a product on an order, computed
/// fresh from persisted state. `excluding_dispatch_id` omits the dispatch
/// record currently being edited, if any.
pub async fn available<'e, E>(
    executor: E,
    po_id: &str,
    product: &str,
    excluding_dispatch_id: Option<i64>,
) -> Result<i32>
where
    E: PgExecutor<'e>,
{
    let row: Option<PgRow> = sqlx::query(
        r#"
        SELECT GREATEST(0, ol.total_quantity - COALESCE(SUM(dl.dispatched_quantity), 0))::INT
            AS available
        FROM order_lines ol
        LEFT JOIN dispatch_records dr
            ON dr.po_id = ol.po_id
            AND ($3::BIGINT IS NULL OR dr.id <> $3)
        LEFT JOIN dispatched_lines dl
            ON dl.dispatch_id = dr.id AND dl.product = ol.product
        WHERE ol.po_id = $1 AND ol.product = $2
        GROUP BY ol.id, ol.total_quantity
        "#,
    )
    .bind(po_id)
    .bind(product)
    .bind(excluding_dispatch_id)
    .fetch_optional(executor)
    .await?;

    let row = row.ok_or_else(|| {
        FulfillmentError::not_found(entities::ORDER_LINE, format!("{po_id}/{product}"))
    })?;
    Ok(row.try_get::<i32, _>("available")?)
}

/// Take row locks on the order lines for the given products so that
/// concurrent allocation checks against the same lines serialize. Locks
/// are taken in id order and held to the end of the transaction.
pub(crate) async fn lock_lines(
    tx: &mut Transaction<'_, Postgres>,
    po_id: &str,
    products: Vec<String>,
) -> Result<()> {
    sqlx::query(
        "SELECT id FROM order_lines WHERE po_id = $1 AND product = ANY($2) ORDER BY id FOR UPDATE",
    )
    .bind(po_id)
    .bind(products)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Reject an allocation request that exceeds the remaining quantity.
/// The rejection is a validation error, never a silent clamp.
pub async fn validate_allocation<'e, E>(
    executor: E,
    po_id: &str,
    product: &str,
    requested: i32,
    excluding_dispatch_id: Option<i64>,
) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let available = available(executor, po_id, product, excluding_dispatch_id).await?;
    if requested > available {
        return Err(FulfillmentError::validation(format!(
            "requested quantity {requested} for product '{product}' exceeds available quantity ({available})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_is_total_minus_allocations() {
        assert_eq!(available_quantity(10, &[]), 10);
        assert_eq!(available_quantity(10, &[6]), 4);
        assert_eq!(available_quantity(10, &[6, 4]), 0);
    }

    #[test]
    fn available_never_goes_negative() {
        // Over-allocation cannot happen through valid operations, but the
        // ledger still floors at zero rather than reporting a negative.
        assert_eq!(available_quantity(10, &[6, 6]), 0);
        assert_eq!(available_quantity(0, &[1]), 0);
    }

    #[test]
    fn ledger_walk_from_ten() {
        // total 10: dispatch 6, a request for 5 must fail, 4 fits, then 1 must fail
        let mut dispatched = vec![6];
        assert_eq!(available_quantity(10, &dispatched), 4);
        assert!(5 > available_quantity(10, &dispatched));
        dispatched.push(4);
        assert_eq!(available_quantity(10, &dispatched), 0);
        assert!(1 > available_quantity(10, &dispatched));
    }
}
