//! Concurrency check for the one-to-one downstream chain: when two batches
//! race to commission the same pre-commissioning record, the UNIQUE
//! constraint on `commissioning_records.pre_commissioning_id` must let
//! exactly one through and surface the other as a conflict.
//!
//! Needs a PostgreSQL instance; the test is a no-op unless DATABASE_URL is
//! set.

use chrono::{NaiveDate, Utc};
use fulfillment_core::lifecycle::LifecycleOrchestrator;
use fulfillment_core::models::dispatch::{
    LineSerials, UpdateDeliverySection, UpdateDocumentSection,
};
use fulfillment_core::models::pre_commissioning::UpdatePreCommissioning;
use fulfillment_core::models::{
    CommissioningShared, DispatchRecord, NewDispatchRecord, NewDispatchedLine, NewOrderLine,
    NewPurchaseOrder, PreCommissioningShared, PurchaseOrder,
};
use sqlx::PgPool;

const ACTOR: i64 = 1;

/// Drive one unit through dispatch, documents and delivery, then create a
/// done pre-commissioning record for it and return that record's id.
async fn seed_done_pre_commissioning(pool: &PgPool, tag: i64) -> i64 {
    let po_id = format!("PO-RACE-{tag}");
    let product = format!("P-{tag}");

    PurchaseOrder::create(
        pool,
        NewPurchaseOrder {
            po_id: po_id.clone(),
            client: "Acme Water".to_string(),
            order_date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            delivery_date: None,
            lines: vec![NewOrderLine {
                category: "pumps".to_string(),
                product: product.clone(),
                ordered_quantity: 1,
                spare_quantity: 0,
            }],
        },
        ACTOR,
    )
    .await
    .unwrap();

    let dispatch = DispatchRecord::create(
        pool,
        NewDispatchRecord {
            po_id: po_id.clone(),
            lines: vec![NewDispatchedLine {
                product,
                dispatched_quantity: 1,
            }],
        },
        ACTOR,
    )
    .await
    .unwrap();

    let line = DispatchRecord::lines(pool, dispatch.id)
        .await
        .unwrap()
        .remove(0);
    DispatchRecord::update_document(
        pool,
        dispatch.id,
        UpdateDocumentSection {
            status: Some("done".to_string()),
            serials: Some(vec![LineSerials {
                dispatched_line_id: line.id,
                serials: format!("SN-{tag}"),
            }]),
            ..Default::default()
        },
        ACTOR,
    )
    .await
    .unwrap();
    DispatchRecord::update_delivery(
        pool,
        dispatch.id,
        UpdateDeliverySection {
            status: Some("done".to_string()),
            ..Default::default()
        },
        ACTOR,
    )
    .await
    .unwrap();

    let serial = DispatchRecord::serials_for_line(pool, line.id)
        .await
        .unwrap()
        .remove(0);

    let orchestrator = LifecycleOrchestrator::new(pool.clone());
    let created = orchestrator
        .create_pre_commissioning_batch(&[serial.id], &PreCommissioningShared::default(), ACTOR)
        .await
        .unwrap();
    let pre_commissioning_id = created[0].id;
    orchestrator
        .update_pre_commissioning(
            pre_commissioning_id,
            UpdatePreCommissioning {
                status: Some("done".to_string()),
                ..Default::default()
            },
            ACTOR,
        )
        .await
        .unwrap();
    pre_commissioning_id
}

#[tokio::test]
async fn concurrent_commissioning_of_one_unit_yields_one_winner() {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let pool = PgPool::connect(&url).await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let tag = Utc::now().timestamp_micros();
    let pre_commissioning_id = seed_done_pre_commissioning(&pool, tag).await;

    let a = LifecycleOrchestrator::new(pool.clone());
    let b = LifecycleOrchestrator::new(pool.clone());
    let shared = CommissioningShared::default();
    let ids = [pre_commissioning_id];

    let (first, second) = tokio::join!(
        a.create_commissioning_batch(&ids, &shared, ACTOR),
        b.create_commissioning_batch(&ids, &shared, ACTOR),
    );

    let (winner, loser) = match (first, second) {
        (Ok(winner), Err(loser)) => (winner, loser),
        (Err(loser), Ok(winner)) => (winner, loser),
        other => panic!("expected exactly one success and one conflict, got {other:?}"),
    };
    assert_eq!(winner.len(), 1);
    assert_eq!(winner[0].pre_commissioning_id, pre_commissioning_id);
    assert!(loser.is_conflict(), "loser should be a conflict: {loser}");
}
