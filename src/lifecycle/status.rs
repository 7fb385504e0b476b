//! # Stage Status Aggregator
//!
//! The single source of truth for the three-state accordion status of each
//! fulfillment stage, and for the order-level ready-to-close predicate.
//! Both API responses and the UI consume this derivation; nothing else
//! recomputes it.
//!
//! For a stage, `eligible` counts items that could still advance into it,
//! `total` counts records that exist, and `completed` counts those done.
//! With `universe = eligible + total`, the rule is evaluated in order:
//!
//! 1. `total == 0` → Not Started
//! 2. `universe > 0 && total >= universe && completed == total` → Done
//! 3. otherwise → In-Progress

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::constants::{status_groups, statuses};
use crate::error::Result;
use crate::lifecycle::eligibility::EligibilityResolver;
use crate::lifecycle::stage::{Stage, StageStatus};
use crate::models::purchase_order::PurchaseOrder;

/// Raw counts feeding the status rule for one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    /// Items that could advance into the stage but have not
    pub eligible: i64,
    /// Records that exist for the stage
    pub total: i64,
    /// Existing records with a done status
    pub completed: i64,
}

impl StageCounts {
    /// Apply the three-state rule.
    pub fn status(&self) -> StageStatus {
        let universe = self.eligible + self.total;
        if self.total == 0 {
            StageStatus::NotStarted
        } else if universe > 0 && self.total >= universe && self.completed == self.total {
            StageStatus::Done
        } else {
            StageStatus::InProgress
        }
    }
}

/// One stage's derived status with the counts behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStatusSummary {
    pub stage: Stage,
    pub status: StageStatus,
    pub total_eligible: i64,
    pub completed: i64,
    pub pending: i64,
}

impl StageStatusSummary {
    fn from_counts(stage: Stage, counts: StageCounts) -> Self {
        Self {
            stage,
            status: counts.status(),
            total_eligible: counts.eligible,
            completed: counts.completed,
            pending: counts.total - counts.completed,
        }
    }
}

#[derive(Debug, FromRow)]
struct SectionCounts {
    total: i64,
    completed: i64,
    eligible: i64,
}

#[derive(Debug, FromRow)]
struct RecordCounts {
    total: i64,
    completed: i64,
}

/// Derives stage statuses for one backing store
#[derive(Clone)]
pub struct StageStatusAggregator {
    pool: PgPool,
    resolver: EligibilityResolver,
}

impl StageStatusAggregator {
    pub fn new(pool: PgPool) -> Self {
        let resolver = EligibilityResolver::new(pool.clone());
        Self { pool, resolver }
    }

    /// Status and counts for one stage of one order.
    pub async fn stage_status(&self, po_id: &str, stage: Stage) -> Result<StageStatusSummary> {
        let counts = match stage {
            Stage::Dispatch => self.dispatch_counts(po_id).await?,
            Stage::Document => self.section_counts(po_id, "document_status").await?,
            Stage::Delivery => self.section_counts(po_id, "delivery_status").await?,
            Stage::PreCommissioning => {
                let eligible = self.resolver.eligible_for_pre_commissioning(po_id).await?;
                let existing = self
                    .downstream_counts(
                        po_id,
                        "pre_commissioning_records pc \
                         JOIN serial_numbers sn ON sn.id = pc.serial_number_id \
                         JOIN dispatched_lines dl ON dl.id = sn.dispatched_line_id",
                        "pc.status",
                    )
                    .await?;
                StageCounts {
                    eligible: eligible.len() as i64,
                    total: existing.total,
                    completed: existing.completed,
                }
            }
            Stage::Commissioning => {
                let eligible = self.resolver.eligible_for_commissioning(po_id).await?;
                let existing = self
                    .downstream_counts(
                        po_id,
                        "commissioning_records c \
                         JOIN pre_commissioning_records pc ON pc.id = c.pre_commissioning_id \
                         JOIN serial_numbers sn ON sn.id = pc.serial_number_id \
                         JOIN dispatched_lines dl ON dl.id = sn.dispatched_line_id",
                        "c.status",
                    )
                    .await?;
                StageCounts {
                    eligible: eligible.len() as i64,
                    total: existing.total,
                    completed: existing.completed,
                }
            }
            Stage::Warranty => {
                let eligible = self.resolver.eligible_for_warranty(po_id).await?;
                let existing = self
                    .downstream_counts(
                        po_id,
                        "warranty_certificates w \
                         JOIN commissioning_records c ON c.id = w.commissioning_id \
                         JOIN pre_commissioning_records pc ON pc.id = c.pre_commissioning_id \
                         JOIN serial_numbers sn ON sn.id = pc.serial_number_id \
                         JOIN dispatched_lines dl ON dl.id = sn.dispatched_line_id",
                        "w.status",
                    )
                    .await?;
                StageCounts {
                    eligible: eligible.len() as i64,
                    total: existing.total,
                    completed: existing.completed,
                }
            }
        };

        Ok(StageStatusSummary::from_counts(stage, counts))
    }

    /// All six stage statuses in pipeline order.
    pub async fn stage_statuses(&self, po_id: &str) -> Result<Vec<StageStatusSummary>> {
        futures::future::try_join_all(
            Stage::ALL
                .iter()
                .map(|&stage| self.stage_status(po_id, stage)),
        )
        .await
    }

    /// True iff every stage is Done: quantity fully allocated, documents
    /// complete, delivery confirmed, and the full downstream chain done.
    pub async fn is_ready_to_close(&self, po_id: &str) -> Result<bool> {
        PurchaseOrder::get(&self.pool, po_id).await?;
        for stage in Stage::ALL {
            if !self.stage_status(po_id, stage).await?.status.is_done() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Stages not yet Done, for close-rejection messages.
    pub(crate) async fn unfinished_stages(&self, po_id: &str) -> Result<Vec<Stage>> {
        let mut unfinished = Vec::new();
        for stage in Stage::ALL {
            if !self.stage_status(po_id, stage).await?.status.is_done() {
                unfinished.push(stage);
            }
        }
        Ok(unfinished)
    }

    /// Dispatch stage: eligible = order lines with remaining quantity,
    /// total/completed over the order's dispatch records (core section).
    async fn dispatch_counts(&self, po_id: &str) -> Result<StageCounts> {
        let eligible = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM order_lines ol
            WHERE ol.po_id = $1
              AND ol.total_quantity > COALESCE((
                    SELECT SUM(dl.dispatched_quantity)
                    FROM dispatched_lines dl
                    JOIN dispatch_records dr ON dr.id = dl.dispatch_id
                    WHERE dr.po_id = ol.po_id AND dl.product = ol.product
              ), 0)
            "#,
        )
        .bind(po_id)
        .fetch_one(&self.pool)
        .await?;

        let records = sqlx::query_as::<_, RecordCounts>(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE core_status = $2) AS completed
            FROM dispatch_records
            WHERE po_id = $1
            "#,
        )
        .bind(po_id)
        .bind(statuses::DONE)
        .fetch_one(&self.pool)
        .await?;

        Ok(StageCounts {
            eligible,
            total: records.total,
            completed: records.completed,
        })
    }

    /// Document/delivery stages: one row per dispatch record; a section
    /// still open (pending or hold) keeps the stage in progress.
    async fn section_counts(&self, po_id: &str, status_column: &str) -> Result<StageCounts> {
        let sql = format!(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE {status_column} = ANY($2)) AS completed,
                   COUNT(*) FILTER (WHERE {status_column} = ANY($3)) AS eligible
            FROM dispatch_records
            WHERE po_id = $1
            "#
        );
        let counts = sqlx::query_as::<_, SectionCounts>(&sql)
            .bind(po_id)
            .bind(status_groups::COMPLETED)
            .bind(status_groups::OPEN)
            .fetch_one(&self.pool)
            .await?;

        Ok(StageCounts {
            eligible: counts.eligible,
            total: counts.total,
            completed: counts.completed,
        })
    }

    async fn downstream_counts(
        &self,
        po_id: &str,
        from_clause: &str,
        status_column: &str,
    ) -> Result<RecordCounts> {
        let sql = format!(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE {status_column} = $2) AS completed
            FROM {from_clause}
            JOIN dispatch_records dr ON dr.id = dl.dispatch_id
            WHERE dr.po_id = $1
            "#
        );
        let counts = sqlx::query_as::<_, RecordCounts>(&sql)
            .bind(po_id)
            .bind(statuses::DONE)
            .fetch_one(&self.pool)
            .await?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(eligible: i64, total: i64, completed: i64) -> StageCounts {
        StageCounts {
            eligible,
            total,
            completed,
        }
    }

    #[test]
    fn no_records_means_not_started() {
        assert_eq!(counts(0, 0, 0).status(), StageStatus::NotStarted);
        assert_eq!(counts(5, 0, 0).status(), StageStatus::NotStarted);
    }

    #[test]
    fn done_requires_empty_eligible_set_and_all_complete() {
        assert_eq!(counts(0, 3, 3).status(), StageStatus::Done);
        // eligible items remain
        assert_eq!(counts(1, 3, 3).status(), StageStatus::InProgress);
        // a record is not done yet
        assert_eq!(counts(0, 3, 2).status(), StageStatus::InProgress);
    }

    #[test]
    fn partial_progress_is_in_progress() {
        assert_eq!(counts(2, 1, 0).status(), StageStatus::InProgress);
        assert_eq!(counts(0, 2, 1).status(), StageStatus::InProgress);
    }

    #[test]
    fn rule_is_evaluated_in_order() {
        // total == 0 wins even with a nonempty universe
        assert_eq!(counts(4, 0, 0).status(), StageStatus::NotStarted);
    }

    #[test]
    fn summary_exposes_pending_count() {
        let summary = StageStatusSummary::from_counts(Stage::Commissioning, counts(1, 4, 3));
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.total_eligible, 1);
        assert_eq!(summary.status, StageStatus::InProgress);
    }
}
