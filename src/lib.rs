#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Fulfillment Core
//!
//! Lifecycle eligibility and status reconciliation engine for an
//! order-management back office. A purchase order moves through six
//! fulfillment stages — dispatch, dispatch documentation, delivery
//! confirmation, pre-commissioning, commissioning, warranty certificate —
//! each stage producing child records gated by the completion state of the
//! previous one.
//!
//! ## Architecture
//!
//! - **Quantity Ledger** — remaining dispatchable quantity per order line;
//!   allocations that exceed it are rejected, never clamped.
//! - **Serial Reconciler** — serial-number tokens recorded at the document
//!   stage must match the dispatched quantity exactly.
//! - **Eligibility Resolver** — per-stage candidate sets: upstream done,
//!   no downstream record yet, computed fresh from persisted state.
//! - **Lifecycle Orchestrator** — atomic bulk creation of downstream
//!   records with strict one-to-one chaining, single-record edits, and the
//!   terminal close-order transition.
//! - **Stage Status Aggregator** — the single source of truth for the
//!   three-state accordion status per stage and the ready-to-close
//!   predicate.
//!
//! The 1:1 chain (serial → pre-commissioning → commissioning → warranty)
//! is enforced by UNIQUE constraints at the storage layer; application
//! pre-checks are a fast-fail optimization, not the race-breaker.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fulfillment_core::lifecycle::{EligibilityResolver, LifecycleOrchestrator};
//! use fulfillment_core::models::PreCommissioningShared;
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = EligibilityResolver::new(pool.clone());
//! let orchestrator = LifecycleOrchestrator::new(pool);
//!
//! let candidates = resolver.eligible_for_pre_commissioning("PO-2024-001").await?;
//! let ids: Vec<i64> = candidates.iter().map(|c| c.serial_number_id).collect();
//! let created = orchestrator
//!     .create_pre_commissioning_batch(&ids, &PreCommissioningShared::default(), 1)
//!     .await?;
//! println!("created {} pre-commissioning records", created.len());
//! # Ok(())
//! # }
//! ```
//!
//! Services are constructed explicitly and passed down by the caller;
//! transport, authentication, file storage and UI rendering are external
//! collaborators.

pub mod config;
pub mod constants;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod models;

pub use config::{ConfigManager, DatabaseConfig, ExecutionConfig, FulfillmentConfig};
pub use error::{FulfillmentError, Result};
pub use lifecycle::{
    CloseOutcome, EligibilityResolver, LifecycleOrchestrator, RecordStatus, Stage, StageStatus,
    StageStatusAggregator, StageStatusSummary,
};
