//! # Lifecycle Engine
//!
//! The eligibility and status reconciliation core. Data flows one way:
//! quantity ledger → serial reconciler → eligibility resolver → lifecycle
//! orchestrator → stage status aggregator.

pub mod eligibility;
pub mod orchestrator;
pub mod quantity_ledger;
pub mod serial;
pub mod stage;
pub mod status;

pub use eligibility::{
    CommissioningCandidate, EligibilityResolver, PreCommissioningCandidate, WarrantyCandidate,
};
pub use orchestrator::{CloseOutcome, LifecycleOrchestrator};
pub use stage::{RecordStatus, Stage, StageStatus};
pub use status::{StageCounts, StageStatusAggregator, StageStatusSummary};
