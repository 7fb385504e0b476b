//! # Data Layer
//!
//! Plain data structs plus typed finder/writer methods per aggregate — the
//! repository surface of the engine. Relation loading is explicit joins or
//! sequential fetches inside the methods, never ad-hoc include trees.

pub mod commissioning;
pub mod dispatch;
pub mod pre_commissioning;
pub mod purchase_order;
pub mod warranty;

// Re-export core models for easy access
pub use commissioning::{CommissioningDetail, CommissioningRecord, CommissioningShared};
pub use dispatch::{DispatchRecord, DispatchedLine, NewDispatchRecord, NewDispatchedLine, SerialNumber};
pub use pre_commissioning::{
    PreCommissioningDetail, PreCommissioningRecord, PreCommissioningShared,
};
pub use purchase_order::{NewOrderLine, NewPurchaseOrder, OrderLine, PurchaseOrder};
pub use warranty::{WarrantyCertificate, WarrantyDetail, WarrantyShared};
