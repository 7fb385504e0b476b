//! # System Constants
//!
//! Entity names, status strings, and status groups that define the
//! operational boundaries of the fulfillment lifecycle engine.
//!
//! Status values are stored as text in the backing store; the canonical
//! spellings live here so the SQL layer and the typed enums agree.

// Re-export status types for convenience
pub use crate::lifecycle::stage::{RecordStatus, Stage, StageStatus};

/// Entity names used in error payloads and log fields
pub mod entities {
    pub const PURCHASE_ORDER: &str = "purchase_order";
    pub const ORDER_LINE: &str = "order_line";
    pub const DISPATCH_RECORD: &str = "dispatch_record";
    pub const DISPATCHED_LINE: &str = "dispatched_line";
    pub const SERIAL_NUMBER: &str = "serial_number";
    pub const PRE_COMMISSIONING: &str = "pre_commissioning";
    pub const COMMISSIONING: &str = "commissioning";
    pub const WARRANTY_CERTIFICATE: &str = "warranty_certificate";
}

/// Canonical status spellings as persisted
pub mod statuses {
    /// Section/record statuses
    pub const DONE: &str = "done";
    pub const PENDING: &str = "pending";
    pub const HOLD: &str = "hold";
    pub const CANCELLED: &str = "cancelled";

    /// Purchase-order header statuses
    pub const ORDER_OPEN: &str = "open";
    pub const ORDER_CLOSED: &str = "closed";
}

/// Status groupings for aggregate queries
pub mod status_groups {
    use super::statuses;

    /// Statuses that complete an item for its stage
    pub const COMPLETED: &[&str] = &[statuses::DONE];

    /// Statuses under which work is still expected; cancelled is neither
    /// open nor completed and counts toward no group.
    pub const OPEN: &[&str] = &[statuses::PENDING, statuses::HOLD];
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn canonical_spellings_match_the_typed_enum() {
        assert_eq!(RecordStatus::Done.as_str(), statuses::DONE);
        assert_eq!(RecordStatus::Pending.as_str(), statuses::PENDING);
        assert_eq!(RecordStatus::Hold.as_str(), statuses::HOLD);
        assert_eq!(RecordStatus::Cancelled.as_str(), statuses::CANCELLED);
    }

    #[test]
    fn status_groups_agree_with_the_typed_predicates() {
        for status in ["done", "pending", "hold", "cancelled"] {
            let typed = RecordStatus::from_str(status).unwrap();
            assert_eq!(status_groups::COMPLETED.contains(&status), typed.is_done());
            assert_eq!(status_groups::OPEN.contains(&status), typed.is_open());
        }
        assert!(!status_groups::OPEN.contains(&statuses::CANCELLED));
        assert!(!status_groups::COMPLETED.contains(&statuses::CANCELLED));
    }
}
