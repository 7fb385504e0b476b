//! Stage and status definitions for the six-phase fulfillment pipeline.
//!
//! A purchase order advances dispatch → document → delivery →
//! pre-commissioning → commissioning → warranty. Each stage summarizes to a
//! three-value accordion status that gates the UI and the close-order
//! action.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FulfillmentError;

/// The six sequential fulfillment stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Physical dispatch of goods against order lines
    Dispatch,
    /// Shipping documentation (LR, invoice, serial numbers)
    Document,
    /// Delivery confirmation at the client site
    Delivery,
    /// Pre-commissioning visit per delivered serial number
    PreCommissioning,
    /// Commissioning per pre-commissioned unit
    Commissioning,
    /// Warranty certificate per commissioned unit
    Warranty,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::Dispatch,
        Stage::Document,
        Stage::Delivery,
        Stage::PreCommissioning,
        Stage::Commissioning,
        Stage::Warranty,
    ];

    /// The stage whose completion feeds this one, if any.
    pub fn upstream(&self) -> Option<Stage> {
        let idx = Stage::ALL.iter().position(|s| s == self)?;
        idx.checked_sub(1).map(|i| Stage::ALL[i])
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dispatch => write!(f, "dispatch"),
            Self::Document => write!(f, "document"),
            Self::Delivery => write!(f, "delivery"),
            Self::PreCommissioning => write!(f, "pre_commissioning"),
            Self::Commissioning => write!(f, "commissioning"),
            Self::Warranty => write!(f, "warranty"),
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dispatch" => Ok(Self::Dispatch),
            "document" => Ok(Self::Document),
            "delivery" => Ok(Self::Delivery),
            "pre_commissioning" => Ok(Self::PreCommissioning),
            "commissioning" => Ok(Self::Commissioning),
            "warranty" => Ok(Self::Warranty),
            _ => Err(format!("Invalid stage: {s}")),
        }
    }
}

/// Accordion status summarizing a stage's completion for one purchase order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// No record exists for the stage yet
    NotStarted,
    /// Some records exist, or eligible items remain unconsumed
    InProgress,
    /// Every item that could reach the stage has, and all are done
    Done,
}

impl StageStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Status scalar carried by dispatch sections and downstream records.
///
/// Stored as text; `Done` is the only value that makes an item eligible for
/// the next stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Done,
    Pending,
    Hold,
    Cancelled,
}

impl RecordStatus {
    /// Whether this status completes the stage for its item.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Whether work on the item is still expected.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Hold)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Pending => "pending",
            Self::Hold => "hold",
            Self::Cancelled => "cancelled",
        }
    }

    /// Normalize an optional incoming status string to its canonical
    /// spelling; unknown spellings are a validation error.
    pub fn normalize(status: Option<&str>) -> Result<Option<String>, FulfillmentError> {
        match status {
            None => Ok(None),
            Some(raw) => {
                let parsed: RecordStatus = raw
                    .parse()
                    .map_err(|e: String| FulfillmentError::validation(e))?;
                Ok(Some(parsed.as_str().to_string()))
            }
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "done" => Ok(Self::Done),
            "pending" => Ok(Self::Pending),
            "hold" => Ok(Self::Hold),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid record status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn stage_order_and_upstream_links() {
        assert_eq!(Stage::Dispatch.upstream(), None);
        assert_eq!(Stage::Document.upstream(), Some(Stage::Dispatch));
        assert_eq!(Stage::Warranty.upstream(), Some(Stage::Commissioning));
        assert_eq!(Stage::ALL.len(), 6);
    }

    #[test]
    fn stage_round_trips_through_strings() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_str(&stage.to_string()).unwrap(), stage);
        }
        assert!(Stage::from_str("shipping").is_err());
    }

    #[test]
    fn record_status_parsing_is_case_insensitive() {
        assert_eq!(RecordStatus::from_str("Done").unwrap(), RecordStatus::Done);
        assert_eq!(RecordStatus::from_str("HOLD").unwrap(), RecordStatus::Hold);
        assert!(RecordStatus::from_str("finished").is_err());
    }

    #[test]
    fn optional_status_normalization() {
        assert_eq!(RecordStatus::normalize(None).unwrap(), None);
        assert_eq!(
            RecordStatus::normalize(Some("Done")).unwrap(),
            Some("done".to_string())
        );
        assert_eq!(
            RecordStatus::normalize(Some("HOLD")).unwrap(),
            Some("hold".to_string())
        );
        assert!(RecordStatus::normalize(Some("shipped")).is_err());
    }

    #[test]
    fn only_done_advances_eligibility() {
        assert!(RecordStatus::Done.is_done());
        for status in [
            RecordStatus::Pending,
            RecordStatus::Hold,
            RecordStatus::Cancelled,
        ] {
            assert!(!status.is_done());
        }
    }
}
