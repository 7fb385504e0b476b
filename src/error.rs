//! # Error Types
//!
//! Structured error handling for the fulfillment lifecycle engine using
//! thiserror instead of `Box<dyn Error>` patterns.
//!
//! The taxonomy mirrors the caller contract: validation and conflict errors
//! are deterministic consequences of stale client state and are never
//! retried by the engine itself; the caller re-fetches eligibility and
//! resubmits the whole batch.

use thiserror::Error;

/// Errors surfaced by the lifecycle engine
#[derive(Error, Debug)]
pub enum FulfillmentError {
    /// Malformed or out-of-range input, e.g. a dispatch allocation that
    /// exceeds the remaining quantity. Never retried automatically.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// Serial-token count does not match the dispatched quantity.
    #[error("serial count mismatch: expected {expected} serial numbers, got {actual}")]
    SerialCountMismatch { expected: i32, actual: usize },

    /// Upstream not yet Done, downstream already exists, or an attempt to
    /// mutate a closed order. Carries the conflicting id so the caller can
    /// refresh its eligibility view.
    #[error("conflict on {entity} {id}: {message}")]
    Conflict {
        entity: &'static str,
        id: String,
        message: String,
    },

    /// A referenced id does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Close attempted while one or more stages are not Done.
    #[error("order {po_id} is not ready to close: {reason}")]
    NotReady { po_id: String, reason: String },

    /// Wraps the first failure inside a bulk create. The batch transaction
    /// is rolled back, so zero changes were persisted.
    #[error("batch aborted with no persisted changes: {source}")]
    Batch {
        #[source]
        source: Box<FulfillmentError>,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl FulfillmentError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(entity: &'static str, id: impl ToString, message: impl Into<String>) -> Self {
        Self::Conflict {
            entity,
            id: id.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Wrap a mid-batch failure, marking that the transaction rolled back.
    pub fn batch(source: FulfillmentError) -> Self {
        match source {
            already @ Self::Batch { .. } => already,
            other => Self::Batch {
                source: Box::new(other),
            },
        }
    }

    /// True for errors the caller resolves by re-fetching eligibility.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Batch { source } => source.is_conflict(),
            _ => false,
        }
    }
}

/// PostgreSQL unique_violation SQLSTATE, the race-breaker for 1:1 links.
pub(crate) const UNIQUE_VIOLATION: &str = "23505";

/// Translate a unique-constraint violation on insert into the conflict it
/// actually represents; every other database error passes through.
pub(crate) fn map_unique_violation(
    err: sqlx::Error,
    entity: &'static str,
    id: impl ToString,
    message: impl Into<String>,
) -> FulfillmentError {
    match err {
        sqlx::Error::Database(ref db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            FulfillmentError::conflict(entity, id, message)
        }
        other => FulfillmentError::Database(other),
    }
}

pub type Result<T> = std::result::Result<T, FulfillmentError>;
