use std::time::Duration;

use common::{AllocationId, ResourceId};
use thiserror::Error;

use crate::Version;

/// Name of the unique index allowing one Active allocation per (resource, subject).
pub const ACTIVE_ALLOCATION_CONSTRAINT: &str = "allocations_active_resource_subject_key";

/// Name of the check constraint bounding a resource's capacity columns.
pub const CAPACITY_BOUNDS_CONSTRAINT: &str = "resources_capacity_bounds";

/// Errors that can occur when interacting with the seat store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The row lock on a resource was not granted within the configured window.
    #[error("Lock on resource {resource_id} not acquired within {waited:?}")]
    LockTimeout {
        resource_id: ResourceId,
        waited: Duration,
    },

    /// An update named a resource version that is no longer current.
    #[error("Concurrency conflict for resource {resource_id}: expected version {expected}")]
    VersionConflict {
        resource_id: ResourceId,
        expected: Version,
    },

    /// The database aborted the transaction to preserve isolation
    /// (serialization failure, deadlock, lock or statement timeout).
    #[error("Transaction aborted by isolation conflict ({sqlstate}): {message}")]
    IsolationAbort { sqlstate: String, message: String },

    /// A unique constraint rejected a write.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// A check constraint rejected a write.
    #[error("Check constraint violated: {constraint}")]
    CheckViolation { constraint: String },

    /// A reversal targeted an allocation that is no longer Active.
    #[error("Allocation {0} is not active")]
    AllocationNotActive(AllocationId),

    /// A stored value could not be decoded into its Rust type.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true if the failed transaction may succeed when retried from scratch.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout { .. }
                | StoreError::VersionConflict { .. }
                | StoreError::IsolationAbort { .. }
        )
    }

    /// Returns true if this is a violation of the named unique constraint.
    pub fn is_unique_violation_of(&self, name: &str) -> bool {
        matches!(self, StoreError::UniqueViolation { constraint } if constraint == name)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            let constraint = db_err.constraint().unwrap_or_default().to_string();
            match db_err.code().as_deref() {
                Some("23505") => return StoreError::UniqueViolation { constraint },
                Some("23514") => return StoreError::CheckViolation { constraint },
                // serialization_failure, deadlock_detected, lock_not_available, query_canceled
                Some(code @ ("40001" | "40P01" | "55P03" | "57014")) => {
                    return StoreError::IsolationAbort {
                        sqlstate: code.to_string(),
                        message: db_err.message().to_string(),
                    };
                }
                _ => {}
            }
        }
        StoreError::Database(err)
    }
}

/// Result type for seat store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_retryable() {
        let timeout = StoreError::LockTimeout {
            resource_id: ResourceId::new(),
            waited: Duration::from_millis(10),
        };
        let stale = StoreError::VersionConflict {
            resource_id: ResourceId::new(),
            expected: Version::first(),
        };
        let abort = StoreError::IsolationAbort {
            sqlstate: "40001".to_string(),
            message: "could not serialize access".to_string(),
        };
        assert!(timeout.is_conflict());
        assert!(stale.is_conflict());
        assert!(abort.is_conflict());
    }

    #[test]
    fn constraint_violations_are_not_retryable() {
        let duplicate = StoreError::UniqueViolation {
            constraint: ACTIVE_ALLOCATION_CONSTRAINT.to_string(),
        };
        assert!(!duplicate.is_conflict());
        assert!(duplicate.is_unique_violation_of(ACTIVE_ALLOCATION_CONSTRAINT));
        assert!(!duplicate.is_unique_violation_of("resources_pkey"));
    }
}
