//! Booking error types.

use common::{AllocationId, ResourceId, SubjectId};
use seat_store::StoreError;
use thiserror::Error;

/// Errors returned by every booking operation.
///
/// The taxonomy is closed: callers map each variant to a response without
/// inspecting messages.
#[derive(Debug, Error)]
pub enum BookingError {
    /// The named resource or allocation does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The resource's lifecycle state or schedule does not permit the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Fewer seats remain than were requested.
    #[error("Capacity exceeded: requested {requested}, remaining {remaining}")]
    CapacityExceeded { requested: i32, remaining: i32 },

    /// The subject already holds an Active allocation for the resource.
    #[error("Subject {subject_id} already holds an active allocation for resource {resource_id}")]
    DuplicateAllocation {
        resource_id: ResourceId,
        subject_id: SubjectId,
    },

    /// The allocation was reversed earlier.
    #[error("Allocation {0} is already reversed")]
    AlreadyReversed(AllocationId),

    /// The caller lacks the role or ownership the operation requires.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A capacity edit would drop below the booked seats or below one.
    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),

    /// A requested quantity is below one.
    #[error("Invalid quantity {0}: at least one seat must be requested")]
    InvalidQuantity(i32),

    /// Isolation conflicts persisted through every retry.
    #[error("Conflict after {attempts} attempt(s): {reason}")]
    Conflict { attempts: u32, reason: String },

    /// The capacity accounting identity would be broken.
    #[error("Internal consistency violation: {0}")]
    InternalConsistency(String),

    /// The store failed for a reason unrelated to isolation.
    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl BookingError {
    pub(crate) fn resource_not_found(id: ResourceId) -> Self {
        BookingError::NotFound {
            entity: "Resource",
            id: id.to_string(),
        }
    }

    pub(crate) fn allocation_not_found(id: AllocationId) -> Self {
        BookingError::NotFound {
            entity: "Allocation",
            id: id.to_string(),
        }
    }

    /// Returns true if the operation may be retried from scratch.
    pub fn is_conflict(&self) -> bool {
        matches!(self, BookingError::Conflict { .. })
    }

    /// Short stable label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::NotFound { .. } => "not_found",
            BookingError::InvalidState(_) => "invalid_state",
            BookingError::CapacityExceeded { .. } => "capacity_exceeded",
            BookingError::DuplicateAllocation { .. } => "duplicate_allocation",
            BookingError::AlreadyReversed(_) => "already_reversed",
            BookingError::Forbidden(_) => "forbidden",
            BookingError::InvalidCapacity(_) => "invalid_capacity",
            BookingError::InvalidQuantity(_) => "invalid_quantity",
            BookingError::Conflict { .. } => "conflict",
            BookingError::InternalConsistency(_) => "internal_consistency",
            BookingError::Storage(_) => "storage",
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            err if err.is_conflict() => BookingError::Conflict {
                attempts: 1,
                reason: err.to_string(),
            },
            StoreError::CheckViolation { constraint } => BookingError::InternalConsistency(
                format!("store rejected write with check constraint {constraint}"),
            ),
            StoreError::AllocationNotActive(id) => BookingError::AlreadyReversed(id),
            other => BookingError::Storage(other),
        }
    }
}

/// Result type for booking operations.
pub type Result<T> = std::result::Result<T, BookingError>;
