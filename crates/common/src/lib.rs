//! Shared identifier and identity types for the seat booking workspace.

mod types;

pub use types::{AllocationId, AuditId, Principal, ResourceId, Role, SubjectId};
