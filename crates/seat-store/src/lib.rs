pub mod allocation;
pub mod audit;
pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod resource;
pub mod store;
pub mod version;

pub use allocation::{Allocation, AllocationStatus};
pub use audit::{AuditEntry, AuditKind};
pub use common::{AllocationId, AuditId, ResourceId, SubjectId};
pub use config::StoreConfig;
pub use error::{ACTIVE_ALLOCATION_CONSTRAINT, CAPACITY_BOUNDS_CONSTRAINT, Result, StoreError};
pub use memory::{InMemorySeatStore, InMemoryTransaction};
pub use postgres::{PostgresSeatStore, PostgresTransaction};
pub use query::{AllocationQuery, Page, ResourceQuery};
pub use resource::{LifecycleState, Resource};
pub use store::{Clock, ManualClock, SeatStore, StoreTransaction, SystemClock};
pub use version::Version;
