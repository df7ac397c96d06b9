use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AllocationId, ResourceId};

use crate::{
    Allocation, AllocationQuery, AuditEntry, Page, Resource, ResourceQuery, Result, Version,
};

/// Source of the current time for stores that have no clock of their own.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used to test schedule cut-offs.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Durable record of resources and allocations with isolated transactions.
///
/// Every mutation goes through a [`StoreTransaction`] obtained from
/// [`SeatStore::begin`]. The plain read methods observe committed state only
/// and never block on row locks. All implementations must be thread-safe.
#[async_trait]
pub trait SeatStore: Send + Sync {
    /// The transaction type handed out by [`SeatStore::begin`].
    type Transaction: StoreTransaction;

    /// Opens a new isolated transaction.
    async fn begin(&self) -> Result<Self::Transaction>;

    /// The store's current time, read outside any transaction.
    async fn now(&self) -> Result<DateTime<Utc>>;

    /// Reads a committed resource.
    async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>>;

    /// Reads a committed allocation.
    async fn get_allocation(&self, id: AllocationId) -> Result<Option<Allocation>>;

    /// Lists committed resources matching a query.
    async fn query_resources(&self, query: ResourceQuery) -> Result<Page<Resource>>;

    /// Lists committed allocations matching a query.
    async fn query_allocations(&self, query: AllocationQuery) -> Result<Page<Allocation>>;

    /// Sums the quantity of committed Active allocations against a resource.
    async fn active_quantity(&self, resource_id: ResourceId) -> Result<i64>;

    /// Returns the audit journal of a resource, oldest entry first.
    async fn audit_trail(&self, resource_id: ResourceId) -> Result<Vec<AuditEntry>>;
}

/// A single isolated read-modify-write unit over the resource and allocation tables.
///
/// Dropping a transaction without calling [`StoreTransaction::commit`] discards
/// every staged write and releases every lock it holds.
///
/// Locks must be taken resource first, then allocation: a transaction that
/// touches an allocation locks the owning resource before the allocation row.
#[async_trait]
pub trait StoreTransaction: Send {
    /// The store's notion of "now" for this transaction.
    async fn now(&mut self) -> Result<DateTime<Utc>>;

    /// Reads a resource and holds its row lock until the transaction ends.
    async fn lock_resource(&mut self, id: ResourceId) -> Result<Option<Resource>>;

    /// Reads an allocation without locking it.
    async fn find_allocation(&mut self, id: AllocationId) -> Result<Option<Allocation>>;

    /// Reads an allocation and holds its row lock until the transaction ends.
    async fn lock_allocation(&mut self, id: AllocationId) -> Result<Option<Allocation>>;

    /// Sums the quantity of Active allocations against a resource as seen by this transaction.
    async fn active_quantity(&mut self, resource_id: ResourceId) -> Result<i64>;

    /// Inserts a new resource row.
    async fn insert_resource(&mut self, resource: &Resource) -> Result<()>;

    /// Writes `resource` if the stored row is still at `resource.version`.
    ///
    /// Returns the new version. A stale version fails with
    /// [`StoreError::VersionConflict`](crate::StoreError::VersionConflict).
    async fn update_resource(&mut self, resource: &Resource) -> Result<Version>;

    /// Removes a resource row.
    async fn delete_resource(&mut self, id: ResourceId) -> Result<()>;

    /// Inserts a new allocation row, subject to the Active uniqueness constraint.
    async fn insert_allocation(&mut self, allocation: &Allocation) -> Result<()>;

    /// Transitions an Active allocation to Reversed.
    async fn mark_reversed(&mut self, id: AllocationId, at: DateTime<Utc>) -> Result<()>;

    /// Appends an entry to the audit journal.
    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<()>;

    /// Atomically publishes every staged write.
    async fn commit(self) -> Result<()>;
}
