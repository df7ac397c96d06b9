use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AllocationId, ResourceId, SubjectId};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    ACTIVE_ALLOCATION_CONSTRAINT, Allocation, AllocationQuery, AllocationStatus, AuditEntry,
    CAPACITY_BOUNDS_CONSTRAINT, Page, Resource, ResourceQuery, Result, StoreConfig, StoreError,
    Version,
    store::{Clock, SeatStore, StoreTransaction, SystemClock},
};

const RESOURCE_PKEY: &str = "resources_pkey";
const ALLOCATION_PKEY: &str = "allocations_pkey";

/// In-memory seat store.
///
/// Provides the same isolation guarantees as the PostgreSQL implementation:
/// each resource has an async row lock that a transaction holds from
/// `lock_resource` until commit or drop, writes are staged and published
/// atomically at commit, and the one-Active-allocation-per-subject rule is a
/// unique index checked by the store on every insert and again at commit.
///
/// The lock granularity is the resource: all allocations of a resource are
/// covered by its lock.
#[derive(Clone)]
pub struct InMemorySeatStore {
    shared: Arc<Shared>,
}

struct Shared {
    tables: RwLock<Tables>,
    row_locks: StdMutex<HashMap<ResourceId, Arc<Mutex<()>>>>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
}

#[derive(Debug, Default)]
struct Tables {
    resources: HashMap<ResourceId, Resource>,
    allocations: HashMap<AllocationId, Allocation>,
    by_resource: HashMap<ResourceId, Vec<AllocationId>>,
    active_index: HashMap<(ResourceId, SubjectId), AllocationId>,
    audit: Vec<AuditEntry>,
}

#[derive(Debug, Clone)]
enum PendingWrite {
    InsertResource(Resource),
    UpdateResource { resource: Resource, expected: Version },
    DeleteResource(ResourceId),
    InsertAllocation(Allocation),
    MarkReversed { id: AllocationId, at: DateTime<Utc> },
    Audit(AuditEntry),
}

impl InMemorySeatStore {
    /// Creates a new empty store on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a new empty store whose transactions observe `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(StoreConfig::default(), clock)
    }

    /// Creates a new empty store with explicit settings.
    pub fn with_config(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: StdMutex::new(HashMap::new()),
                clock,
                config,
            }),
        }
    }

    /// Returns the number of committed resources.
    pub async fn resource_count(&self) -> usize {
        self.shared.tables.read().await.resources.len()
    }

    /// Returns the number of committed ledger rows, Active or not.
    pub async fn allocation_count(&self) -> usize {
        self.shared.tables.read().await.allocations.len()
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        *self.shared.tables.write().await = Tables::default();
    }
}

impl Default for InMemorySeatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    fn row_lock(&self, resource_id: ResourceId) -> Arc<Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(resource_id).or_default())
    }

    /// Drops row lock entries that no transaction holds or waits on.
    fn prune_row_locks(&self, ids: impl IntoIterator<Item = ResourceId>) {
        let mut locks = self.row_locks.lock().unwrap_or_else(|e| e.into_inner());
        for id in ids {
            if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(&id);
            }
        }
    }
}

impl Tables {
    fn active_quantity(&self, resource_id: ResourceId) -> i64 {
        self.by_resource
            .get(&resource_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.allocations.get(id))
            .filter(|a| a.is_active())
            .map(|a| i64::from(a.quantity))
            .sum()
    }

    fn resource_version(&self, id: ResourceId) -> Option<Version> {
        self.resources.get(&id).map(|r| r.version)
    }

    /// Checks that `writes`, applied in order on top of the committed tables,
    /// violate no constraint.
    fn validate(&self, writes: &[PendingWrite]) -> Result<()> {
        let mut versions: HashMap<ResourceId, Option<Version>> = HashMap::new();
        let mut claimed: HashMap<(ResourceId, SubjectId), bool> = HashMap::new();
        let mut inserted: HashMap<AllocationId, &Allocation> = HashMap::new();
        let mut reversed: HashSet<AllocationId> = HashSet::new();

        for write in writes {
            match write {
                PendingWrite::InsertResource(resource) => {
                    let current = versions
                        .get(&resource.id)
                        .copied()
                        .unwrap_or_else(|| self.resource_version(resource.id));
                    if current.is_some() {
                        return Err(StoreError::UniqueViolation {
                            constraint: RESOURCE_PKEY.to_string(),
                        });
                    }
                    if !resource.capacity_in_bounds() {
                        return Err(StoreError::CheckViolation {
                            constraint: CAPACITY_BOUNDS_CONSTRAINT.to_string(),
                        });
                    }
                    versions.insert(resource.id, Some(resource.version));
                }
                PendingWrite::UpdateResource { resource, expected } => {
                    let current = versions
                        .get(&resource.id)
                        .copied()
                        .unwrap_or_else(|| self.resource_version(resource.id));
                    if current != Some(*expected) {
                        return Err(StoreError::VersionConflict {
                            resource_id: resource.id,
                            expected: *expected,
                        });
                    }
                    if !resource.capacity_in_bounds() {
                        return Err(StoreError::CheckViolation {
                            constraint: CAPACITY_BOUNDS_CONSTRAINT.to_string(),
                        });
                    }
                    versions.insert(resource.id, Some(resource.version));
                }
                PendingWrite::DeleteResource(id) => {
                    versions.insert(*id, None);
                }
                PendingWrite::InsertAllocation(allocation) => {
                    if self.allocations.contains_key(&allocation.id)
                        || inserted.contains_key(&allocation.id)
                    {
                        return Err(StoreError::UniqueViolation {
                            constraint: ALLOCATION_PKEY.to_string(),
                        });
                    }
                    let key = (allocation.resource_id, allocation.subject_id);
                    let taken = claimed
                        .get(&key)
                        .copied()
                        .unwrap_or_else(|| self.active_index.contains_key(&key));
                    if taken {
                        return Err(StoreError::UniqueViolation {
                            constraint: ACTIVE_ALLOCATION_CONSTRAINT.to_string(),
                        });
                    }
                    claimed.insert(key, true);
                    inserted.insert(allocation.id, allocation);
                }
                PendingWrite::MarkReversed { id, .. } => {
                    let allocation = inserted
                        .get(id)
                        .copied()
                        .or_else(|| self.allocations.get(id))
                        .filter(|a| a.is_active())
                        .ok_or(StoreError::AllocationNotActive(*id))?;
                    if !reversed.insert(*id) {
                        return Err(StoreError::AllocationNotActive(*id));
                    }
                    claimed.insert((allocation.resource_id, allocation.subject_id), false);
                }
                PendingWrite::Audit(_) => {}
            }
        }

        Ok(())
    }

    fn apply(&mut self, writes: Vec<PendingWrite>) {
        for write in writes {
            match write {
                PendingWrite::InsertResource(resource)
                | PendingWrite::UpdateResource { resource, .. } => {
                    self.resources.insert(resource.id, resource);
                }
                PendingWrite::DeleteResource(id) => {
                    self.resources.remove(&id);
                }
                PendingWrite::InsertAllocation(allocation) => {
                    self.active_index.insert(
                        (allocation.resource_id, allocation.subject_id),
                        allocation.id,
                    );
                    self.by_resource
                        .entry(allocation.resource_id)
                        .or_default()
                        .push(allocation.id);
                    self.allocations.insert(allocation.id, allocation);
                }
                PendingWrite::MarkReversed { id, at } => {
                    if let Some(allocation) = self.allocations.get_mut(&id) {
                        allocation.status = AllocationStatus::Reversed;
                        allocation.reversed_at = Some(at);
                        self.active_index
                            .remove(&(allocation.resource_id, allocation.subject_id));
                    }
                }
                PendingWrite::Audit(entry) => self.audit.push(entry),
            }
        }
    }
}

/// A transaction against [`InMemorySeatStore`].
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    now: DateTime<Utc>,
    held: HashMap<ResourceId, OwnedMutexGuard<()>>,
    writes: Vec<PendingWrite>,
}

impl InMemoryTransaction {
    async fn acquire(&mut self, resource_id: ResourceId) -> Result<()> {
        if self.held.contains_key(&resource_id) {
            return Ok(());
        }

        let lock = self.shared.row_lock(resource_id);
        let waited = self.shared.config.lock_timeout;
        let acquired = tokio::time::timeout(waited, lock.lock_owned()).await;
        match acquired {
            Ok(guard) => {
                self.held.insert(resource_id, guard);
                Ok(())
            }
            Err(_) => {
                self.shared.prune_row_locks([resource_id]);
                tracing::debug!(%resource_id, ?waited, "resource row lock timed out");
                Err(StoreError::LockTimeout {
                    resource_id,
                    waited,
                })
            }
        }
    }

    /// Stages a write, keeping it only if every staged write still passes validation.
    async fn stage(&mut self, write: PendingWrite) -> Result<()> {
        self.writes.push(write);
        let outcome = self.shared.tables.read().await.validate(&self.writes);
        if outcome.is_err() {
            self.writes.pop();
        }
        outcome
    }

    /// The latest staged image of a resource: `Some(None)` if staged for deletion.
    fn staged_resource(&self, id: ResourceId) -> Option<Option<Resource>> {
        self.writes.iter().rev().find_map(|write| match write {
            PendingWrite::InsertResource(resource)
            | PendingWrite::UpdateResource { resource, .. }
                if resource.id == id =>
            {
                Some(Some(resource.clone()))
            }
            PendingWrite::DeleteResource(deleted) if *deleted == id => Some(None),
            _ => None,
        })
    }

    fn overlay_allocation(
        &self,
        mut current: Option<Allocation>,
        id: AllocationId,
    ) -> Option<Allocation> {
        for write in &self.writes {
            match write {
                PendingWrite::InsertAllocation(allocation) if allocation.id == id => {
                    current = Some(allocation.clone());
                }
                PendingWrite::MarkReversed { id: target, at } if *target == id => {
                    current = current.map(|a| a.reversed(*at));
                }
                _ => {}
            }
        }
        current
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn now(&mut self) -> Result<DateTime<Utc>> {
        Ok(self.now)
    }

    async fn lock_resource(&mut self, id: ResourceId) -> Result<Option<Resource>> {
        self.acquire(id).await?;

        if let Some(staged) = self.staged_resource(id) {
            return Ok(staged);
        }
        Ok(self.shared.tables.read().await.resources.get(&id).cloned())
    }

    async fn find_allocation(&mut self, id: AllocationId) -> Result<Option<Allocation>> {
        let committed = self.shared.tables.read().await.allocations.get(&id).cloned();
        Ok(self.overlay_allocation(committed, id))
    }

    async fn lock_allocation(&mut self, id: AllocationId) -> Result<Option<Allocation>> {
        let Some(allocation) = self.find_allocation(id).await? else {
            return Ok(None);
        };
        self.acquire(allocation.resource_id).await?;
        // Re-read: the row may have changed while we waited for the lock.
        self.find_allocation(id).await
    }

    async fn active_quantity(&mut self, resource_id: ResourceId) -> Result<i64> {
        let mut rows: HashMap<AllocationId, Allocation> = {
            let tables = self.shared.tables.read().await;
            tables
                .by_resource
                .get(&resource_id)
                .into_iter()
                .flatten()
                .filter_map(|id| tables.allocations.get(id))
                .map(|a| (a.id, a.clone()))
                .collect()
        };

        for write in &self.writes {
            match write {
                PendingWrite::InsertAllocation(allocation)
                    if allocation.resource_id == resource_id =>
                {
                    rows.insert(allocation.id, allocation.clone());
                }
                PendingWrite::MarkReversed { id, .. } => {
                    if let Some(allocation) = rows.get_mut(id) {
                        allocation.status = AllocationStatus::Reversed;
                    }
                }
                _ => {}
            }
        }

        Ok(rows
            .values()
            .filter(|a| a.is_active())
            .map(|a| i64::from(a.quantity))
            .sum())
    }

    async fn insert_resource(&mut self, resource: &Resource) -> Result<()> {
        self.stage(PendingWrite::InsertResource(resource.clone()))
            .await
    }

    async fn update_resource(&mut self, resource: &Resource) -> Result<Version> {
        let expected = resource.version;
        let mut next = resource.clone();
        next.version = expected.next();
        let version = next.version;

        self.stage(PendingWrite::UpdateResource {
            resource: next,
            expected,
        })
        .await?;
        Ok(version)
    }

    async fn delete_resource(&mut self, id: ResourceId) -> Result<()> {
        self.stage(PendingWrite::DeleteResource(id)).await
    }

    async fn insert_allocation(&mut self, allocation: &Allocation) -> Result<()> {
        self.stage(PendingWrite::InsertAllocation(allocation.clone()))
            .await
    }

    async fn mark_reversed(&mut self, id: AllocationId, at: DateTime<Utc>) -> Result<()> {
        self.stage(PendingWrite::MarkReversed { id, at }).await
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<()> {
        self.stage(PendingWrite::Audit(entry.clone())).await
    }

    async fn commit(mut self) -> Result<()> {
        let writes = std::mem::take(&mut self.writes);
        let mut tables = self.shared.tables.write().await;
        tables.validate(&writes)?;
        tables.apply(writes);
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        let ids: Vec<ResourceId> = self.held.keys().copied().collect();
        self.held.clear();
        self.shared.prune_row_locks(ids);
    }
}

#[async_trait]
impl SeatStore for InMemorySeatStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            now: self.shared.clock.now(),
            held: HashMap::new(),
            writes: Vec::new(),
        })
    }

    async fn now(&self) -> Result<DateTime<Utc>> {
        Ok(self.shared.clock.now())
    }

    async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>> {
        Ok(self.shared.tables.read().await.resources.get(&id).cloned())
    }

    async fn get_allocation(&self, id: AllocationId) -> Result<Option<Allocation>> {
        Ok(self.shared.tables.read().await.allocations.get(&id).cloned())
    }

    async fn query_resources(&self, query: ResourceQuery) -> Result<Page<Resource>> {
        let tables = self.shared.tables.read().await;
        let needle = query.location.as_ref().map(|l| l.to_lowercase());

        let mut matches: Vec<Resource> = tables
            .resources
            .values()
            .filter(|r| {
                if let Some(state) = query.state
                    && r.state != state
                {
                    return false;
                }
                if let Some(ref needle) = needle
                    && !r.location.to_lowercase().contains(needle.as_str())
                {
                    return false;
                }
                if let Some(owner) = query.owner_id
                    && r.owner_id != owner
                {
                    return false;
                }
                if let Some(from) = query.scheduled_from
                    && r.scheduled_at < from
                {
                    return false;
                }
                if let Some(before) = query.scheduled_before
                    && r.scheduled_at >= before
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));

        Ok(Page::from_matches(matches, query.limit, query.offset))
    }

    async fn query_allocations(&self, query: AllocationQuery) -> Result<Page<Allocation>> {
        let tables = self.shared.tables.read().await;

        let mut matches: Vec<Allocation> = tables
            .allocations
            .values()
            .filter(|a| {
                if let Some(resource_id) = query.resource_id
                    && a.resource_id != resource_id
                {
                    return false;
                }
                if let Some(subject_id) = query.subject_id
                    && a.subject_id != subject_id
                {
                    return false;
                }
                if let Some(status) = query.status
                    && a.status != status
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        // Newest first
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        Ok(Page::from_matches(matches, query.limit, query.offset))
    }

    async fn active_quantity(&self, resource_id: ResourceId) -> Result<i64> {
        Ok(self
            .shared
            .tables
            .read()
            .await
            .active_quantity(resource_id))
    }

    async fn audit_trail(&self, resource_id: ResourceId) -> Result<Vec<AuditEntry>> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .audit
            .iter()
            .filter(|e| e.resource_id == resource_id)
            .cloned()
            .collect())
    }
}
