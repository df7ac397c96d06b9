//! Read-side views of the booking ledger.

use std::sync::Arc;

use common::{AllocationId, ResourceId, SubjectId};
use seat_store::{Allocation, AllocationQuery, AllocationStatus, AuditEntry, Page, SeatStore};

use crate::controller::ConcurrencyController;
use crate::error::{BookingError, Result};
use crate::query::PageRequest;

/// Committed-state queries over allocations and the audit journal.
///
/// Nothing here takes a row lock.
pub struct LedgerView<S: SeatStore> {
    controller: Arc<ConcurrencyController<S>>,
}

impl<S: SeatStore> LedgerView<S> {
    pub fn new(controller: Arc<ConcurrencyController<S>>) -> Self {
        Self { controller }
    }

    /// Allocations held by a subject, newest first.
    pub async fn list_subject_allocations(
        &self,
        subject_id: SubjectId,
        status: Option<AllocationStatus>,
        page: PageRequest,
    ) -> Result<Page<Allocation>> {
        let mut query = AllocationQuery::for_subject(subject_id)
            .limit(page.limit())
            .offset(page.offset());
        if let Some(status) = status {
            query = query.status(status);
        }

        Ok(self.controller.store().query_allocations(query).await?)
    }

    /// Allocations against a resource, newest first. Only the owner may list them.
    pub async fn list_resource_allocations(
        &self,
        resource_id: ResourceId,
        requester_id: SubjectId,
        page: PageRequest,
    ) -> Result<Page<Allocation>> {
        let store = self.controller.store();
        let resource = store
            .get_resource(resource_id)
            .await?
            .ok_or_else(|| BookingError::resource_not_found(resource_id))?;

        if resource.owner_id != requester_id {
            return Err(BookingError::Forbidden(format!(
                "only the owner may list allocations of resource {resource_id}"
            )));
        }

        let query = AllocationQuery::for_resource(resource_id)
            .limit(page.limit())
            .offset(page.offset());
        Ok(store.query_allocations(query).await?)
    }

    /// Reads one allocation.
    pub async fn get_allocation(&self, id: AllocationId) -> Result<Allocation> {
        self.controller
            .store()
            .get_allocation(id)
            .await?
            .ok_or_else(|| BookingError::allocation_not_found(id))
    }

    /// Seats still available on a resource.
    pub async fn query_remaining(&self, resource_id: ResourceId) -> Result<i32> {
        self.controller
            .store()
            .get_resource(resource_id)
            .await?
            .map(|r| r.capacity_remaining)
            .ok_or_else(|| BookingError::resource_not_found(resource_id))
    }

    /// Sum of Active allocation quantities against a resource.
    pub async fn active_quantity(&self, resource_id: ResourceId) -> Result<i64> {
        Ok(self.controller.store().active_quantity(resource_id).await?)
    }

    /// The audit journal of a resource, oldest entry first.
    pub async fn audit_trail(&self, resource_id: ResourceId) -> Result<Vec<AuditEntry>> {
        Ok(self.controller.store().audit_trail(resource_id).await?)
    }
}
