//! Booking service providing the caller-facing API.

use std::sync::Arc;

use common::{AllocationId, Principal, ResourceId, Role};
use seat_store::{Allocation, AllocationStatus, AuditEntry, Page, Resource, SeatStore};

use crate::allocation::AllocationEngine;
use crate::catalog::{NewResource, ResourceCatalog, ResourceUpdate};
use crate::config::EngineConfig;
use crate::controller::ConcurrencyController;
use crate::error::{BookingError, Result};
use crate::ledger::LedgerView;
use crate::query::{PageRequest, ResourceFilter};
use crate::reversal::ReversalEngine;

/// Service for booking seats and managing resources.
///
/// Wraps the engines behind role checks on a verified [`Principal`]:
/// organizers manage their own resources, attendees allocate seats, and any
/// subject may reverse or list its own allocations.
pub struct BookingService<S: SeatStore> {
    controller: Arc<ConcurrencyController<S>>,
    allocations: AllocationEngine<S>,
    reversals: ReversalEngine<S>,
    catalog: ResourceCatalog<S>,
    ledger: LedgerView<S>,
}

impl<S: SeatStore> BookingService<S> {
    /// Creates a new booking service over the given store.
    pub fn new(store: S, config: EngineConfig) -> Self {
        let controller = Arc::new(ConcurrencyController::new(store, config.retry_policy()));
        Self {
            allocations: AllocationEngine::new(Arc::clone(&controller), config.clone()),
            reversals: ReversalEngine::new(Arc::clone(&controller), config),
            catalog: ResourceCatalog::new(Arc::clone(&controller)),
            ledger: LedgerView::new(Arc::clone(&controller)),
            controller,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        self.controller.store()
    }

    fn require_role(principal: &Principal, role: Role, action: &str) -> Result<()> {
        if principal.has_role(role) {
            Ok(())
        } else {
            tracing::debug!(subject_id = %principal.subject_id, role = %principal.role, action, "role check failed");
            Err(BookingError::Forbidden(format!(
                "{action} requires the {role} role"
            )))
        }
    }

    /// Books `quantity` seats on a resource for the calling attendee.
    #[tracing::instrument(skip(self), fields(subject_id = %principal.subject_id))]
    pub async fn allocate(
        &self,
        principal: &Principal,
        resource_id: ResourceId,
        quantity: i32,
    ) -> Result<Allocation> {
        Self::require_role(principal, Role::Attendee, "booking seats")?;
        self.allocations
            .allocate(resource_id, principal.subject_id, quantity)
            .await
    }

    /// Cancels one of the caller's allocations and frees its seats.
    #[tracing::instrument(skip(self), fields(subject_id = %principal.subject_id))]
    pub async fn reverse(
        &self,
        principal: &Principal,
        allocation_id: AllocationId,
    ) -> Result<Allocation> {
        self.reversals
            .reverse(allocation_id, principal.subject_id)
            .await
    }

    /// Changes the total capacity of one of the caller's resources.
    #[tracing::instrument(skip(self), fields(subject_id = %principal.subject_id))]
    pub async fn resize(
        &self,
        principal: &Principal,
        resource_id: ResourceId,
        new_total: i32,
    ) -> Result<Resource> {
        Self::require_role(principal, Role::Organizer, "resizing a resource")?;
        self.reversals
            .resize(resource_id, new_total, principal.subject_id)
            .await
    }

    /// Seats still available on a resource.
    pub async fn query_remaining(&self, resource_id: ResourceId) -> Result<i32> {
        self.ledger.query_remaining(resource_id).await
    }

    /// Creates a resource owned by the calling organizer.
    #[tracing::instrument(skip(self, new), fields(subject_id = %principal.subject_id))]
    pub async fn create_resource(
        &self,
        principal: &Principal,
        new: NewResource,
    ) -> Result<Resource> {
        Self::require_role(principal, Role::Organizer, "creating a resource")?;
        self.catalog
            .create_resource(principal.subject_id, new)
            .await
    }

    pub async fn get_resource(&self, resource_id: ResourceId) -> Result<Resource> {
        self.catalog.get_resource(resource_id).await
    }

    pub async fn list_resources(&self, filter: &ResourceFilter) -> Result<Page<Resource>> {
        self.catalog.list_resources(filter).await
    }

    pub async fn publish(&self, principal: &Principal, resource_id: ResourceId) -> Result<Resource> {
        Self::require_role(principal, Role::Organizer, "publishing a resource")?;
        self.catalog.publish(resource_id, principal.subject_id).await
    }

    pub async fn cancel(&self, principal: &Principal, resource_id: ResourceId) -> Result<Resource> {
        Self::require_role(principal, Role::Organizer, "cancelling a resource")?;
        self.catalog.cancel(resource_id, principal.subject_id).await
    }

    pub async fn update_details(
        &self,
        principal: &Principal,
        resource_id: ResourceId,
        update: ResourceUpdate,
    ) -> Result<Resource> {
        Self::require_role(principal, Role::Organizer, "updating a resource")?;
        self.catalog
            .update_details(resource_id, principal.subject_id, update)
            .await
    }

    pub async fn delete_resource(
        &self,
        principal: &Principal,
        resource_id: ResourceId,
    ) -> Result<()> {
        Self::require_role(principal, Role::Organizer, "deleting a resource")?;
        self.catalog
            .delete_resource(resource_id, principal.subject_id)
            .await
    }

    /// The caller's own allocations, newest first.
    pub async fn list_my_allocations(
        &self,
        principal: &Principal,
        status: Option<AllocationStatus>,
        page: PageRequest,
    ) -> Result<Page<Allocation>> {
        self.ledger
            .list_subject_allocations(principal.subject_id, status, page)
            .await
    }

    /// One of the caller's allocations.
    pub async fn get_allocation(
        &self,
        principal: &Principal,
        allocation_id: AllocationId,
    ) -> Result<Allocation> {
        let allocation = self.ledger.get_allocation(allocation_id).await?;
        if allocation.subject_id != principal.subject_id {
            return Err(BookingError::Forbidden(format!(
                "allocation {allocation_id} belongs to another subject"
            )));
        }
        Ok(allocation)
    }

    /// Allocations against one of the caller's resources, newest first.
    pub async fn list_resource_allocations(
        &self,
        principal: &Principal,
        resource_id: ResourceId,
        page: PageRequest,
    ) -> Result<Page<Allocation>> {
        Self::require_role(principal, Role::Organizer, "listing resource allocations")?;
        self.ledger
            .list_resource_allocations(resource_id, principal.subject_id, page)
            .await
    }

    /// Sum of Active allocation quantities against a resource.
    pub async fn active_quantity(&self, resource_id: ResourceId) -> Result<i64> {
        self.ledger.active_quantity(resource_id).await
    }

    /// The audit journal of a resource, oldest entry first.
    pub async fn audit_trail(&self, resource_id: ResourceId) -> Result<Vec<AuditEntry>> {
        self.ledger.audit_trail(resource_id).await
    }
}
