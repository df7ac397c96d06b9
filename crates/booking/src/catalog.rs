//! Resource lifecycle management.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{ResourceId, SubjectId};
use seat_store::{
    AuditEntry, AuditKind, LifecycleState, Page, Resource, SeatStore, StoreTransaction, Version,
};

use crate::controller::ConcurrencyController;
use crate::error::{BookingError, Result};
use crate::query::ResourceFilter;

/// Fields of a resource to be created.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub title: String,
    pub description: String,
    pub location: String,
    pub ticket_price_cents: u32,
    pub scheduled_at: DateTime<Utc>,
    pub capacity: i32,
    pub state: LifecycleState,
}

impl NewResource {
    /// A Draft resource with no description, location or price.
    pub fn new(title: impl Into<String>, scheduled_at: DateTime<Utc>, capacity: i32) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            location: String::new(),
            ticket_price_cents: 0,
            scheduled_at,
            capacity,
            state: LifecycleState::Draft,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn ticket_price_cents(mut self, cents: u32) -> Self {
        self.ticket_price_cents = cents;
        self
    }

    /// Creates the resource directly in the Published state.
    pub fn published(mut self) -> Self {
        self.state = LifecycleState::Published;
        self
    }
}

/// Descriptive fields to change; `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct ResourceUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub ticket_price_cents: Option<u32>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl ResourceUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.location.is_none()
            && self.ticket_price_cents.is_none()
            && self.scheduled_at.is_none()
    }

    fn apply_to(self, resource: &mut Resource) {
        if let Some(title) = self.title {
            resource.title = title;
        }
        if let Some(description) = self.description {
            resource.description = description;
        }
        if let Some(location) = self.location {
            resource.location = location;
        }
        if let Some(cents) = self.ticket_price_cents {
            resource.ticket_price_cents = i64::from(cents);
        }
        if let Some(scheduled_at) = self.scheduled_at {
            resource.scheduled_at = scheduled_at;
        }
    }
}

/// Creates, edits, transitions and deletes resources on behalf of their owners.
///
/// Capacity changes are not made here; see
/// [`ReversalEngine::resize`](crate::ReversalEngine::resize).
pub struct ResourceCatalog<S: SeatStore> {
    controller: Arc<ConcurrencyController<S>>,
}

impl<S: SeatStore> ResourceCatalog<S> {
    pub fn new(controller: Arc<ConcurrencyController<S>>) -> Self {
        Self { controller }
    }

    /// Creates a resource owned by `owner_id` with all seats remaining.
    #[tracing::instrument(skip(self, new), fields(title = %new.title))]
    pub async fn create_resource(&self, owner_id: SubjectId, new: NewResource) -> Result<Resource> {
        if new.capacity < 1 {
            return Err(BookingError::InvalidCapacity(format!(
                "capacity must be at least 1, got {}",
                new.capacity
            )));
        }
        if new.state == LifecycleState::Cancelled {
            return Err(BookingError::InvalidState(
                "a resource cannot be created cancelled".to_string(),
            ));
        }

        let resource = self
            .controller
            .execute("create_resource", |mut tx| {
                let new = new.clone();
                async move {
                    let now = tx.now().await?;
                    let resource = Resource {
                        id: ResourceId::new(),
                        owner_id,
                        title: new.title,
                        description: new.description,
                        location: new.location,
                        ticket_price_cents: i64::from(new.ticket_price_cents),
                        scheduled_at: new.scheduled_at,
                        capacity_total: new.capacity,
                        capacity_remaining: new.capacity,
                        state: new.state,
                        version: Version::first(),
                        created_at: now,
                        updated_at: now,
                    };

                    tx.insert_resource(&resource).await?;
                    tx.append_audit(&AuditEntry::new(
                        AuditKind::ResourceCreated,
                        &resource,
                        owner_id,
                        now,
                    ))
                    .await?;
                    tx.commit().await?;
                    Ok(resource)
                }
            })
            .await?;

        metrics::counter!("booking_resources_created_total").increment(1);
        tracing::info!(resource_id = %resource.id, %owner_id, state = %resource.state, "resource created");
        Ok(resource)
    }

    /// Reads a committed resource.
    pub async fn get_resource(&self, id: ResourceId) -> Result<Resource> {
        self.controller
            .store()
            .get_resource(id)
            .await?
            .ok_or_else(|| BookingError::resource_not_found(id))
    }

    /// Lists resources ordered by scheduled time, earliest first.
    pub async fn list_resources(&self, filter: &ResourceFilter) -> Result<Page<Resource>> {
        let store = self.controller.store();
        let mut query = filter.to_query();
        if filter.is_upcoming() {
            query = query.scheduled_from(store.now().await?);
        }

        Ok(store.query_resources(query).await?)
    }

    /// Moves a Draft resource to Published.
    #[tracing::instrument(skip(self))]
    pub async fn publish(&self, id: ResourceId, requester_id: SubjectId) -> Result<Resource> {
        self.transition(id, requester_id, LifecycleState::Published)
            .await
    }

    /// Moves a Draft or Published resource to Cancelled.
    ///
    /// Existing allocations stay Active and can still be reversed.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: ResourceId, requester_id: SubjectId) -> Result<Resource> {
        self.transition(id, requester_id, LifecycleState::Cancelled)
            .await
    }

    async fn transition(
        &self,
        id: ResourceId,
        requester_id: SubjectId,
        next: LifecycleState,
    ) -> Result<Resource> {
        let kind = match next {
            LifecycleState::Published => AuditKind::ResourcePublished,
            _ => AuditKind::ResourceCancelled,
        };

        let resource = self
            .controller
            .execute("transition", |mut tx| async move {
                let resource = lock_owned(&mut tx, id, requester_id).await?;

                if !resource.state.can_transition_to(next) {
                    return Err(BookingError::InvalidState(format!(
                        "resource {id} cannot move from {} to {next}",
                        resource.state
                    )));
                }

                let now = tx.now().await?;
                let mut updated = resource;
                updated.state = next;
                updated.updated_at = now;
                updated.version = tx.update_resource(&updated).await?;

                tx.append_audit(&AuditEntry::new(kind, &updated, requester_id, now))
                    .await?;
                tx.commit().await?;
                Ok(updated)
            })
            .await?;

        tracing::info!(resource_id = %id, state = %resource.state, "resource state changed");
        Ok(resource)
    }

    /// Changes descriptive fields of a resource that is not Cancelled.
    #[tracing::instrument(skip(self, update))]
    pub async fn update_details(
        &self,
        id: ResourceId,
        requester_id: SubjectId,
        update: ResourceUpdate,
    ) -> Result<Resource> {
        self.controller
            .execute("update_details", |mut tx| {
                let update = update.clone();
                async move {
                    let resource = lock_owned(&mut tx, id, requester_id).await?;

                    if resource.state.is_terminal() {
                        return Err(BookingError::InvalidState(format!(
                            "resource {id} is {} and can no longer be edited",
                            resource.state
                        )));
                    }
                    if update.is_empty() {
                        return Ok(resource);
                    }

                    let now = tx.now().await?;
                    let mut updated = resource;
                    update.apply_to(&mut updated);
                    updated.updated_at = now;
                    updated.version = tx.update_resource(&updated).await?;

                    tx.append_audit(&AuditEntry::new(
                        AuditKind::ResourceUpdated,
                        &updated,
                        requester_id,
                        now,
                    ))
                    .await?;
                    tx.commit().await?;
                    Ok(updated)
                }
            })
            .await
    }

    /// Deletes a resource that has no Active allocations.
    ///
    /// Reversed ledger rows and the audit journal are kept.
    #[tracing::instrument(skip(self))]
    pub async fn delete_resource(&self, id: ResourceId, requester_id: SubjectId) -> Result<()> {
        self.controller
            .execute("delete_resource", |mut tx| async move {
                let resource = lock_owned(&mut tx, id, requester_id).await?;

                let active = tx.active_quantity(id).await?;
                if active > 0 {
                    return Err(BookingError::InvalidState(format!(
                        "resource {id} still has {active} allocated seat(s)"
                    )));
                }

                let now = tx.now().await?;
                tx.delete_resource(id).await?;
                tx.append_audit(&AuditEntry::new(
                    AuditKind::ResourceDeleted,
                    &resource,
                    requester_id,
                    now,
                ))
                .await?;
                tx.commit().await?;
                Ok(())
            })
            .await?;

        tracing::info!(resource_id = %id, "resource deleted");
        Ok(())
    }
}

/// Locks a resource and checks that `requester_id` owns it.
async fn lock_owned<T: StoreTransaction>(
    tx: &mut T,
    id: ResourceId,
    requester_id: SubjectId,
) -> Result<Resource> {
    let resource = tx
        .lock_resource(id)
        .await?
        .ok_or_else(|| BookingError::resource_not_found(id))?;

    if resource.owner_id != requester_id {
        return Err(BookingError::Forbidden(format!(
            "resource {id} belongs to another organizer"
        )));
    }
    Ok(resource)
}
