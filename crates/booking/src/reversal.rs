//! Cancellation of allocations and administrative capacity edits.

use std::sync::Arc;

use common::{AllocationId, ResourceId, SubjectId};
use seat_store::{Allocation, AuditEntry, AuditKind, Resource, SeatStore, StoreTransaction};

use crate::config::EngineConfig;
use crate::conservation;
use crate::controller::ConcurrencyController;
use crate::error::{BookingError, Result};

/// Gives seats back to a resource.
///
/// Both operations take the resource row lock before touching any
/// allocation row, the same order allocation uses.
pub struct ReversalEngine<S: SeatStore> {
    controller: Arc<ConcurrencyController<S>>,
    config: EngineConfig,
}

impl<S: SeatStore> ReversalEngine<S> {
    pub fn new(controller: Arc<ConcurrencyController<S>>, config: EngineConfig) -> Self {
        Self { controller, config }
    }

    /// Reverses an Active allocation held by `requester_id` and restores its seats.
    ///
    /// Returns the allocation in its Reversed state.
    #[tracing::instrument(skip(self), fields(outcome = tracing::field::Empty))]
    pub async fn reverse(
        &self,
        allocation_id: AllocationId,
        requester_id: SubjectId,
    ) -> Result<Allocation> {
        let result = self
            .controller
            .execute("reverse", |tx| {
                self.reverse_once(tx, allocation_id, requester_id)
            })
            .await;

        let outcome = match &result {
            Ok(_) => "reversed",
            Err(e) => e.kind(),
        };
        tracing::Span::current().record("outcome", outcome);
        metrics::counter!("booking_reversals_total", "outcome" => outcome).increment(1);

        if let Ok(allocation) = &result {
            tracing::info!(
                %allocation_id,
                resource_id = %allocation.resource_id,
                quantity = allocation.quantity,
                "allocation reversed"
            );
        }

        result
    }

    async fn reverse_once(
        &self,
        mut tx: S::Transaction,
        allocation_id: AllocationId,
        requester_id: SubjectId,
    ) -> Result<Allocation> {
        let allocation = tx
            .find_allocation(allocation_id)
            .await?
            .ok_or_else(|| BookingError::allocation_not_found(allocation_id))?;

        if allocation.subject_id != requester_id {
            return Err(BookingError::Forbidden(format!(
                "allocation {allocation_id} belongs to another subject"
            )));
        }
        if !allocation.is_active() {
            return Err(BookingError::AlreadyReversed(allocation_id));
        }

        // Resource first, then allocation.
        let resource = tx.lock_resource(allocation.resource_id).await?;
        let allocation = tx
            .lock_allocation(allocation_id)
            .await?
            .ok_or_else(|| BookingError::allocation_not_found(allocation_id))?;
        if !allocation.is_active() {
            return Err(BookingError::AlreadyReversed(allocation_id));
        }

        let Some(resource) = resource else {
            tracing::error!(
                %allocation_id,
                resource_id = %allocation.resource_id,
                quantity = allocation.quantity,
                "active allocation references a missing resource"
            );
            return Err(BookingError::InternalConsistency(format!(
                "allocation {allocation_id} is active but resource {} does not exist",
                allocation.resource_id
            )));
        };

        let now = tx.now().await?;
        let restored = resource.capacity_remaining.checked_add(allocation.quantity);
        let mut updated = match restored {
            Some(remaining) if remaining <= resource.capacity_total => Resource {
                capacity_remaining: remaining,
                updated_at: now,
                ..resource.clone()
            },
            _ => {
                tracing::error!(
                    %allocation_id,
                    resource_id = %resource.id,
                    capacity_total = resource.capacity_total,
                    remaining_before = resource.capacity_remaining,
                    remaining_after = ?restored,
                    quantity = allocation.quantity,
                    "reversal would exceed total capacity"
                );
                return Err(BookingError::InternalConsistency(format!(
                    "reversing {allocation_id} would raise remaining of resource {} from {} by {} above total {}",
                    resource.id, resource.capacity_remaining, allocation.quantity, resource.capacity_total
                )));
            }
        };

        tx.mark_reversed(allocation_id, now).await?;

        updated.version = tx.update_resource(&updated).await?;

        if self.config.verify_conservation {
            conservation::verify(&mut tx, &updated, "reverse").await?;
        }

        let entry = AuditEntry::new(AuditKind::Reversed, &updated, requester_id, now)
            .with_allocation(allocation_id)
            .with_delta(allocation.quantity);
        tx.append_audit(&entry).await?;

        tx.commit().await?;
        Ok(allocation.reversed(now))
    }

    /// Changes a resource's total capacity, keeping the booked seats.
    ///
    /// Returns the resized resource.
    #[tracing::instrument(skip(self))]
    pub async fn resize(
        &self,
        resource_id: ResourceId,
        new_total: i32,
        requester_id: SubjectId,
    ) -> Result<Resource> {
        let result = self
            .controller
            .execute("resize", |tx| {
                self.resize_once(tx, resource_id, new_total, requester_id)
            })
            .await;

        match &result {
            Ok(resource) => tracing::info!(
                %resource_id,
                capacity_total = resource.capacity_total,
                capacity_remaining = resource.capacity_remaining,
                "resource resized"
            ),
            Err(e) => tracing::debug!(%resource_id, new_total, error = %e, "resize rejected"),
        }

        result
    }

    async fn resize_once(
        &self,
        mut tx: S::Transaction,
        resource_id: ResourceId,
        new_total: i32,
        requester_id: SubjectId,
    ) -> Result<Resource> {
        let resource = tx
            .lock_resource(resource_id)
            .await?
            .ok_or_else(|| BookingError::resource_not_found(resource_id))?;

        if resource.owner_id != requester_id {
            return Err(BookingError::Forbidden(format!(
                "only the owner may resize resource {resource_id}"
            )));
        }

        let booked = resource.booked();
        if new_total < 1 {
            return Err(BookingError::InvalidCapacity(format!(
                "capacity must be at least 1, got {new_total}"
            )));
        }
        if new_total < booked {
            return Err(BookingError::InvalidCapacity(format!(
                "cannot reduce capacity to {new_total} below {booked} booked seats"
            )));
        }

        let now = tx.now().await?;
        let mut updated = resource.clone();
        updated.capacity_total = new_total;
        updated.capacity_remaining = new_total - booked;
        updated.updated_at = now;
        updated.version = tx.update_resource(&updated).await?;

        if self.config.verify_conservation {
            conservation::verify(&mut tx, &updated, "resize").await?;
        }

        let entry = AuditEntry::new(AuditKind::Resized, &updated, requester_id, now)
            .with_delta(updated.capacity_remaining - resource.capacity_remaining);
        tx.append_audit(&entry).await?;

        tx.commit().await?;
        Ok(updated)
    }
}
