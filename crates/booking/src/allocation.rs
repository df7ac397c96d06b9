//! Seat allocation.

use std::sync::Arc;

use common::{ResourceId, SubjectId};
use seat_store::{
    ACTIVE_ALLOCATION_CONSTRAINT, Allocation, AuditEntry, AuditKind, SeatStore, StoreTransaction,
};

use crate::config::EngineConfig;
use crate::conservation;
use crate::controller::ConcurrencyController;
use crate::error::{BookingError, Result};

/// Claims seats on a resource for a subject.
///
/// A claim is accepted only while the resource is Published and its
/// scheduled time has not passed, and only if enough seats remain. The
/// ledger insert and the capacity decrement commit together or not at all.
pub struct AllocationEngine<S: SeatStore> {
    controller: Arc<ConcurrencyController<S>>,
    config: EngineConfig,
}

impl<S: SeatStore> AllocationEngine<S> {
    pub fn new(controller: Arc<ConcurrencyController<S>>, config: EngineConfig) -> Self {
        Self { controller, config }
    }

    /// Allocates `quantity` seats on `resource_id` to `subject_id`.
    #[tracing::instrument(skip(self), fields(outcome = tracing::field::Empty))]
    pub async fn allocate(
        &self,
        resource_id: ResourceId,
        subject_id: SubjectId,
        quantity: i32,
    ) -> Result<Allocation> {
        if quantity < 1 {
            return Err(BookingError::InvalidQuantity(quantity));
        }

        let result = self
            .controller
            .execute("allocate", |tx| {
                self.allocate_once(tx, resource_id, subject_id, quantity)
            })
            .await;

        let outcome = match &result {
            Ok(_) => "allocated",
            Err(e) => e.kind(),
        };
        tracing::Span::current().record("outcome", outcome);
        metrics::counter!("booking_allocations_total", "outcome" => outcome).increment(1);

        match &result {
            Ok(allocation) => {
                tracing::info!(allocation_id = %allocation.id, %resource_id, %subject_id, quantity, "seats allocated")
            }
            Err(BookingError::InternalConsistency(_)) => {}
            Err(e) => tracing::debug!(%resource_id, %subject_id, error = %e, "allocation rejected"),
        }

        result
    }

    async fn allocate_once(
        &self,
        mut tx: S::Transaction,
        resource_id: ResourceId,
        subject_id: SubjectId,
        quantity: i32,
    ) -> Result<Allocation> {
        let resource = tx
            .lock_resource(resource_id)
            .await?
            .ok_or_else(|| BookingError::resource_not_found(resource_id))?;

        if !resource.state.accepts_allocations() {
            return Err(BookingError::InvalidState(format!(
                "resource {resource_id} is {} and does not accept allocations",
                resource.state
            )));
        }

        let now = tx.now().await?;
        if resource.is_past(now) {
            return Err(BookingError::InvalidState(format!(
                "resource {resource_id} was scheduled at {} and is in the past",
                resource.scheduled_at
            )));
        }

        if quantity > resource.capacity_remaining {
            return Err(BookingError::CapacityExceeded {
                requested: quantity,
                remaining: resource.capacity_remaining,
            });
        }

        let allocation = Allocation::new(resource_id, subject_id, quantity, now);
        tx.insert_allocation(&allocation).await.map_err(|e| {
            if e.is_unique_violation_of(ACTIVE_ALLOCATION_CONSTRAINT) {
                BookingError::DuplicateAllocation {
                    resource_id,
                    subject_id,
                }
            } else {
                BookingError::from(e)
            }
        })?;

        let mut updated = resource;
        updated.capacity_remaining -= quantity;
        updated.updated_at = now;
        updated.version = tx.update_resource(&updated).await?;

        if self.config.verify_conservation {
            conservation::verify(&mut tx, &updated, "allocate").await?;
        }

        let entry = AuditEntry::new(AuditKind::Allocated, &updated, subject_id, now)
            .with_allocation(allocation.id)
            .with_delta(-quantity);
        tx.append_audit(&entry).await?;

        tx.commit().await?;
        Ok(allocation)
    }
}
