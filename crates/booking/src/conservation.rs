use seat_store::{Resource, StoreTransaction};

use crate::error::{BookingError, Result};

/// Recounts Active seats inside `tx` and checks
/// `capacity_remaining + active == capacity_total` for the post-write image of `resource`.
pub(crate) async fn verify<T: StoreTransaction>(
    tx: &mut T,
    resource: &Resource,
    operation: &'static str,
) -> Result<()> {
    let active = tx.active_quantity(resource.id).await?;
    let remaining = i64::from(resource.capacity_remaining);
    let total = i64::from(resource.capacity_total);

    if remaining + active != total {
        tracing::error!(
            operation,
            resource_id = %resource.id,
            capacity_total = total,
            capacity_remaining = remaining,
            active_quantity = active,
            "seat accounting out of balance"
        );
        metrics::counter!("booking_consistency_failures_total", "operation" => operation)
            .increment(1);
        return Err(BookingError::InternalConsistency(format!(
            "resource {}: remaining {remaining} + active {active} != total {total}",
            resource.id
        )));
    }

    Ok(())
}
