//! The contention run itself.

use std::ops::AddAssign;
use std::sync::Arc;
use std::time::{Duration, Instant};

use booking::{BookingError, BookingService, NewResource};
use chrono::Utc;
use common::{Principal, ResourceId};
use seat_store::SeatStore;
use serde::Serialize;

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum SoakError {
    #[error("booking error: {0}")]
    Booking(#[from] BookingError),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid soak configuration: {0}")]
    InvalidConfig(String),
}

/// Outcome counts gathered by one worker.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Tally {
    pub allocated: u64,
    pub allocated_seats: i64,
    pub reversed: u64,
    pub reversed_seats: i64,
    pub capacity_exceeded: u64,
    pub duplicates: u64,
    pub conflicts: u64,
    pub consistency_failures: u64,
    pub other_errors: u64,
}

impl Tally {
    fn record_error(&mut self, err: &BookingError) {
        match err {
            BookingError::CapacityExceeded { .. } => self.capacity_exceeded += 1,
            BookingError::DuplicateAllocation { .. } => self.duplicates += 1,
            BookingError::Conflict { .. } => self.conflicts += 1,
            BookingError::InternalConsistency(_) => self.consistency_failures += 1,
            other => {
                tracing::warn!(error = %other, kind = other.kind(), "unexpected booking error");
                self.other_errors += 1;
            }
        }
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, rhs: Self) {
        self.allocated += rhs.allocated;
        self.allocated_seats += rhs.allocated_seats;
        self.reversed += rhs.reversed;
        self.reversed_seats += rhs.reversed_seats;
        self.capacity_exceeded += rhs.capacity_exceeded;
        self.duplicates += rhs.duplicates;
        self.conflicts += rhs.conflicts;
        self.consistency_failures += rhs.consistency_failures;
        self.other_errors += rhs.other_errors;
    }
}

/// Final seat accounting of one resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceBalance {
    pub resource_id: ResourceId,
    pub capacity_total: i32,
    pub capacity_remaining: i32,
    pub active_quantity: i64,
    pub balanced: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SoakReport {
    pub workers: usize,
    pub rounds: usize,
    pub elapsed_ms: u128,
    pub total_seats: i64,
    pub tally: Tally,
    pub resources: Vec<ResourceBalance>,
}

impl SoakReport {
    /// True if every resource balances and the ledger agrees with what the
    /// workers observed.
    pub fn is_consistent(&self) -> bool {
        let active: i64 = self.resources.iter().map(|r| r.active_quantity).sum();
        let total: i64 = self
            .resources
            .iter()
            .map(|r| i64::from(r.capacity_total))
            .sum();
        self.tally.consistency_failures == 0
            && self.resources.iter().all(|r| r.balanced)
            && total == self.total_seats
            && active == self.tally.allocated_seats - self.tally.reversed_seats
    }
}

/// Creates the resources, hammers them from `config.workers` concurrent
/// attendees, then checks every resource's seat accounting.
pub async fn run<S>(service: Arc<BookingService<S>>, config: &Config) -> Result<SoakReport, SoakError>
where
    S: SeatStore + 'static,
    S::Transaction: 'static,
{
    if config.resources == 0 || config.workers == 0 || config.capacity < 1 {
        return Err(SoakError::InvalidConfig(format!(
            "resources ({}), workers ({}) and capacity ({}) must all be at least 1",
            config.resources, config.workers, config.capacity
        )));
    }

    let organizer = Principal::organizer();
    let mut resource_ids = Vec::with_capacity(config.resources);
    for n in 0..config.resources {
        let new = NewResource::new(
            format!("soak resource {n}"),
            Utc::now() + chrono::Duration::days(30),
            config.capacity,
        )
        .published();
        let resource = service.create_resource(&organizer, new).await?;
        resource_ids.push(resource.id);
    }
    let resource_ids = Arc::new(resource_ids);

    tracing::info!(
        resources = config.resources,
        capacity = config.capacity,
        total_seats = config.total_seats(),
        workers = config.workers,
        rounds = config.rounds,
        "starting soak run"
    );

    let started = Instant::now();
    let mut handles = Vec::with_capacity(config.workers);
    for worker in 0..config.workers {
        let service = Arc::clone(&service);
        let resource_ids = Arc::clone(&resource_ids);
        let rounds = config.rounds;
        let reverse_percent = config.reverse_percent as usize;
        handles.push(tokio::spawn(async move {
            work(service, worker, &resource_ids, rounds, reverse_percent).await
        }));
    }

    let mut tally = Tally::default();
    for handle in handles {
        tally += handle.await?;
    }
    let elapsed = started.elapsed();

    let mut resources = Vec::with_capacity(resource_ids.len());
    for &id in resource_ids.iter() {
        resources.push(balance(&service, id).await?);
    }

    Ok(SoakReport {
        workers: config.workers,
        rounds: config.rounds,
        elapsed_ms: elapsed.as_millis(),
        total_seats: config.total_seats(),
        tally,
        resources,
    })
}

async fn work<S: SeatStore>(
    service: Arc<BookingService<S>>,
    worker: usize,
    resource_ids: &[ResourceId],
    rounds: usize,
    reverse_percent: usize,
) -> Tally {
    let attendee = Principal::attendee();
    let mut tally = Tally::default();

    for round in 0..rounds {
        let resource_id = resource_ids[(worker + round) % resource_ids.len()];
        let quantity = 1 + ((worker + round) % 2) as i32;

        let allocation = match service.allocate(&attendee, resource_id, quantity).await {
            Ok(allocation) => {
                tally.allocated += 1;
                tally.allocated_seats += i64::from(allocation.quantity);
                allocation
            }
            Err(err) => {
                tally.record_error(&err);
                continue;
            }
        };

        if (worker * 31 + round * 17) % 100 < reverse_percent {
            match service.reverse(&attendee, allocation.id).await {
                Ok(reversed) => {
                    tally.reversed += 1;
                    tally.reversed_seats += i64::from(reversed.quantity);
                }
                Err(err) => tally.record_error(&err),
            }
        }

        if round % 8 == 7 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    tracing::debug!(worker, allocated = tally.allocated, reversed = tally.reversed, "worker finished");
    tally
}

async fn balance<S: SeatStore>(
    service: &BookingService<S>,
    resource_id: ResourceId,
) -> Result<ResourceBalance, SoakError> {
    let resource = service.get_resource(resource_id).await?;
    let active_quantity = service.active_quantity(resource_id).await?;
    let balanced =
        i64::from(resource.capacity_remaining) + active_quantity == i64::from(resource.capacity_total);

    if !balanced {
        tracing::error!(
            %resource_id,
            total = resource.capacity_total,
            remaining = resource.capacity_remaining,
            active = active_quantity,
            "seat accounting does not balance"
        );
    }

    Ok(ResourceBalance {
        resource_id,
        capacity_total: resource.capacity_total,
        capacity_remaining: resource.capacity_remaining,
        active_quantity,
        balanced,
    })
}
