#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use booking::{BookingService, EngineConfig, NewResource};
use chrono::Utc;
use common::Principal;
use seat_store::{InMemorySeatStore, ManualClock, Resource};

pub type Service = BookingService<InMemorySeatStore>;

pub fn engine_config() -> EngineConfig {
    EngineConfig::default()
        .max_retries(10)
        .backoff(Duration::from_millis(1), Duration::from_millis(20))
}

pub fn service() -> Service {
    BookingService::new(InMemorySeatStore::new(), engine_config())
}

/// A service whose store observes a clock the test controls.
pub fn service_with_clock() -> (Service, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store = InMemorySeatStore::with_clock(clock.clone());
    (BookingService::new(store, engine_config()), clock)
}

/// Creates a Published resource a week out.
pub async fn published_resource(
    service: &Service,
    organizer: &Principal,
    capacity: i32,
) -> Resource {
    let new = NewResource::new(
        "Rust Meetup",
        Utc::now() + chrono::Duration::days(7),
        capacity,
    )
    .location("Berlin")
    .published();
    service.create_resource(organizer, new).await.unwrap()
}

/// Asserts `remaining + Σ active == total` against committed state.
pub async fn assert_conserved(service: &Service, resource: &Resource) {
    let current = service.get_resource(resource.id).await.unwrap();
    let active = service.active_quantity(resource.id).await.unwrap();
    assert_eq!(
        i64::from(current.capacity_remaining) + active,
        i64::from(current.capacity_total),
        "seat accounting out of balance for {}",
        resource.id
    );
}
