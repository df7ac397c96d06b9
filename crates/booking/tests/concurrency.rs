//! Contention tests: many tasks racing for the same seats on a multi-threaded runtime.

mod support;

use std::sync::Arc;
use std::time::Duration;

use booking::{BookingError, BookingService, EngineConfig};
use common::Principal;
use futures_util::future::join_all;
use seat_store::{
    AllocationQuery, AllocationStatus, InMemorySeatStore, SeatStore, StoreConfig,
    StoreTransaction, SystemClock,
};
use support::{assert_conserved, published_resource, service};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_subjects_racing_for_the_last_seat() {
    let service = Arc::new(service());
    let organizer = Principal::organizer();
    let resource = published_resource(&service, &organizer, 1).await;
    let resource_id = resource.id;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .allocate(&Principal::attendee(), resource_id, 1)
                    .await
            })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let exceeded = results
        .iter()
        .filter(|r| matches!(r, Err(BookingError::CapacityExceeded { .. })))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(exceeded, 1);
    assert_eq!(service.query_remaining(resource.id).await.unwrap(), 0);
    assert_conserved(&service, &resource).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn no_oversell_under_heavy_contention() {
    let service = Arc::new(service());
    let organizer = Principal::organizer();
    let resource = published_resource(&service, &organizer, 10).await;
    let resource_id = resource.id;

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .allocate(&Principal::attendee(), resource_id, 1)
                    .await
            })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 10);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, BookingError::CapacityExceeded { .. }))
    );
    assert_eq!(service.query_remaining(resource.id).await.unwrap(), 0);
    assert_conserved(&service, &resource).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_subject_submitting_twice_concurrently() {
    let service = Arc::new(service());
    let organizer = Principal::organizer();
    let attendee = Principal::attendee();
    let resource = published_resource(&service, &organizer, 10).await;
    let resource_id = resource.id;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.allocate(&attendee, resource_id, 2).await })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(BookingError::DuplicateAllocation { .. })))
            .count(),
        1
    );

    let active = service
        .store()
        .query_allocations(
            AllocationQuery::for_resource(resource.id).status(AllocationStatus::Active),
        )
        .await
        .unwrap();
    assert_eq!(active.total, 1);
    assert_eq!(service.query_remaining(resource.id).await.unwrap(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn interleaved_allocations_and_reversals_conserve_seats() {
    let service = Arc::new(service());
    let organizer = Principal::organizer();
    let resource = published_resource(&service, &organizer, 20).await;
    let resource_id = resource.id;

    let handles: Vec<_> = (0..40)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let attendee = Principal::attendee();
                let quantity = (i % 3) + 1;
                if let Ok(allocation) = service.allocate(&attendee, resource_id, quantity).await
                    && i % 2 == 0
                {
                    service.reverse(&attendee, allocation.id).await.unwrap();
                }
            })
        })
        .collect();

    for joined in join_all(handles).await {
        joined.unwrap();
    }

    assert_conserved(&service, &resource).await;
    let remaining = service.query_remaining(resource.id).await.unwrap();
    assert!((0..=20).contains(&remaining));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resize_racing_allocations_never_drops_below_booked() {
    let service = Arc::new(service());
    let organizer = Principal::organizer();
    let resource = published_resource(&service, &organizer, 10).await;
    let resource_id = resource.id;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let _ = service.allocate(&Principal::attendee(), resource_id, 1).await;
        }));
    }
    for total in [6, 12, 4] {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let _ = service.resize(&organizer, resource_id, total).await;
        }));
    }

    for joined in join_all(handles).await {
        joined.unwrap();
    }

    let current = service.get_resource(resource.id).await.unwrap();
    assert!(current.capacity_remaining >= 0);
    assert!(current.capacity_remaining <= current.capacity_total);
    assert_conserved(&service, &resource).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_resources_do_not_interfere() {
    let service = Arc::new(service());
    let organizer = Principal::organizer();
    let a = published_resource(&service, &organizer, 5).await;
    let b = published_resource(&service, &organizer, 5).await;

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let service = Arc::clone(&service);
            let target = if i % 2 == 0 { a.id } else { b.id };
            tokio::spawn(async move { service.allocate(&Principal::attendee(), target, 1).await })
        })
        .collect();

    for joined in join_all(handles).await {
        joined.unwrap().unwrap();
    }

    assert_eq!(service.query_remaining(a.id).await.unwrap(), 0);
    assert_eq!(service.query_remaining(b.id).await.unwrap(), 0);
}

#[tokio::test]
async fn held_row_lock_surfaces_as_conflict_after_retries() {
    let store = InMemorySeatStore::with_config(
        StoreConfig::default().lock_timeout(Duration::from_millis(20)),
        Arc::new(SystemClock),
    );
    let config = EngineConfig::default()
        .max_retries(2)
        .backoff(Duration::from_millis(1), Duration::from_millis(2));
    let service = BookingService::new(store, config);
    let organizer = Principal::organizer();
    let attendee = Principal::attendee();
    let resource = published_resource(&service, &organizer, 5).await;

    let mut blocker = service.store().begin().await.unwrap();
    blocker.lock_resource(resource.id).await.unwrap().unwrap();

    let result = service.allocate(&attendee, resource.id, 2).await;
    assert!(
        matches!(result, Err(BookingError::Conflict { attempts: 3, .. })),
        "expected conflict after 3 attempts, got {result:?}"
    );
    assert_eq!(service.query_remaining(resource.id).await.unwrap(), 5);

    drop(blocker);
    service.allocate(&attendee, resource.id, 2).await.unwrap();
    assert_eq!(service.query_remaining(resource.id).await.unwrap(), 3);
    assert_conserved(&service, &resource).await;
}
