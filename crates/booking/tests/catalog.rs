//! Resource catalog: creation, lifecycle transitions, edits, deletion and listing.

mod support;

use booking::{BookingError, NewResource, PageRequest, ResourceFilter, ResourceUpdate};
use chrono::{Duration, Utc};
use common::Principal;
use seat_store::{AuditKind, LifecycleState};
use support::{published_resource, service};

#[tokio::test]
async fn created_resources_start_draft_with_all_seats() {
    let service = service();
    let organizer = Principal::organizer();

    let resource = service
        .create_resource(
            &organizer,
            NewResource::new("Workshop", Utc::now() + Duration::days(3), 30)
                .description("Hands-on")
                .ticket_price_cents(1500),
        )
        .await
        .unwrap();

    assert_eq!(resource.state, LifecycleState::Draft);
    assert_eq!(resource.capacity_total, 30);
    assert_eq!(resource.capacity_remaining, 30);
    assert_eq!(resource.owner_id, organizer.subject_id);
    assert_eq!(resource.ticket_price_cents, 1500);
    assert_eq!(service.get_resource(resource.id).await.unwrap(), resource);
}

#[tokio::test]
async fn creation_validates_capacity_state_and_role() {
    let service = service();
    let organizer = Principal::organizer();
    let when = Utc::now() + Duration::days(3);

    let zero = service
        .create_resource(&organizer, NewResource::new("Empty", when, 0))
        .await;
    assert!(matches!(zero, Err(BookingError::InvalidCapacity(_))));

    let mut cancelled = NewResource::new("Dead", when, 5);
    cancelled.state = LifecycleState::Cancelled;
    let cancelled = service.create_resource(&organizer, cancelled).await;
    assert!(matches!(cancelled, Err(BookingError::InvalidState(_))));

    let attendee = service
        .create_resource(&Principal::attendee(), NewResource::new("Mine", when, 5))
        .await;
    assert!(matches!(attendee, Err(BookingError::Forbidden(_))));
}

#[tokio::test]
async fn lifecycle_moves_forward_only() {
    let service = service();
    let organizer = Principal::organizer();
    let draft = service
        .create_resource(
            &organizer,
            NewResource::new("Talk", Utc::now() + Duration::days(1), 10),
        )
        .await
        .unwrap();

    let published = service.publish(&organizer, draft.id).await.unwrap();
    assert_eq!(published.state, LifecycleState::Published);
    assert!(published.version > draft.version);

    let again = service.publish(&organizer, draft.id).await;
    assert!(matches!(again, Err(BookingError::InvalidState(_))));

    let cancelled = service.cancel(&organizer, draft.id).await.unwrap();
    assert_eq!(cancelled.state, LifecycleState::Cancelled);

    let republish = service.publish(&organizer, draft.id).await;
    assert!(matches!(republish, Err(BookingError::InvalidState(_))));
    let recancel = service.cancel(&organizer, draft.id).await;
    assert!(matches!(recancel, Err(BookingError::InvalidState(_))));
}

#[tokio::test]
async fn draft_can_be_cancelled_directly() {
    let service = service();
    let organizer = Principal::organizer();
    let draft = service
        .create_resource(
            &organizer,
            NewResource::new("Maybe", Utc::now() + Duration::days(1), 10),
        )
        .await
        .unwrap();

    let cancelled = service.cancel(&organizer, draft.id).await.unwrap();
    assert_eq!(cancelled.state, LifecycleState::Cancelled);
}

#[tokio::test]
async fn only_the_owner_may_transition() {
    let service = service();
    let organizer = Principal::organizer();
    let resource = published_resource(&service, &organizer, 5).await;

    let result = service.cancel(&Principal::organizer(), resource.id).await;
    assert!(matches!(result, Err(BookingError::Forbidden(_))));
}

#[tokio::test]
async fn update_details_changes_only_given_fields() {
    let service = service();
    let organizer = Principal::organizer();
    let resource = published_resource(&service, &organizer, 5).await;
    let moved_to = resource.scheduled_at + Duration::days(2);

    let updated = service
        .update_details(
            &organizer,
            resource.id,
            ResourceUpdate {
                location: Some("Hamburg".to_string()),
                scheduled_at: Some(moved_to),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.location, "Hamburg");
    assert_eq!(updated.scheduled_at, moved_to);
    assert_eq!(updated.title, resource.title);
    assert_eq!(updated.capacity_remaining, resource.capacity_remaining);
}

#[tokio::test]
async fn cancelled_resources_cannot_be_edited() {
    let service = service();
    let organizer = Principal::organizer();
    let resource = published_resource(&service, &organizer, 5).await;
    service.cancel(&organizer, resource.id).await.unwrap();

    let result = service
        .update_details(
            &organizer,
            resource.id,
            ResourceUpdate {
                title: Some("Back on".to_string()),
                ..Default::default()
            },
        )
        .await;

    assert!(matches!(result, Err(BookingError::InvalidState(_))));
}

#[tokio::test]
async fn delete_is_refused_while_seats_are_held() {
    let service = service();
    let organizer = Principal::organizer();
    let attendee = Principal::attendee();
    let resource = published_resource(&service, &organizer, 5).await;
    let allocation = service.allocate(&attendee, resource.id, 1).await.unwrap();

    let refused = service.delete_resource(&organizer, resource.id).await;
    assert!(matches!(refused, Err(BookingError::InvalidState(_))));

    service.reverse(&attendee, allocation.id).await.unwrap();
    service.delete_resource(&organizer, resource.id).await.unwrap();

    let gone = service.get_resource(resource.id).await;
    assert!(matches!(gone, Err(BookingError::NotFound { .. })));

    // The ledger and journal outlive the resource.
    let mine = service
        .list_my_allocations(&attendee, None, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(mine.total, 1);
    let trail = service.audit_trail(resource.id).await.unwrap();
    assert_eq!(trail.last().map(|e| e.kind), Some(AuditKind::ResourceDeleted));
}

#[tokio::test]
async fn delete_requires_ownership() {
    let service = service();
    let organizer = Principal::organizer();
    let resource = published_resource(&service, &organizer, 5).await;

    let result = service
        .delete_resource(&Principal::organizer(), resource.id)
        .await;

    assert!(matches!(result, Err(BookingError::Forbidden(_))));
    assert!(service.get_resource(resource.id).await.is_ok());
}

#[tokio::test]
async fn listing_filters_and_paginates() {
    let service = service();
    let organizer = Principal::organizer();
    let base = Utc::now() + Duration::days(1);

    for (offset, location) in [(3, "Berlin Mitte"), (1, "berlin kreuzberg"), (2, "Munich")] {
        service
            .create_resource(
                &organizer,
                NewResource::new("Gig", base + Duration::days(offset), 5)
                    .location(location)
                    .published(),
            )
            .await
            .unwrap();
    }
    service
        .create_resource(
            &organizer,
            NewResource::new("Unlisted", base, 5).location("Berlin"),
        )
        .await
        .unwrap();

    let berlin = service
        .list_resources(
            &ResourceFilter::new()
                .state(LifecycleState::Published)
                .location("BERLIN"),
        )
        .await
        .unwrap();
    assert_eq!(berlin.total, 2);
    assert_eq!(berlin.items[0].location, "berlin kreuzberg");
    assert_eq!(berlin.items[1].location, "Berlin Mitte");

    let second_page = service
        .list_resources(&ResourceFilter::new().page(PageRequest::new(2, 3)))
        .await
        .unwrap();
    assert_eq!(second_page.total, 4);
    assert_eq!(second_page.items.len(), 1);
    assert_eq!(second_page.total_pages(), 2);

    let on_day = service
        .list_resources(&ResourceFilter::new().on((base + Duration::days(2)).date_naive()))
        .await
        .unwrap();
    assert!(on_day.items.iter().any(|r| r.location == "Munich"));
}

#[tokio::test]
async fn upcoming_excludes_past_resources() {
    let (service, clock) = support::service_with_clock();
    let organizer = Principal::organizer();
    let soon = service
        .create_resource(
            &organizer,
            NewResource::new("Soon", Utc::now() + Duration::hours(1), 5).published(),
        )
        .await
        .unwrap();
    let later = service
        .create_resource(
            &organizer,
            NewResource::new("Later", Utc::now() + Duration::days(5), 5).published(),
        )
        .await
        .unwrap();

    clock.advance(Duration::days(1));
    let upcoming = service
        .list_resources(&ResourceFilter::new().upcoming())
        .await
        .unwrap();

    let ids: Vec<_> = upcoming.items.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![later.id]);
    assert!(!ids.contains(&soon.id));
}
