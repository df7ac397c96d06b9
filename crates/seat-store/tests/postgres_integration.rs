//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p seat-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use seat_store::{
    ACTIVE_ALLOCATION_CONSTRAINT, Allocation, AllocationQuery, AllocationStatus, AuditEntry,
    AuditKind, LifecycleState, PostgresSeatStore, Resource, ResourceId, ResourceQuery, SeatStore,
    StoreConfig, StoreError, StoreTransaction, SubjectId, Version,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_booking_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store(config: StoreConfig) -> PostgresSeatStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE resources, allocations, audit_entries")
        .execute(&pool)
        .await
        .unwrap();

    PostgresSeatStore::with_config(pool, config)
}

fn create_test_resource(capacity: i32) -> Resource {
    // Postgres keeps microseconds; truncate so round-trips compare equal.
    let now = chrono::DateTime::from_timestamp_micros(Utc::now().timestamp_micros()).unwrap();
    Resource {
        id: ResourceId::new(),
        owner_id: SubjectId::new(),
        title: "Integration Event".to_string(),
        description: "Seats for testing".to_string(),
        location: "Lisbon".to_string(),
        ticket_price_cents: 2500,
        scheduled_at: now + chrono::Duration::days(10),
        capacity_total: capacity,
        capacity_remaining: capacity,
        state: LifecycleState::Published,
        version: Version::first(),
        created_at: now,
        updated_at: now,
    }
}

async fn seed(store: &PostgresSeatStore, resource: &Resource) {
    let mut tx = store.begin().await.unwrap();
    tx.insert_resource(resource).await.unwrap();
    tx.commit().await.unwrap();
}

#[tokio::test]
#[serial]
async fn resource_round_trips() {
    let store = get_test_store(StoreConfig::default()).await;
    let resource = create_test_resource(20);
    seed(&store, &resource).await;

    let stored = store.get_resource(resource.id).await.unwrap();
    assert_eq!(stored, Some(resource));
}

#[tokio::test]
#[serial]
async fn versioned_update_increments_and_rejects_stale() {
    let store = get_test_store(StoreConfig::default()).await;
    let resource = create_test_resource(20);
    seed(&store, &resource).await;

    let mut tx = store.begin().await.unwrap();
    let mut locked = tx.lock_resource(resource.id).await.unwrap().unwrap();
    locked.capacity_remaining = 18;
    let version = tx.update_resource(&locked).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(version, Version::new(2));

    // `locked` still carries version 1
    let mut tx = store.begin().await.unwrap();
    let result = tx.update_resource(&locked).await;
    assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
}

#[tokio::test]
#[serial]
async fn capacity_check_constraint_is_classified() {
    let store = get_test_store(StoreConfig::default()).await;
    let resource = create_test_resource(5);
    seed(&store, &resource).await;

    let mut tx = store.begin().await.unwrap();
    let mut locked = tx.lock_resource(resource.id).await.unwrap().unwrap();
    locked.capacity_remaining = -1;
    let result = tx.update_resource(&locked).await;

    assert!(matches!(result, Err(StoreError::CheckViolation { .. })));
}

#[tokio::test]
#[serial]
async fn second_transaction_times_out_on_held_row_lock() {
    let store =
        get_test_store(StoreConfig::default().lock_timeout(Duration::from_millis(100))).await;
    let resource = create_test_resource(5);
    seed(&store, &resource).await;

    let mut first = store.begin().await.unwrap();
    first.lock_resource(resource.id).await.unwrap();

    let mut second = store.begin().await.unwrap();
    let result = second.lock_resource(resource.id).await;
    assert!(matches!(result, Err(StoreError::LockTimeout { .. })));
    assert!(result.unwrap_err().is_conflict());
}

#[tokio::test]
#[serial]
async fn partial_unique_index_allows_one_active_row() {
    let store = get_test_store(StoreConfig::default()).await;
    let resource = create_test_resource(5);
    seed(&store, &resource).await;
    let subject = SubjectId::new();
    let first = Allocation::new(resource.id, subject, 1, Utc::now());

    let mut tx = store.begin().await.unwrap();
    tx.insert_allocation(&first).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = tx
        .insert_allocation(&Allocation::new(resource.id, subject, 1, Utc::now()))
        .await
        .unwrap_err();
    assert!(err.is_unique_violation_of(ACTIVE_ALLOCATION_CONSTRAINT));
    drop(tx);

    // After reversal the slot is free again.
    let mut tx = store.begin().await.unwrap();
    tx.mark_reversed(first.id, Utc::now()).await.unwrap();
    tx.insert_allocation(&Allocation::new(resource.id, subject, 2, Utc::now()))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(store.active_quantity(resource.id).await.unwrap(), 2);
    let reversed = store.get_allocation(first.id).await.unwrap().unwrap();
    assert_eq!(reversed.status, AllocationStatus::Reversed);
    assert!(reversed.reversed_at.is_some());
}

#[tokio::test]
#[serial]
async fn mark_reversed_requires_active_row() {
    let store = get_test_store(StoreConfig::default()).await;
    let resource = create_test_resource(5);
    seed(&store, &resource).await;
    let allocation = Allocation::new(resource.id, SubjectId::new(), 1, Utc::now());

    let mut tx = store.begin().await.unwrap();
    tx.insert_allocation(&allocation).await.unwrap();
    tx.mark_reversed(allocation.id, Utc::now()).await.unwrap();
    let result = tx.mark_reversed(allocation.id, Utc::now()).await;

    assert!(matches!(result, Err(StoreError::AllocationNotActive(_))));
}

#[tokio::test]
#[serial]
async fn dropped_transaction_rolls_back() {
    let store = get_test_store(StoreConfig::default()).await;
    let resource = create_test_resource(5);

    let mut tx = store.begin().await.unwrap();
    tx.insert_resource(&resource).await.unwrap();
    drop(tx);

    assert!(store.get_resource(resource.id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn query_resources_filters_location_and_paginates() {
    let store = get_test_store(StoreConfig::default()).await;
    let base = create_test_resource(5);
    for day in 0..3 {
        let mut resource = create_test_resource(5);
        resource.scheduled_at = base.scheduled_at + chrono::Duration::days(day);
        seed(&store, &resource).await;
    }
    let mut elsewhere = create_test_resource(5);
    elsewhere.location = "Porto".to_string();
    seed(&store, &elsewhere).await;

    let page = store
        .query_resources(ResourceQuery::new().location("lisb").limit(2).offset(1))
        .await
        .unwrap();

    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert!(page.items[0].scheduled_at <= page.items[1].scheduled_at);
    assert_eq!(page.total_pages(), 2);
}

#[tokio::test]
#[serial]
async fn query_allocations_by_subject_and_status() {
    let store = get_test_store(StoreConfig::default()).await;
    let subject = SubjectId::new();
    let first = create_test_resource(5);
    let second = create_test_resource(5);
    seed(&store, &first).await;
    seed(&store, &second).await;

    let kept = Allocation::new(first.id, subject, 1, Utc::now());
    let undone = Allocation::new(second.id, subject, 1, Utc::now());
    let mut tx = store.begin().await.unwrap();
    tx.insert_allocation(&kept).await.unwrap();
    tx.insert_allocation(&undone).await.unwrap();
    tx.mark_reversed(undone.id, Utc::now()).await.unwrap();
    tx.commit().await.unwrap();

    let page = store
        .query_allocations(AllocationQuery::for_subject(subject).status(AllocationStatus::Active))
        .await
        .unwrap();

    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, kept.id);
}

#[tokio::test]
#[serial]
async fn audit_trail_is_ordered() {
    let store = get_test_store(StoreConfig::default()).await;
    let resource = create_test_resource(5);

    let mut tx = store.begin().await.unwrap();
    tx.insert_resource(&resource).await.unwrap();
    for kind in [AuditKind::ResourceCreated, AuditKind::ResourcePublished] {
        tx.append_audit(&AuditEntry::new(kind, &resource, resource.owner_id, Utc::now()))
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();

    let trail = store.audit_trail(resource.id).await.unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].kind, AuditKind::ResourceCreated);
    assert_eq!(trail[1].kind, AuditKind::ResourcePublished);
}
