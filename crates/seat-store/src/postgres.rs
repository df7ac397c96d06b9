use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AllocationId, AuditId, ResourceId, SubjectId};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Allocation, AllocationQuery, AuditEntry, Page, Resource, ResourceQuery, Result, StoreConfig,
    StoreError, Version,
    store::{SeatStore, StoreTransaction},
};

const RESOURCE_COLUMNS: &str = "id, owner_id, title, description, location, ticket_price_cents, \
     scheduled_at, capacity_total, capacity_remaining, state, version, created_at, updated_at";

const ALLOCATION_COLUMNS: &str =
    "id, resource_id, subject_id, quantity, status, created_at, reversed_at";

const AUDIT_COLUMNS: &str = "id, resource_id, allocation_id, actor_id, kind, quantity_delta, \
     capacity_total, capacity_remaining, recorded_at";

/// PostgreSQL-backed seat store.
///
/// Row locks are `SELECT ... FOR UPDATE`; the wait is bounded by the
/// transaction-local `lock_timeout` taken from [`StoreConfig`].
#[derive(Clone)]
pub struct PostgresSeatStore {
    pool: PgPool,
    config: StoreConfig,
}

impl PostgresSeatStore {
    /// Creates a new PostgreSQL seat store.
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, StoreConfig::default())
    }

    /// Creates a new PostgreSQL seat store with explicit settings.
    pub fn with_config(pool: PgPool, config: StoreConfig) -> Self {
        Self { pool, config }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("seat store migrations applied");
        Ok(())
    }
}

fn decode<T>(value: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(StoreError::Decode)
}

fn row_to_resource(row: PgRow) -> Result<Resource> {
    Ok(Resource {
        id: ResourceId::from_uuid(row.try_get::<Uuid, _>("id")?),
        owner_id: SubjectId::from_uuid(row.try_get::<Uuid, _>("owner_id")?),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        location: row.try_get("location")?,
        ticket_price_cents: row.try_get("ticket_price_cents")?,
        scheduled_at: row.try_get("scheduled_at")?,
        capacity_total: row.try_get("capacity_total")?,
        capacity_remaining: row.try_get("capacity_remaining")?,
        state: decode(row.try_get::<&str, _>("state")?)?,
        version: Version::new(row.try_get("version")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_allocation(row: PgRow) -> Result<Allocation> {
    Ok(Allocation {
        id: AllocationId::from_uuid(row.try_get::<Uuid, _>("id")?),
        resource_id: ResourceId::from_uuid(row.try_get::<Uuid, _>("resource_id")?),
        subject_id: SubjectId::from_uuid(row.try_get::<Uuid, _>("subject_id")?),
        quantity: row.try_get("quantity")?,
        status: decode(row.try_get::<&str, _>("status")?)?,
        created_at: row.try_get("created_at")?,
        reversed_at: row.try_get("reversed_at")?,
    })
}

fn row_to_audit(row: PgRow) -> Result<AuditEntry> {
    Ok(AuditEntry {
        id: AuditId::from_uuid(row.try_get::<Uuid, _>("id")?),
        resource_id: ResourceId::from_uuid(row.try_get::<Uuid, _>("resource_id")?),
        allocation_id: row
            .try_get::<Option<Uuid>, _>("allocation_id")?
            .map(AllocationId::from_uuid),
        actor_id: SubjectId::from_uuid(row.try_get::<Uuid, _>("actor_id")?),
        kind: decode(row.try_get::<&str, _>("kind")?)?,
        quantity_delta: row.try_get("quantity_delta")?,
        capacity_total: row.try_get("capacity_total")?,
        capacity_remaining: row.try_get("capacity_remaining")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn push_resource_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &ResourceQuery) {
    builder.push(" WHERE 1=1");
    if let Some(state) = query.state {
        builder.push(" AND state = ").push_bind(state.as_str());
    }
    if let Some(ref location) = query.location {
        let escaped = location
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        builder
            .push(" AND location ILIKE ")
            .push_bind(format!("%{escaped}%"));
    }
    if let Some(owner_id) = query.owner_id {
        builder.push(" AND owner_id = ").push_bind(owner_id.as_uuid());
    }
    if let Some(from) = query.scheduled_from {
        builder.push(" AND scheduled_at >= ").push_bind(from);
    }
    if let Some(before) = query.scheduled_before {
        builder.push(" AND scheduled_at < ").push_bind(before);
    }
}

fn push_allocation_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &AllocationQuery) {
    builder.push(" WHERE 1=1");
    if let Some(resource_id) = query.resource_id {
        builder
            .push(" AND resource_id = ")
            .push_bind(resource_id.as_uuid());
    }
    if let Some(subject_id) = query.subject_id {
        builder
            .push(" AND subject_id = ")
            .push_bind(subject_id.as_uuid());
    }
    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
}

fn push_pagination(
    builder: &mut QueryBuilder<'_, Postgres>,
    limit: Option<usize>,
    offset: Option<usize>,
) {
    if let Some(limit) = limit {
        builder.push(" LIMIT ").push_bind(limit as i64);
    }
    if let Some(offset) = offset {
        builder.push(" OFFSET ").push_bind(offset as i64);
    }
}

#[async_trait]
impl SeatStore for PostgresSeatStore {
    type Transaction = PostgresTransaction;

    async fn now(&self) -> Result<DateTime<Utc>> {
        let now: DateTime<Utc> = sqlx::query_scalar("SELECT now()")
            .fetch_one(&self.pool)
            .await?;
        Ok(now)
    }

    async fn begin(&self) -> Result<PostgresTransaction> {
        let mut tx = self.pool.begin().await?;

        // Transaction-local; reset on commit or rollback.
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(self.config.pg_lock_timeout())
            .execute(&mut *tx)
            .await?;

        Ok(PostgresTransaction {
            tx,
            config: self.config.clone(),
        })
    }

    async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>> {
        let row = sqlx::query(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_resource).transpose()
    }

    async fn get_allocation(&self, id: AllocationId) -> Result<Option<Allocation>> {
        let row = sqlx::query(&format!(
            "SELECT {ALLOCATION_COLUMNS} FROM allocations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_allocation).transpose()
    }

    async fn query_resources(&self, query: ResourceQuery) -> Result<Page<Resource>> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM resources");
        push_resource_filters(&mut count, &query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {RESOURCE_COLUMNS} FROM resources"));
        push_resource_filters(&mut select, &query);
        select.push(" ORDER BY scheduled_at ASC, id ASC");
        push_pagination(&mut select, query.limit, query.offset);

        let rows = select.build().fetch_all(&self.pool).await?;
        let items = rows
            .into_iter()
            .map(row_to_resource)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total.max(0) as u64,
            limit: query.limit,
            offset: query.offset.unwrap_or(0),
        })
    }

    async fn query_allocations(&self, query: AllocationQuery) -> Result<Page<Allocation>> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM allocations");
        push_allocation_filters(&mut count, &query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::new(format!("SELECT {ALLOCATION_COLUMNS} FROM allocations"));
        push_allocation_filters(&mut select, &query);
        select.push(" ORDER BY created_at DESC, id ASC");
        push_pagination(&mut select, query.limit, query.offset);

        let rows = select.build().fetch_all(&self.pool).await?;
        let items = rows
            .into_iter()
            .map(row_to_allocation)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total.max(0) as u64,
            limit: query.limit,
            offset: query.offset.unwrap_or(0),
        })
    }

    async fn active_quantity(&self, resource_id: ResourceId) -> Result<i64> {
        let sum: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM allocations
            WHERE resource_id = $1 AND status = 'ACTIVE'
            "#,
        )
        .bind(resource_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Ok(sum)
    }

    async fn audit_trail(&self, resource_id: ResourceId) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_entries WHERE resource_id = $1 ORDER BY seq ASC"
        ))
        .bind(resource_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_audit).collect()
    }
}

/// A transaction against [`PostgresSeatStore`]. Rolls back on drop.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    config: StoreConfig,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn now(&mut self) -> Result<DateTime<Utc>> {
        let now: DateTime<Utc> = sqlx::query_scalar("SELECT now()")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(now)
    }

    async fn lock_resource(&mut self, id: ResourceId) -> Result<Option<Resource>> {
        let row = sqlx::query(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.code().as_deref() == Some("55P03")
            {
                tracing::debug!(resource_id = %id, "resource row lock timed out");
                return StoreError::LockTimeout {
                    resource_id: id,
                    waited: self.config.lock_timeout,
                };
            }
            StoreError::from(e)
        })?;

        row.map(row_to_resource).transpose()
    }

    async fn find_allocation(&mut self, id: AllocationId) -> Result<Option<Allocation>> {
        let row = sqlx::query(&format!(
            "SELECT {ALLOCATION_COLUMNS} FROM allocations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_allocation).transpose()
    }

    async fn lock_allocation(&mut self, id: AllocationId) -> Result<Option<Allocation>> {
        let Some(allocation) = self.find_allocation(id).await? else {
            return Ok(None);
        };
        // Resource first, then allocation.
        self.lock_resource(allocation.resource_id).await?;

        let row = sqlx::query(&format!(
            "SELECT {ALLOCATION_COLUMNS} FROM allocations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_allocation).transpose()
    }

    async fn active_quantity(&mut self, resource_id: ResourceId) -> Result<i64> {
        let sum: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM allocations
            WHERE resource_id = $1 AND status = 'ACTIVE'
            "#,
        )
        .bind(resource_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(sum)
    }

    async fn insert_resource(&mut self, resource: &Resource) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO resources ({RESOURCE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(resource.id.as_uuid())
        .bind(resource.owner_id.as_uuid())
        .bind(&resource.title)
        .bind(&resource.description)
        .bind(&resource.location)
        .bind(resource.ticket_price_cents)
        .bind(resource.scheduled_at)
        .bind(resource.capacity_total)
        .bind(resource.capacity_remaining)
        .bind(resource.state.as_str())
        .bind(resource.version.as_i64())
        .bind(resource.created_at)
        .bind(resource.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_resource(&mut self, resource: &Resource) -> Result<Version> {
        let version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE resources SET
                title = $3,
                description = $4,
                location = $5,
                ticket_price_cents = $6,
                scheduled_at = $7,
                capacity_total = $8,
                capacity_remaining = $9,
                state = $10,
                updated_at = $11,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(resource.id.as_uuid())
        .bind(resource.version.as_i64())
        .bind(&resource.title)
        .bind(&resource.description)
        .bind(&resource.location)
        .bind(resource.ticket_price_cents)
        .bind(resource.scheduled_at)
        .bind(resource.capacity_total)
        .bind(resource.capacity_remaining)
        .bind(resource.state.as_str())
        .bind(resource.updated_at)
        .fetch_optional(&mut *self.tx)
        .await?;

        version
            .map(Version::new)
            .ok_or(StoreError::VersionConflict {
                resource_id: resource.id,
                expected: resource.version,
            })
    }

    async fn delete_resource(&mut self, id: ResourceId) -> Result<()> {
        sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_allocation(&mut self, allocation: &Allocation) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO allocations ({ALLOCATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(allocation.id.as_uuid())
        .bind(allocation.resource_id.as_uuid())
        .bind(allocation.subject_id.as_uuid())
        .bind(allocation.quantity)
        .bind(allocation.status.as_str())
        .bind(allocation.created_at)
        .bind(allocation.reversed_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn mark_reversed(&mut self, id: AllocationId, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE allocations SET status = 'REVERSED', reversed_at = $2
            WHERE id = $1 AND status = 'ACTIVE'
            "#,
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AllocationNotActive(id));
        }
        Ok(())
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO audit_entries ({AUDIT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(entry.id.as_uuid())
        .bind(entry.resource_id.as_uuid())
        .bind(entry.allocation_id.map(|id| id.as_uuid()))
        .bind(entry.actor_id.as_uuid())
        .bind(entry.kind.as_str())
        .bind(entry.quantity_delta)
        .bind(entry.capacity_total)
        .bind(entry.capacity_remaining)
        .bind(entry.recorded_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
