use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventMetadata, EventQuery, EventStoreError,
    GlobalPosition, Result, Snapshot, Version,
    store::{AppendOptions, EventStore, EventStream, check_continuation, validate_batch},
};

const STREAM_PAGE_SIZE: usize = 500;

const EVENT_COLUMNS: &str = "position, event_id, aggregate_id, aggregate_type, version, event_type, recorded_at, payload, metadata";

/// PostgreSQL-backed event store.
///
/// Concurrency is enforced twice: the expected version is checked inside
/// the append transaction, and the `unique_aggregate_version` constraint
/// rejects the loser of a race that slipped past the check.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects with a small pool and applies pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata: EventMetadata = serde_json::from_value(row.try_get("metadata")?)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            position: GlobalPosition::new(row.try_get("position")?),
            recorded_at: row.try_get("recorded_at")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }

    async fn fetch_events(&self, builder: &mut QueryBuilder<'_, Postgres>) -> Result<Vec<EventEnvelope>> {
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, events), fields(aggregate_id = %events.first().map(|e| e.aggregate_id.to_string()).unwrap_or_default()))]
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_batch(&events)?;
        let aggregate_id = events[0].aggregate_id;

        let mut tx = self.pool.begin().await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;
        let current = current.map(Version::new).unwrap_or_default();
        check_continuation(&events, options, current)?;

        let mut last_version = current;
        for event in &events {
            sqlx::query(
                r#"
                INSERT INTO events (event_id, aggregate_id, aggregate_type, version, event_type, recorded_at, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(event.aggregate_id.as_uuid())
            .bind(&event.aggregate_type)
            .bind(event.version.as_i64())
            .bind(&event.event_type)
            .bind(event.recorded_at)
            .bind(&event.payload)
            .bind(serde_json::to_value(&event.metadata)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db)
                    if db.constraint() == Some("unique_aggregate_version") =>
                {
                    EventStoreError::ConcurrencyConflict {
                        aggregate_id,
                        expected: options.expected,
                        actual: current,
                    }
                }
                other => EventStoreError::Database(other),
            })?;

            last_version = event.version;
        }

        tx.commit().await?;
        Ok(last_version)
    }

    async fn read_stream(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        self.read_stream_from(aggregate_id, Version::first()).await
    }

    async fn read_stream_from(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let mut builder = QueryBuilder::new(format!("SELECT {EVENT_COLUMNS} FROM events WHERE aggregate_id = "));
        builder
            .push_bind(aggregate_id.as_uuid())
            .push(" AND version >= ")
            .push_bind(from_version.as_i64())
            .push(" ORDER BY version ASC");
        self.fetch_events(&mut builder).await
    }

    async fn read_all_from(
        &self,
        after: GlobalPosition,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>> {
        let mut builder = QueryBuilder::new(format!("SELECT {EVENT_COLUMNS} FROM events WHERE position > "));
        builder
            .push_bind(after.as_i64())
            .push(" ORDER BY position ASC LIMIT ")
            .push_bind(limit as i64);
        self.fetch_events(&mut builder).await
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let mut builder = QueryBuilder::new(format!("SELECT {EVENT_COLUMNS} FROM events WHERE TRUE"));

        if let Some(id) = query.aggregate_id {
            builder.push(" AND aggregate_id = ").push_bind(id.as_uuid());
        }
        if let Some(aggregate_type) = query.aggregate_type {
            builder.push(" AND aggregate_type = ").push_bind(aggregate_type);
        }
        if let Some(event_types) = query.event_types {
            builder.push(" AND event_type = ANY(").push_bind(event_types).push(")");
        }
        if let Some(from) = query.from_version {
            builder.push(" AND version >= ").push_bind(from.as_i64());
        }
        if let Some(to) = query.to_version {
            builder.push(" AND version <= ").push_bind(to.as_i64());
        }
        if let Some(after) = query.recorded_after {
            builder.push(" AND recorded_at >= ").push_bind(after);
        }
        if let Some(before) = query.recorded_before {
            builder.push(" AND recorded_at <= ").push_bind(before);
        }
        if let Some(position) = query.after_position {
            builder.push(" AND position > ").push_bind(position.as_i64());
        }

        builder.push(" ORDER BY position ASC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        self.fetch_events(&mut builder).await
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream::{self, StreamExt};

        // Page through the log by position so the stream owns its pool handle.
        let store = self.clone();
        let pages = stream::try_unfold(
            (store, GlobalPosition::start(), false),
            |(store, after, done)| async move {
                if done {
                    return Ok(None);
                }
                let page = store.read_all_from(after, STREAM_PAGE_SIZE).await?;
                let last = page.last().map(|e| e.position).unwrap_or(after);
                let done = page.len() < STREAM_PAGE_SIZE;
                Ok(Some((stream::iter(page.into_iter().map(Ok)), (store, last, done))))
            },
        );

        Ok(Box::pin(
            pages
                .map(|page: Result<_>| match page {
                    Ok(events) => events.left_stream(),
                    Err(e) => stream::once(async move { Err(e) }).right_stream(),
                })
                .flatten(),
        ))
    }

    async fn stream_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(version.map(Version::new))
    }

    async fn list_streams(&self, aggregate_type: &str) -> Result<Vec<AggregateId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT aggregate_id FROM events WHERE aggregate_type = $1 ORDER BY aggregate_id",
        )
        .bind(aggregate_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(AggregateId::from_uuid).collect())
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, aggregate_type, version, schema_version, taken_at, state)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (aggregate_id) DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                version = EXCLUDED.version,
                schema_version = EXCLUDED.schema_version,
                taken_at = EXCLUDED.taken_at,
                state = EXCLUDED.state
            "#,
        )
        .bind(snapshot.aggregate_id.as_uuid())
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version.as_i64())
        .bind(snapshot.schema_version as i32)
        .bind(snapshot.taken_at)
        .bind(&snapshot.state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            r#"
            SELECT aggregate_id, aggregate_type, version, schema_version, taken_at, state
            FROM snapshots
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Snapshot {
                aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
                aggregate_type: row.try_get("aggregate_type")?,
                version: Version::new(row.try_get("version")?),
                schema_version: row.try_get::<i32, _>("schema_version")? as u32,
                taken_at: row.try_get("taken_at")?,
                state: row.try_get("state")?,
            })
        })
        .transpose()
    }
}
