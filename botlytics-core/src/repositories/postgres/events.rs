// src/repositories/postgres/events.rs

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use sqlx::types::Json;
use sqlx::{FromRow, Pool, Postgres, QueryBuilder};
use tracing::{debug, error, trace};

use botlytics_common::models::{Event, EventFilter, Properties, StoredEvent};
use botlytics_common::traits::{EventStore, EventStream};
use crate::config::DEFAULT_PAGE_SIZE;
use crate::db::Database;
use crate::utils::time::next_after;
use crate::Error;

/// Advisory lock key serializing id / `received_at` assignment across all
/// connections (and processes) writing to the same database.
const SEQUENCE_LOCK_KEY: i64 = 0x626f_746c_7974;

#[derive(Debug, FromRow)]
struct EventRow {
    event_id: i64,
    event_type: String,
    received_at: DateTime<Utc>,
    properties: Json<Properties>,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        StoredEvent {
            id: row.event_id,
            event_type: row.event_type,
            properties: row.properties.0,
            received_at: row.received_at,
        }
    }
}

/// Postgres-backed event log over the `analytics_events` table.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: Pool<Postgres>,
    page_size: usize,
}

impl PostgresEventStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool, page_size: DEFAULT_PAGE_SIZE }
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Highest committed id. Because ids are handed out under the sequencing
    /// lock and committed before the lock is released, every id at or below
    /// this value is committed too.
    async fn high_water_mark(&self) -> Result<i64, Error> {
        let (max_id,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(event_id), 0) FROM analytics_events",
        )
            .fetch_one(&self.pool)
            .await?;
        Ok(max_id)
    }

    async fn append_in_tx(&self, event: &Event) -> Result<StoredEvent, Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SEQUENCE_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let (last_id, last_received): (i64, Option<DateTime<Utc>>) = sqlx::query_as(
            "SELECT COALESCE(MAX(event_id), 0), MAX(received_at) FROM analytics_events",
        )
            .fetch_one(&mut *tx)
            .await?;

        let id = last_id + 1;
        let received_at = next_after(last_received, event.received_at.trunc_subsecs(6));

        sqlx::query(
            r#"
            INSERT INTO analytics_events (
                event_id, event_type, user_id, session_id, received_at, properties
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#
        )
            .bind(id)
            .bind(&event.event_type)
            .bind(event.user_id())
            .bind(event.session_id())
            .bind(received_at)
            .bind(Json(&event.properties))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(StoredEvent {
            id,
            event_type: event.event_type.clone(),
            properties: event.properties.clone(),
            received_at,
        })
    }
}

/// One keyset page: ids in `(after, upper]`, at most `limit` rows.
async fn fetch_page(
    pool: &Pool<Postgres>,
    filter: &EventFilter,
    after: i64,
    upper: i64,
    limit: i64,
) -> Result<Vec<StoredEvent>, Error> {
    let mut qb: QueryBuilder<'static, Postgres> = QueryBuilder::new(
        "SELECT event_id, event_type, received_at, properties FROM analytics_events WHERE event_id > ",
    );
    qb.push_bind(after);
    qb.push(" AND event_id <= ").push_bind(upper);

    if let Some(event_type) = &filter.event_type {
        qb.push(" AND event_type = ").push_bind(event_type.clone());
    }
    if let Some(user_id) = &filter.user_id {
        qb.push(" AND user_id = ").push_bind(user_id.clone());
    }
    if let Some(start) = filter.range.start {
        qb.push(" AND received_at >= ").push_bind(start);
    }
    if let Some(end) = filter.range.end {
        qb.push(" AND received_at < ").push_bind(end);
    }
    if let Some(predicate) = &filter.property {
        qb.push(" AND properties @> ").push_bind(Json(predicate.to_containment()));
    }
    qb.push(" ORDER BY event_id ASC LIMIT ").push_bind(limit);

    let rows: Vec<EventRow> = qb.build_query_as::<EventRow>().fetch_all(pool).await?;
    Ok(rows.into_iter().map(StoredEvent::from).collect())
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, event: Event) -> Result<StoredEvent, Error> {
        if event.event_type.is_empty() || event.user_id().is_empty() || event.session_id().is_empty() {
            return Err(Error::Validation(
                "event_type, user_id and session_id are required".into(),
            ));
        }

        match self.append_in_tx(&event).await {
            Ok(stored) => {
                trace!("postgres store appended id={} type={}", stored.id, stored.event_type);
                Ok(stored)
            }
            Err(e) => {
                error!("Failed to append {} event: {:?}", event.event_type, e);
                Err(e)
            }
        }
    }

    async fn query(&self, filter: &EventFilter) -> Result<EventStream, Error> {
        let upper = self.high_water_mark().await?;
        debug!("postgres store query {:?} up to id {}", filter, upper);

        if upper == 0 || filter.range.is_empty() {
            return Ok(stream::empty().boxed());
        }

        let pool = self.pool.clone();
        let filter = filter.clone();
        let limit = self.page_size as i64;

        let pages = stream::try_unfold(Some(0i64), move |cursor| {
            let pool = pool.clone();
            let filter = filter.clone();
            async move {
                let Some(after) = cursor else {
                    return Ok::<_, Error>(None);
                };
                let events = fetch_page(&pool, &filter, after, upper, limit).await?;
                if events.is_empty() {
                    return Ok(None);
                }
                let next = if events.len() as i64 >= limit {
                    events.last().map(|e| e.id)
                } else {
                    None
                };
                Ok(Some((stream::iter(events.into_iter().map(Ok::<StoredEvent, Error>)), next)))
            }
        });

        Ok(pages.try_flatten().boxed())
    }

    async fn count(&self) -> Result<u64, Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM analytics_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredEvent>, Error> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, received_at, properties
            FROM analytics_events
            ORDER BY event_id DESC
            LIMIT $1
            "#,
        )
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(StoredEvent::from).collect())
    }
}
