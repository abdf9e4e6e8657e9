//! PostgreSQL-backed event log.
//!
//! Records live in one `stream_events` table keyed by `(stream, revision)`.
//! Appends to the same stream serialize through a transaction-scoped advisory
//! lock; subscriptions poll for newer revisions.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use optflow_core::TraceContext;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{with_checkpoints, EventLog, RecordStream, Subscription};
use crate::error::EventLogError;
use crate::record::{
    Direction, EventData, ExpectedRevision, RecordedEvent, SubscribeFrom, SubscriptionMessage,
};

const PAGE_SIZE: i64 = 500;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS stream_events (
    stream        TEXT        NOT NULL,
    revision      BIGINT      NOT NULL,
    event_id      UUID        NOT NULL UNIQUE,
    event_type    TEXT        NOT NULL,
    payload       JSONB       NOT NULL,
    trace_context JSONB,
    recorded_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (stream, revision)
)
";

#[derive(Debug, Clone)]
pub struct PgEventLog {
    pool: PgPool,
    poll_interval: Duration,
    checkpoint_interval: u64,
}

impl PgEventLog {
    #[must_use]
    pub fn new(pool: PgPool, poll_interval: Duration, checkpoint_interval: u64) -> Self {
        Self {
            pool,
            poll_interval,
            checkpoint_interval,
        }
    }

    /// Opens a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        poll_interval: Duration,
        checkpoint_interval: u64,
    ) -> Result<Self, EventLogError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "connected to event log database");
        Ok(Self::new(pool, poll_interval, checkpoint_interval))
    }

    /// Creates the `stream_events` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL fails.
    pub async fn migrate(&self) -> Result<(), EventLogError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_db_revision(revision: u64) -> i64 {
    i64::try_from(revision).unwrap_or(i64::MAX)
}

fn from_db_revision(revision: i64) -> Result<u64, EventLogError> {
    u64::try_from(revision)
        .map_err(|_| EventLogError::Read(format!("negative revision {revision} in store")))
}

fn record_from_row(row: &PgRow) -> Result<RecordedEvent, EventLogError> {
    let revision: i64 = row.try_get("revision")?;
    let trace_context: Option<serde_json::Value> = row.try_get("trace_context")?;
    let trace_context: Option<TraceContext> = trace_context
        .map(serde_json::from_value)
        .transpose()?;
    let recorded_at: DateTime<Utc> = row.try_get("recorded_at")?;
    let event_id: Uuid = row.try_get("event_id")?;
    Ok(RecordedEvent {
        stream: row.try_get("stream")?,
        revision: from_db_revision(revision)?,
        event_id,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        trace_context,
        recorded_at,
    })
}

async fn fetch_from(
    pool: &PgPool,
    stream: &str,
    first: i64,
    limit: i64,
) -> Result<Vec<RecordedEvent>, EventLogError> {
    let rows = sqlx::query(
        r"
        SELECT stream, revision, event_id, event_type, payload, trace_context, recorded_at
        FROM stream_events
        WHERE stream = $1 AND revision >= $2
        ORDER BY revision ASC
        LIMIT $3
        ",
    )
    .bind(stream)
    .bind(first)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(record_from_row).collect()
}

async fn fetch_before(
    pool: &PgPool,
    stream: &str,
    upto: i64,
    limit: i64,
) -> Result<Vec<RecordedEvent>, EventLogError> {
    let rows = sqlx::query(
        r"
        SELECT stream, revision, event_id, event_type, payload, trace_context, recorded_at
        FROM stream_events
        WHERE stream = $1 AND revision <= $2
        ORDER BY revision DESC
        LIMIT $3
        ",
    )
    .bind(stream)
    .bind(upto)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(record_from_row).collect()
}

struct PageState {
    pool: PgPool,
    stream: String,
    direction: Direction,
    /// Next revision to read; `None` once the walk is exhausted.
    cursor: Option<i64>,
    remaining: usize,
    buffer: std::collections::VecDeque<RecordedEvent>,
}

async fn next_page_item(
    mut st: PageState,
) -> Option<(Result<RecordedEvent, EventLogError>, PageState)> {
    loop {
        if st.remaining == 0 {
            return None;
        }
        if let Some(record) = st.buffer.pop_front() {
            st.remaining -= 1;
            return Some((Ok(record), st));
        }
        let cursor = st.cursor?;
        let limit = i64::try_from(st.remaining).map_or(PAGE_SIZE, |r| r.min(PAGE_SIZE));
        let page = match st.direction {
            Direction::Forward => fetch_from(&st.pool, &st.stream, cursor, limit).await,
            Direction::Backward => fetch_before(&st.pool, &st.stream, cursor, limit).await,
        };
        let page = match page {
            Ok(page) => page,
            Err(e) => {
                st.cursor = None;
                st.remaining = 0;
                return Some((Err(EventLogError::Read(e.to_string())), st));
            }
        };
        let fetched = page.len();
        st.cursor = page.last().and_then(|last| {
            let rev = to_db_revision(last.revision);
            match st.direction {
                Direction::Forward => rev.checked_add(1),
                Direction::Backward => rev.checked_sub(1).filter(|r| *r >= 0),
            }
        });
        if i64::try_from(fetched).unwrap_or(0) < limit {
            st.cursor = None;
        }
        if fetched == 0 {
            return None;
        }
        st.buffer.extend(page);
    }
}

struct PollState {
    pool: PgPool,
    stream: String,
    last: Option<u64>,
    interval: Duration,
    buffer: std::collections::VecDeque<RecordedEvent>,
    done: bool,
}

async fn next_polled(mut st: PollState) -> Option<(SubscriptionMessage, PollState)> {
    if st.done {
        return None;
    }
    loop {
        if let Some(record) = st.buffer.pop_front() {
            st.last = Some(record.revision);
            return Some((SubscriptionMessage::Event(record), st));
        }
        let first = st.last.map_or(0, |rev| to_db_revision(rev).saturating_add(1));
        match fetch_from(&st.pool, &st.stream, first, PAGE_SIZE).await {
            Ok(page) if page.is_empty() => tokio::time::sleep(st.interval).await,
            Ok(page) => st.buffer.extend(page),
            Err(e) => {
                warn!(stream = %st.stream, error = %e, "event log poll failed");
                st.done = true;
                return Some((SubscriptionMessage::Dropped(e.to_string()), st));
            }
        }
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn append(
        &self,
        stream: &str,
        event: EventData,
        expected: ExpectedRevision,
    ) -> Result<u64, EventLogError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EventLogError::Append(e.to_string()))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(stream)
            .execute(&mut *tx)
            .await
            .map_err(|e| EventLogError::Append(e.to_string()))?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(revision) FROM stream_events WHERE stream = $1")
                .bind(stream)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| EventLogError::Append(e.to_string()))?;
        let actual = current.map(from_db_revision).transpose()?;

        if !expected.matches(actual) {
            return Err(EventLogError::conflict(stream, expected, actual));
        }

        let revision = actual.map_or(0, |r| r + 1);
        let trace_context = event
            .trace_context
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r"
            INSERT INTO stream_events (stream, revision, event_id, event_type, payload, trace_context)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(stream)
        .bind(to_db_revision(revision))
        .bind(event.event_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(trace_context)
        .execute(&mut *tx)
        .await
        .map_err(|e| EventLogError::Append(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| EventLogError::Append(e.to_string()))?;
        debug!(stream, revision, event_type = %event.event_type, "appended event");
        Ok(revision)
    }

    async fn read(
        &self,
        stream: &str,
        from: u64,
        direction: Direction,
        count: Option<usize>,
    ) -> Result<RecordStream, EventLogError> {
        if self
            .last_revision(stream)
            .await
            .map_err(|e| EventLogError::Read(e.to_string()))?
            .is_none()
        {
            return Err(EventLogError::StreamNotFound(stream.to_string()));
        }

        let state = PageState {
            pool: self.pool.clone(),
            stream: stream.to_string(),
            direction,
            cursor: Some(to_db_revision(from)),
            remaining: count.unwrap_or(usize::MAX),
            buffer: std::collections::VecDeque::new(),
        };
        Ok(futures::stream::unfold(state, next_page_item).boxed())
    }

    async fn subscribe(
        &self,
        stream: &str,
        from: SubscribeFrom,
    ) -> Result<Subscription, EventLogError> {
        // Fail fast when the database is unreachable.
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| EventLogError::Subscribe(e.to_string()))?;

        let last = match from {
            SubscribeFrom::Start => None,
            SubscribeFrom::After(rev) => Some(rev),
        };
        let state = PollState {
            pool: self.pool.clone(),
            stream: stream.to_string(),
            last,
            interval: self.poll_interval,
            buffer: std::collections::VecDeque::new(),
            done: false,
        };
        let live = futures::stream::unfold(state, next_polled).boxed();
        Ok(with_checkpoints(live, self.checkpoint_interval))
    }

    async fn last_revision(&self, stream: &str) -> Result<Option<u64>, EventLogError> {
        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(revision) FROM stream_events WHERE stream = $1")
                .bind(stream)
                .fetch_one(&self.pool)
                .await?;
        current.map(from_db_revision).transpose()
    }
}
