//! Outbox event persistence.
//!
//! The PROCESSING transition is a compare-and-swap: when several publisher
//! instances sweep the same table, exactly one claims each event.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::event::{EventStatus, NewOutboxEvent, OutboxEvent};

#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Event not found: {0}")]
    EventNotFound(Uuid),
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a PENDING row. Saga stores couple this with the state change
    /// they describe; direct callers get a standalone insert.
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<Uuid, OutboxError>;

    /// Events due for delivery: all PENDING, plus FAILED rows older than
    /// the retry delay and still under the retry cap.
    async fn due(
        &self,
        batch: i64,
        retry_delay: Duration,
        max_retries: i32,
    ) -> Result<Vec<OutboxEvent>, OutboxError>;

    /// Claim an event for publishing. Returns false if another sweep
    /// already holds it (or it reached a terminal status).
    async fn mark_processing(&self, event_id: Uuid) -> Result<bool, OutboxError>;

    async fn mark_completed(&self, event_id: Uuid) -> Result<(), OutboxError>;

    /// Record a publish failure. Returns the new retry count.
    async fn mark_failed(&self, event_id: Uuid, error: &str) -> Result<i32, OutboxError>;

    async fn get(&self, event_id: Uuid) -> Result<Option<OutboxEvent>, OutboxError>;
}

// === PostgreSQL ===

pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<OutboxEvent, OutboxError> {
        let status_id: i16 = row.get("status");
        let status = EventStatus::from_id(status_id).ok_or_else(|| {
            OutboxError::DatabaseError(sqlx::Error::Decode(
                format!("Invalid outbox status: {}", status_id).into(),
            ))
        })?;
        let payload: Value = row.get("payload");

        Ok(OutboxEvent {
            event_id: row.get("event_id"),
            aggregate_type: row.get("aggregate_type"),
            aggregate_id: row.get("aggregate_id"),
            event_type: row.get("event_type"),
            exchange: row.get("exchange"),
            routing_key: row.get("routing_key"),
            payload,
            status,
            retry_count: row.get("retry_count"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            processed_at: row.get("processed_at"),
        })
    }
}

const SELECT_COLUMNS: &str = "event_id, aggregate_type, aggregate_id, event_type, exchange, \
     routing_key, payload, status, retry_count, error_message, created_at, processed_at";

/// Insert a PENDING outbox row using the caller's executor. The saga store
/// passes its open transaction here so the event commits atomically with
/// the state change it describes.
pub async fn insert_event<'e, E>(executor: E, event: &NewOutboxEvent) -> Result<Uuid, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let event_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO outbox_events_tb
            (event_id, aggregate_type, aggregate_id, event_type, exchange,
             routing_key, payload, status, retry_count, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, NOW())
        "#,
    )
    .bind(event_id)
    .bind(event.aggregate_type)
    .bind(&event.aggregate_id)
    .bind(event.event_type)
    .bind(event.exchange)
    .bind(event.routing_key)
    .bind(&event.payload)
    .bind(EventStatus::Pending.id())
    .execute(executor)
    .await?;
    Ok(event_id)
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<Uuid, OutboxError> {
        Ok(insert_event(&self.pool, &event).await?)
    }

    async fn due(
        &self,
        batch: i64,
        retry_delay: Duration,
        max_retries: i32,
    ) -> Result<Vec<OutboxEvent>, OutboxError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM outbox_events_tb
            WHERE status = $1
               OR (status = $2
                   AND retry_count < $3
                   AND updated_at < NOW() - INTERVAL '1 second' * $4)
            ORDER BY created_at ASC
            LIMIT $5
            "#
        ))
        .bind(EventStatus::Pending.id())
        .bind(EventStatus::Failed.id())
        .bind(max_retries)
        .bind(retry_delay.as_secs() as i64)
        .bind(batch)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn mark_processing(&self, event_id: Uuid) -> Result<bool, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events_tb
            SET status = $1, updated_at = NOW()
            WHERE event_id = $2 AND status IN ($3, $4)
            "#,
        )
        .bind(EventStatus::Processing.id())
        .bind(event_id)
        .bind(EventStatus::Pending.id())
        .bind(EventStatus::Failed.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(&self, event_id: Uuid) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            UPDATE outbox_events_tb
            SET status = $1, processed_at = NOW(), updated_at = NOW()
            WHERE event_id = $2
            "#,
        )
        .bind(EventStatus::Completed.id())
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, event_id: Uuid, error: &str) -> Result<i32, OutboxError> {
        let row = sqlx::query(
            r#"
            UPDATE outbox_events_tb
            SET status = $1, retry_count = retry_count + 1,
                error_message = $2, updated_at = NOW()
            WHERE event_id = $3
            RETURNING retry_count
            "#,
        )
        .bind(EventStatus::Failed.id())
        .bind(error)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(r.get("retry_count")),
            None => Err(OutboxError::EventNotFound(event_id)),
        }
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<OutboxEvent>, OutboxError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_events_tb WHERE event_id = $1"
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_event).transpose()
    }
}

// === In-memory ===

/// In-memory outbox for simulation mode and tests. The saga memory store
/// shares one of these so event enqueue and state change stay coupled.
#[derive(Default)]
pub struct MemOutboxStore {
    events: Mutex<MemInner>,
}

#[derive(Default)]
struct MemInner {
    by_id: HashMap<Uuid, OutboxEvent>,
    order: Vec<Uuid>,
}

impl MemOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous insert used by the saga memory store.
    pub fn push(&self, event: NewOutboxEvent) -> Uuid {
        let event = OutboxEvent::from_new(event);
        let id = event.event_id;
        let mut inner = self.events.lock().unwrap();
        inner.order.push(id);
        inner.by_id.insert(id, event);
        id
    }

    /// All events, insertion-ordered. Test helper.
    pub fn all(&self) -> Vec<OutboxEvent> {
        let inner = self.events.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }
}

#[async_trait]
impl OutboxStore for MemOutboxStore {
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<Uuid, OutboxError> {
        Ok(self.push(event))
    }

    async fn due(
        &self,
        batch: i64,
        retry_delay: Duration,
        max_retries: i32,
    ) -> Result<Vec<OutboxEvent>, OutboxError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(retry_delay).unwrap_or_default();
        let inner = self.events.lock().unwrap();
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|e| match e.status {
                EventStatus::Pending => true,
                EventStatus::Failed => {
                    e.retry_count < max_retries
                        && e.processed_at.map(|t| t <= cutoff).unwrap_or(true)
                }
                _ => false,
            })
            .take(batch.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_processing(&self, event_id: Uuid) -> Result<bool, OutboxError> {
        let mut inner = self.events.lock().unwrap();
        match inner.by_id.get_mut(&event_id) {
            Some(e) if matches!(e.status, EventStatus::Pending | EventStatus::Failed) => {
                e.status = EventStatus::Processing;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(OutboxError::EventNotFound(event_id)),
        }
    }

    async fn mark_completed(&self, event_id: Uuid) -> Result<(), OutboxError> {
        let mut inner = self.events.lock().unwrap();
        if let Some(e) = inner.by_id.get_mut(&event_id) {
            e.status = EventStatus::Completed;
            e.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(&self, event_id: Uuid, error: &str) -> Result<i32, OutboxError> {
        let mut inner = self.events.lock().unwrap();
        match inner.by_id.get_mut(&event_id) {
            Some(e) => {
                e.status = EventStatus::Failed;
                e.retry_count += 1;
                e.error_message = Some(error.to_string());
                e.processed_at = Some(Utc::now());
                Ok(e.retry_count)
            }
            None => Err(OutboxError::EventNotFound(event_id)),
        }
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<OutboxEvent>, OutboxError> {
        let inner = self.events.lock().unwrap();
        Ok(inner.by_id.get(&event_id).cloned())
    }
}
