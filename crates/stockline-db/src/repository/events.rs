//! # Domain Event Outbox and Status History
//!
//! Every state change writes its facts in the same transaction that made it.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   SINGLE TRANSACTION                                    │
//! │                                                                         │
//! │  1. UPDATE stock_requests SET status = 'received' WHERE id = ?         │
//! │        AND status = 'shipped'                                          │
//! │                                                                         │
//! │  2. INSERT INTO status_history (entity, entity_id, from, to)           │
//! │                                                                         │
//! │  3. INSERT INTO domain_events (event_type, channel_id, payload)        │
//! │     VALUES ('request_received', ?, <event JSON>)                       │
//! │                                                                         │
//! │  COMMIT ← all three or none                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Readers (reports, notifications) consume `domain_events` in `seq` order.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use stockline_core::events::{DomainEvent, DomainEventRecord, StatusChange};

/// `status_history.entity` for channels.
pub(crate) const CHANNEL_ENTITY: &str = "channel";
/// `status_history.entity` for stock requests.
pub(crate) const REQUEST_ENTITY: &str = "stock_request";

/// Repository for the event log and the status history.
#[derive(Debug, Clone)]
pub struct EventRepository {
    pool: SqlitePool,
}

impl EventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        EventRepository { pool }
    }

    /// Events of one channel, oldest first.
    pub async fn for_channel(&self, channel_id: &str) -> DbResult<Vec<DomainEventRecord>> {
        let events = sqlx::query_as::<_, DomainEventRecord>(
            r#"
            SELECT id, event_type, channel_id, request_id, payload, created_at
            FROM domain_events
            WHERE channel_id = ?1
            ORDER BY seq
            "#,
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Events of one type across all channels, oldest first.
    pub async fn by_type(&self, event_type: &str, limit: i64) -> DbResult<Vec<DomainEventRecord>> {
        let events = sqlx::query_as::<_, DomainEventRecord>(
            r#"
            SELECT id, event_type, channel_id, request_id, payload, created_at
            FROM domain_events
            WHERE event_type = ?1
            ORDER BY seq
            LIMIT ?2
            "#,
        )
        .bind(event_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Status history of a channel, oldest first.
    pub async fn channel_history(&self, channel_id: &str) -> DbResult<Vec<StatusChange>> {
        self.history(CHANNEL_ENTITY, channel_id).await
    }

    /// Status history of a stock request, oldest first.
    pub async fn request_history(&self, request_id: &str) -> DbResult<Vec<StatusChange>> {
        self.history(REQUEST_ENTITY, request_id).await
    }

    async fn history(&self, entity: &str, entity_id: &str) -> DbResult<Vec<StatusChange>> {
        let changes = sqlx::query_as::<_, StatusChange>(
            r#"
            SELECT entity, entity_id, from_status, to_status, changed_at
            FROM status_history
            WHERE entity = ?1 AND entity_id = ?2
            ORDER BY seq
            "#,
        )
        .bind(entity)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(changes)
    }
}

/// Appends `event` to the outbox on the caller's transaction.
pub(crate) async fn record_event(
    conn: &mut SqliteConnection,
    event: &DomainEvent,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let payload = serde_json::to_string(event)?;

    debug!(
        event_type = event.event_type(),
        channel_id = %event.channel_id(),
        "Recording domain event"
    );

    sqlx::query(
        r#"
        INSERT INTO domain_events (id, event_type, channel_id, request_id, payload, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(event.event_type())
    .bind(event.channel_id())
    .bind(event.request_id())
    .bind(payload)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Appends one transition to the status history on the caller's transaction.
pub(crate) async fn record_status_change(
    conn: &mut SqliteConnection,
    entity: &str,
    entity_id: &str,
    from: &str,
    to: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO status_history (entity, entity_id, from_status, to_status, changed_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(entity)
    .bind(entity_id)
    .bind(from)
    .bind(to)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
