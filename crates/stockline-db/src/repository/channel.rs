//! # Channel Repository
//!
//! Channel creation and every channel status transition.
//!
//! ## Transition Recipe
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │   1. UPDATE sales_channels SET updated_at = ? WHERE id = ?             │
//! │        first statement is a write: this transaction now holds the      │
//! │        SQLite write lock, nothing it reads next can change under it    │
//! │   2. SELECT status ──► ChannelStatus::apply(event)                     │
//! │        └── InvalidTransition ─► rollback                               │
//! │   3. UPDATE sales_channels SET status = ?to                            │
//! │        WHERE id = ? AND status = ?from        (compare-and-swap)       │
//! │        └── 0 rows ─► ConcurrencyConflict ─► rollback                   │
//! │   4. INSERT status_history, domain_events                              │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::events::{record_event, record_status_change, CHANNEL_ENTITY};
use crate::repository::stock_request::{fetch_initial_request, transition_request};
use stockline_core::channel::{channel_code, StaffAssignment};
use stockline_core::closeout::ReturnShipment;
use stockline_core::events::activation_on_request_received;
use stockline_core::request::{RequestEvent, RequestStatus, RequestType, StockRequest};
use stockline_core::validation::validate_required_text;
use stockline_core::{ChannelEvent, ChannelStatus, CoreError, DomainEvent, NewChannel, SalesChannel};

/// Hex characters of random suffix in a channel code.
const CODE_SUFFIX_LEN: usize = 8;

const CHANNEL_COLUMNS: &str = r#"
    id, code, channel_type, name, location, status,
    start_date, end_date, sales_target_cents, created_at, updated_at
"#;

/// Repository for channel lifecycle operations.
#[derive(Debug, Clone)]
pub struct ChannelRepository {
    pool: SqlitePool,
}

impl ChannelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ChannelRepository { pool }
    }

    /// Creates a channel in `draft` together with its INITIAL stock request.
    pub async fn create(&self, input: &NewChannel) -> DbResult<(SalesChannel, StockRequest)> {
        input.validate()?;

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let suffix = Uuid::new_v4().simple().to_string();
        let code = channel_code(input.channel_type, now.date_naive(), &suffix[..CODE_SUFFIX_LEN]);

        debug!(id = %id, code = %code, "Creating channel");

        let channel = SalesChannel {
            id: id.clone(),
            code,
            channel_type: input.channel_type,
            name: input.name.trim().to_string(),
            location: input.location.trim().to_string(),
            status: ChannelStatus::Draft,
            start_date: input.start_date,
            end_date: input.end_date,
            sales_target_cents: input.sales_target.map(|m| m.cents()),
            created_at: now,
            updated_at: now,
        };

        let request = StockRequest {
            id: Uuid::new_v4().to_string(),
            channel_id: id.clone(),
            request_type: RequestType::Initial,
            status: RequestStatus::Draft,
            requested_total_quantity: input.initial_quantity,
            notes: input.notes.clone(),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sales_channels (
                id, code, channel_type, name, location, status,
                start_date, end_date, sales_target_cents, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            "#,
        )
        .bind(&channel.id)
        .bind(&channel.code)
        .bind(channel.channel_type.as_str())
        .bind(&channel.name)
        .bind(&channel.location)
        .bind(channel.status.as_str())
        .bind(channel.start_date)
        .bind(channel.end_date)
        .bind(channel.sales_target_cents)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for member in &input.staff {
            sqlx::query("INSERT INTO channel_staff (channel_id, staff_id, role) VALUES (?1, ?2, ?3)")
                .bind(&channel.id)
                .bind(member.staff_id.trim())
                .bind(&member.role)
                .execute(&mut *tx)
                .await?;
        }

        crate::repository::stock_request::insert_request(&mut tx, &request).await?;

        record_event(
            &mut tx,
            &DomainEvent::ChannelCreated {
                channel_id: channel.id.clone(),
                code: channel.code.clone(),
                initial_request_id: request.id.clone(),
            },
            now,
        )
        .await?;
        record_event(
            &mut tx,
            &DomainEvent::StockRequestCreated {
                channel_id: channel.id.clone(),
                request_id: request.id.clone(),
                request_type: RequestType::Initial,
            },
            now,
        )
        .await?;

        tx.commit().await?;

        info!(
            channel_id = %channel.id,
            code = %channel.code,
            channel_type = channel.channel_type.as_str(),
            initial_quantity = request.requested_total_quantity,
            "Channel created"
        );

        Ok((channel, request))
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<SalesChannel>> {
        let mut conn = self.pool.acquire().await?;
        fetch_channel(&mut conn, id).await
    }

    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<SalesChannel>> {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM sales_channels WHERE code = ?1");
        let channel = sqlx::query_as::<_, SalesChannel>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(channel)
    }

    /// Channels in `status`, newest first.
    pub async fn list_by_status(&self, status: ChannelStatus) -> DbResult<Vec<SalesChannel>> {
        let sql = format!(
            "SELECT {CHANNEL_COLUMNS} FROM sales_channels WHERE status = ?1 ORDER BY created_at DESC"
        );
        let channels = sqlx::query_as::<_, SalesChannel>(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(channels)
    }

    pub async fn staff(&self, channel_id: &str) -> DbResult<Vec<StaffAssignment>> {
        let staff = sqlx::query_as::<_, StaffAssignment>(
            "SELECT staff_id, role FROM channel_staff WHERE channel_id = ?1 ORDER BY staff_id",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(staff)
    }

    /// `draft → submitted`.
    pub async fn submit(&self, id: &str) -> DbResult<SalesChannel> {
        self.simple_transition(id, ChannelEvent::Submit).await
    }

    /// `draft | submitted → approved`.
    ///
    /// If the INITIAL request was already received, the channel goes on to
    /// `active` in the same transaction.
    pub async fn approve(&self, id: &str) -> DbResult<SalesChannel> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut channel = transition_channel(&mut tx, id, ChannelEvent::Approve, now).await?;

        if let Some(initial) = fetch_initial_request(&mut tx, id).await? {
            if initial.status == RequestStatus::Received {
                let received = DomainEvent::RequestReceived {
                    channel_id: id.to_string(),
                    request_id: initial.id,
                    request_type: RequestType::Initial,
                };
                if let Some(activated) = run_activation_hook(&mut tx, &received, now).await? {
                    channel = activated;
                }
            }
        }

        tx.commit().await?;
        Ok(channel)
    }

    /// `draft | submitted | approved → cancelled`.
    ///
    /// The INITIAL request goes to `cancelled` with it unless it already
    /// reached a terminal state.
    pub async fn cancel(&self, id: &str) -> DbResult<SalesChannel> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let channel = transition_channel(&mut tx, id, ChannelEvent::Cancel, now).await?;

        if let Some(initial) = fetch_initial_request(&mut tx, id).await? {
            if !initial.status.is_terminal() {
                transition_request(&mut tx, &initial.id, RequestEvent::Cancel, now).await?;
            }
        }

        tx.commit().await?;
        Ok(channel)
    }

    /// `pending_return → returning`, recording the return shipment.
    pub async fn ship_return(
        &self,
        id: &str,
        provider: &str,
        tracking_number: &str,
    ) -> DbResult<ReturnShipment> {
        validate_required_text("provider", provider)?;
        validate_required_text("tracking number", tracking_number)?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        transition_channel(&mut tx, id, ChannelEvent::ShipReturn, now).await?;

        let shipment = ReturnShipment {
            channel_id: id.to_string(),
            provider: provider.trim().to_string(),
            tracking_number: tracking_number.trim().to_string(),
            shipped_at: now,
            received_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO return_shipments (channel_id, provider, tracking_number, shipped_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&shipment.channel_id)
        .bind(&shipment.provider)
        .bind(&shipment.tracking_number)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        record_event(
            &mut tx,
            &DomainEvent::ReturnShipped {
                channel_id: id.to_string(),
                provider: shipment.provider.clone(),
                tracking_number: shipment.tracking_number.clone(),
            },
            now,
        )
        .await?;

        tx.commit().await?;
        Ok(shipment)
    }

    /// `returning → returned`, stamping the return shipment as received.
    pub async fn confirm_return(&self, id: &str) -> DbResult<ReturnShipment> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        transition_channel(&mut tx, id, ChannelEvent::ConfirmReturn, now).await?;

        let updated = sqlx::query(
            "UPDATE return_shipments SET received_at = ?2 WHERE channel_id = ?1 AND received_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(CoreError::not_found("return shipment", id).into());
        }

        let shipment = fetch_return_shipment(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::not_found("return shipment", id))?;

        record_event(
            &mut tx,
            &DomainEvent::ReturnReceived {
                channel_id: id.to_string(),
            },
            now,
        )
        .await?;

        tx.commit().await?;
        Ok(shipment)
    }

    pub async fn return_shipment(&self, id: &str) -> DbResult<Option<ReturnShipment>> {
        let mut conn = self.pool.acquire().await?;
        fetch_return_shipment(&mut conn, id).await
    }

    /// `returned → completed`.
    pub async fn close_manual(&self, id: &str) -> DbResult<SalesChannel> {
        self.simple_transition(id, ChannelEvent::Complete).await
    }

    /// `active | returned | completed → pending_payment`.
    pub async fn submit_for_payment(&self, id: &str) -> DbResult<SalesChannel> {
        self.simple_transition(id, ChannelEvent::SubmitPayment).await
    }

    /// `pending_payment → payment_approved`.
    pub async fn approve_payment(&self, id: &str) -> DbResult<SalesChannel> {
        self.simple_transition(id, ChannelEvent::ApprovePayment).await
    }

    async fn simple_transition(&self, id: &str, event: ChannelEvent) -> DbResult<SalesChannel> {
        let mut tx = self.pool.begin().await?;
        let channel = transition_channel(&mut tx, id, event, Utc::now()).await?;
        tx.commit().await?;
        Ok(channel)
    }
}

// =============================================================================
// In-transaction helpers
// =============================================================================

pub(crate) async fn fetch_channel(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<SalesChannel>> {
    let sql = format!("SELECT {CHANNEL_COLUMNS} FROM sales_channels WHERE id = ?1");
    let channel = sqlx::query_as::<_, SalesChannel>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(channel)
}

/// Takes the write lock by touching the channel row.
pub(crate) async fn claim_channel(
    conn: &mut SqliteConnection,
    id: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let result = sqlx::query("UPDATE sales_channels SET updated_at = ?2 WHERE id = ?1")
        .bind(id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::not_found("channel", id).into());
    }
    Ok(())
}

/// Applies `event` to the channel through the transition table and a
/// status compare-and-swap.
pub(crate) async fn transition_channel(
    conn: &mut SqliteConnection,
    id: &str,
    event: ChannelEvent,
    now: DateTime<Utc>,
) -> DbResult<SalesChannel> {
    debug!(channel_id = %id, event = ?event, "Channel transition requested");

    claim_channel(conn, id, now).await?;

    let mut channel = fetch_channel(conn, id)
        .await?
        .ok_or_else(|| CoreError::not_found("channel", id))?;
    let from = channel.status;
    let to = from.apply(event)?;

    compare_and_swap_status(conn, id, from, to, now).await?;
    record_status_change(conn, CHANNEL_ENTITY, id, from.as_str(), to.as_str(), now).await?;

    info!(channel_id = %id, from = %from, to = %to, "Channel transitioned");

    channel.status = to;
    channel.updated_at = now;
    Ok(channel)
}

async fn compare_and_swap_status(
    conn: &mut SqliteConnection,
    id: &str,
    from: ChannelStatus,
    to: ChannelStatus,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE sales_channels SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
    )
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::Domain(CoreError::conflict("channel", id)));
    }
    Ok(())
}

/// Feeds a `RequestReceived` event to the activation hook and applies the
/// event it returns. Returns the channel if it was activated.
pub(crate) async fn run_activation_hook(
    conn: &mut SqliteConnection,
    received: &DomainEvent,
    now: DateTime<Utc>,
) -> DbResult<Option<SalesChannel>> {
    let channel_id = received.channel_id();
    let channel = fetch_channel(conn, channel_id)
        .await?
        .ok_or_else(|| CoreError::not_found("channel", channel_id))?;

    let Some(event) = activation_on_request_received(received, channel.status) else {
        debug!(channel_id = %channel_id, status = %channel.status, "Activation hook: no-op");
        return Ok(None);
    };

    let activated = transition_channel(conn, channel_id, event, now).await?;
    record_event(
        conn,
        &DomainEvent::ChannelActivated {
            channel_id: channel_id.to_string(),
            request_id: received.request_id().unwrap_or_default().to_string(),
        },
        now,
    )
    .await?;

    Ok(Some(activated))
}

async fn fetch_return_shipment(
    conn: &mut SqliteConnection,
    channel_id: &str,
) -> DbResult<Option<ReturnShipment>> {
    let shipment = sqlx::query_as::<_, ReturnShipment>(
        r#"
        SELECT channel_id, provider, tracking_number, shipped_at, received_at
        FROM return_shipments
        WHERE channel_id = ?1
        "#,
    )
    .bind(channel_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(shipment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use stockline_core::channel::ChannelType;
    use stockline_core::Money;

    fn branch(name: &str) -> NewChannel {
        NewChannel {
            channel_type: ChannelType::Branch,
            name: name.to_string(),
            location: "Central World, 3F".to_string(),
            start_date: None,
            end_date: None,
            staff: vec![StaffAssignment {
                staff_id: "EMP-001".to_string(),
                role: "manager".to_string(),
            }],
            initial_quantity: 120,
            notes: String::new(),
            sales_target: Some(Money::from_major(50_000, 0)),
        }
    }

    async fn setup() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_channel_with_initial_request() {
        let db = setup().await;
        let (channel, initial) = db.channels().create(&branch("CTW")).await.unwrap();

        assert_eq!(channel.status, ChannelStatus::Draft);
        assert!(channel.code.starts_with("BR-"));
        let suffix = channel.code.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), CODE_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_eq!(initial.request_type, RequestType::Initial);
        assert_eq!(initial.requested_total_quantity, 120);

        let loaded = db.channels().get_by_code(&channel.code).await.unwrap().unwrap();
        assert_eq!(loaded.id, channel.id);
        assert_eq!(loaded.sales_target(), Some(Money::from_major(50_000, 0)));
        assert_eq!(db.channels().staff(&channel.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_input_writes_nothing() {
        let db = setup().await;
        let mut input = branch("CTW");
        input.initial_quantity = 0;

        let err = db.channels().create(&input).await.unwrap_err();
        assert!(matches!(err.as_domain(), Some(CoreError::Validation(_))));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales_channels")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_cancel_after_activation_is_rejected() {
        let db = setup().await;
        let (channel, _) = db.channels().create(&branch("CTW")).await.unwrap();
        db.channels().approve(&channel.id).await.unwrap();
        sqlx::query("UPDATE sales_channels SET status = 'active' WHERE id = ?1")
            .bind(&channel.id)
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.channels().cancel(&channel.id).await.unwrap_err();
        match err.as_domain() {
            Some(CoreError::InvalidTransition { entity, expected, actual }) => {
                assert_eq!(entity, "channel");
                assert_eq!(expected, "draft|submitted|approved");
                assert_eq!(actual, "active");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_takes_initial_request_along() {
        let db = setup().await;
        let (channel, initial) = db.channels().create(&branch("CTW")).await.unwrap();
        db.channels().submit(&channel.id).await.unwrap();
        db.channels().cancel(&channel.id).await.unwrap();

        let request = db.requests().get(&initial.id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Cancelled);

        let history = db.events().channel_history(&channel.id).await.unwrap();
        let moves: Vec<_> = history
            .iter()
            .map(|c| (c.from_status.as_str(), c.to_status.as_str()))
            .collect();
        assert_eq!(moves, [("draft", "submitted"), ("submitted", "cancelled")]);
    }

    #[tokio::test]
    async fn test_unknown_channel_is_not_found() {
        let db = setup().await;
        let err = db.channels().submit("missing").await.unwrap_err();
        assert!(matches!(err.as_domain(), Some(CoreError::NotFound { .. })));
    }
}
