//! # Stock Request Repository
//!
//! The warehouse pipeline, one transaction per step.
//!
//! ## Receiving
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  check_receiving(lines)            (whole batch, before BEGIN)         │
//! │  BEGIN                                                                  │
//! │   1. shipped ──CAS──► received        (first write, takes the lock)    │
//! │   2. channel.accepts_stock()?         else InvalidTransition           │
//! │   3. INSERT receivings                                                  │
//! │   4. ledger credit(barcode, received_qty) per line                     │
//! │   5. domain_events += RequestReceived                                  │
//! │   6. activation_on_request_received ──► approved ─► active ?           │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::channel::{claim_channel, fetch_channel, run_activation_hook};
use crate::repository::events::{record_event, record_status_change, REQUEST_ENTITY};
use crate::repository::ledger;
use stockline_core::request::{
    check_allocation, check_receiving, Allocation, AllocationRow, ReceivingLine, RequestEvent,
    RequestStatus, RequestType, Shipment, StockRequest,
};
use stockline_core::validation::{validate_notes, validate_request_quantity, validate_required_text};
use stockline_core::{ChannelStatus, CoreError, DomainEvent, Outcome, SalesChannel};

const REQUEST_COLUMNS: &str = r#"
    id, channel_id, request_type, status, requested_total_quantity,
    notes, created_at, updated_at
"#;

/// Result of a confirmed receiving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivingSummary {
    pub request: StockRequest,
    /// Sum of `received_qty`, credited to the ledger.
    pub total_received: i64,
    /// Lines where the count differs from the allocation.
    pub discrepancies: Vec<ReceivingLine>,
    /// Set when this receiving moved the channel to `active`.
    pub activated_channel: Option<SalesChannel>,
}

#[derive(Debug, Clone)]
pub struct StockRequestRepository {
    pool: SqlitePool,
}

impl StockRequestRepository {
    pub fn new(pool: SqlitePool) -> Self {
        StockRequestRepository { pool }
    }

    /// Opens a TOPUP request for an `active` channel.
    pub async fn create_topup(
        &self,
        channel_id: &str,
        quantity: i64,
        notes: &str,
    ) -> DbResult<StockRequest> {
        validate_request_quantity(quantity)?;
        validate_notes("notes", notes)?;

        debug!(channel_id = %channel_id, quantity, "Creating top-up request");

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        claim_channel(&mut tx, channel_id, now).await?;
        let channel = fetch_channel(&mut tx, channel_id)
            .await?
            .ok_or_else(|| CoreError::not_found("channel", channel_id))?;
        if channel.status != ChannelStatus::Active {
            return Err(
                CoreError::invalid_transition("channel", &[ChannelStatus::Active], channel.status)
                    .into(),
            );
        }

        let request = StockRequest {
            id: Uuid::new_v4().to_string(),
            channel_id: channel_id.to_string(),
            request_type: RequestType::Topup,
            status: RequestStatus::Draft,
            requested_total_quantity: quantity,
            notes: notes.to_string(),
            created_at: now,
            updated_at: now,
        };
        insert_request(&mut tx, &request).await?;

        record_event(
            &mut tx,
            &DomainEvent::StockRequestCreated {
                channel_id: channel_id.to_string(),
                request_id: request.id.clone(),
                request_type: RequestType::Topup,
            },
            now,
        )
        .await?;

        tx.commit().await?;

        info!(request_id = %request.id, channel_id = %channel_id, quantity, "Top-up request created");
        Ok(request)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<StockRequest>> {
        let mut conn = self.pool.acquire().await?;
        fetch_request(&mut conn, id).await
    }

    /// Requests of a channel, oldest first. The INITIAL request comes first.
    pub async fn list_for_channel(&self, channel_id: &str) -> DbResult<Vec<StockRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM stock_requests WHERE channel_id = ?1 ORDER BY created_at, request_type"
        );
        let requests = sqlx::query_as::<_, StockRequest>(&sql)
            .bind(channel_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(requests)
    }

    pub async fn submit(&self, id: &str) -> DbResult<StockRequest> {
        self.simple_transition(id, RequestEvent::Submit).await
    }

    pub async fn approve(&self, id: &str) -> DbResult<StockRequest> {
        self.simple_transition(id, RequestEvent::Approve).await
    }

    pub async fn pack(&self, id: &str) -> DbResult<StockRequest> {
        self.simple_transition(id, RequestEvent::Pack).await
    }

    /// Any non-terminal state to `cancelled`. No ledger effect.
    pub async fn cancel(&self, id: &str) -> DbResult<StockRequest> {
        self.simple_transition(id, RequestEvent::Cancel).await
    }

    /// `approved → allocated` with the warehouse's per-barcode rows.
    ///
    /// A malformed row rejects the whole upload. A total that differs from
    /// the requested quantity is reported as a warning and still committed.
    pub async fn upload_allocation(
        &self,
        id: &str,
        rows: &[AllocationRow],
    ) -> DbResult<Outcome<Vec<Allocation>>> {
        debug!(request_id = %id, rows = rows.len(), "Uploading allocation");

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let request = transition_request(&mut tx, id, RequestEvent::UploadAllocation, now).await?;
        let checked = check_allocation(id, request.requested_total_quantity, rows)?;

        let mut allocations = Vec::with_capacity(rows.len());
        for row in rows {
            let allocation = Allocation {
                request_id: id.to_string(),
                barcode: row.barcode.trim().to_string(),
                size: row.size.trim().to_string(),
                packed_quantity: row.packed_quantity,
                unit_price_cents: row.unit_price.cents(),
                product_ref: row.product_ref.clone(),
            };

            sqlx::query(
                r#"
                INSERT INTO allocations
                    (request_id, barcode, size, packed_quantity, unit_price_cents, product_ref)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&allocation.request_id)
            .bind(&allocation.barcode)
            .bind(&allocation.size)
            .bind(allocation.packed_quantity)
            .bind(allocation.unit_price_cents)
            .bind(&allocation.product_ref)
            .execute(&mut *tx)
            .await?;

            allocations.push(allocation);
        }

        tx.commit().await?;

        for warning in &checked.warnings {
            warn!(request_id = %id, warning = ?warning, "Allocation committed with warning");
        }

        Ok(Outcome::new(allocations, checked.warnings))
    }

    pub async fn allocations(&self, id: &str) -> DbResult<Vec<Allocation>> {
        let allocations = sqlx::query_as::<_, Allocation>(
            r#"
            SELECT request_id, barcode, size, packed_quantity, unit_price_cents, product_ref
            FROM allocations
            WHERE request_id = ?1
            ORDER BY barcode
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(allocations)
    }

    /// `packed → shipped`, recording the carrier.
    pub async fn create_shipment(
        &self,
        id: &str,
        provider: &str,
        tracking_number: &str,
    ) -> DbResult<Shipment> {
        validate_required_text("provider", provider)?;
        validate_required_text("tracking number", tracking_number)?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        transition_request(&mut tx, id, RequestEvent::Ship, now).await?;

        let shipment = Shipment {
            request_id: id.to_string(),
            provider: provider.trim().to_string(),
            tracking_number: tracking_number.trim().to_string(),
            shipped_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO shipments (request_id, provider, tracking_number, shipped_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&shipment.request_id)
        .bind(&shipment.provider)
        .bind(&shipment.tracking_number)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(shipment)
    }

    pub async fn shipment(&self, id: &str) -> DbResult<Option<Shipment>> {
        let shipment = sqlx::query_as::<_, Shipment>(
            "SELECT request_id, provider, tracking_number, shipped_at FROM shipments WHERE request_id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(shipment)
    }

    /// `shipped → received`. Credits the ledger with what actually arrived
    /// and may activate the channel.
    pub async fn confirm_receiving(
        &self,
        id: &str,
        lines: &[ReceivingLine],
    ) -> DbResult<ReceivingSummary> {
        let total_received = check_receiving(lines)?;

        debug!(request_id = %id, lines = lines.len(), total_received, "Confirming receiving");

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let request = transition_request(&mut tx, id, RequestEvent::Receive, now).await?;

        let channel = fetch_channel(&mut tx, &request.channel_id)
            .await?
            .ok_or_else(|| CoreError::not_found("channel", &request.channel_id))?;
        if !channel.status.accepts_stock() {
            let accepting: Vec<ChannelStatus> = ChannelStatus::ALL
                .into_iter()
                .filter(|s| s.accepts_stock())
                .collect();
            return Err(CoreError::invalid_transition("channel", &accepting, channel.status).into());
        }

        for line in lines {
            let barcode = line.barcode.trim();
            sqlx::query(
                r#"
                INSERT INTO receivings (request_id, barcode, allocated_qty, received_qty, received_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(id)
            .bind(barcode)
            .bind(line.allocated_qty)
            .bind(line.received_qty)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            ledger::credit(&mut tx, &request.channel_id, barcode, line.received_qty, now).await?;
        }

        let received = DomainEvent::RequestReceived {
            channel_id: request.channel_id.clone(),
            request_id: id.to_string(),
            request_type: request.request_type,
        };
        record_event(&mut tx, &received, now).await?;

        let activated_channel = run_activation_hook(&mut tx, &received, now).await?;

        tx.commit().await?;

        let discrepancies: Vec<ReceivingLine> = lines
            .iter()
            .filter(|l| l.discrepancy() != 0)
            .cloned()
            .collect();
        if !discrepancies.is_empty() {
            warn!(
                request_id = %id,
                lines = discrepancies.len(),
                "Receiving differs from allocation"
            );
        }

        info!(
            request_id = %id,
            channel_id = %request.channel_id,
            total_received,
            activated = activated_channel.is_some(),
            "Receiving confirmed"
        );

        Ok(ReceivingSummary {
            request,
            total_received,
            discrepancies,
            activated_channel,
        })
    }

    pub async fn receiving(&self, id: &str) -> DbResult<Vec<ReceivingLine>> {
        let lines = sqlx::query_as::<_, ReceivingLine>(
            r#"
            SELECT barcode, allocated_qty, received_qty
            FROM receivings
            WHERE request_id = ?1
            ORDER BY barcode
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lines)
    }

    /// Persisted receiving lines where `received_qty != allocated_qty`.
    pub async fn discrepancies(&self, id: &str) -> DbResult<Vec<ReceivingLine>> {
        let lines = sqlx::query_as::<_, ReceivingLine>(
            r#"
            SELECT barcode, allocated_qty, received_qty
            FROM receivings
            WHERE request_id = ?1 AND received_qty <> allocated_qty
            ORDER BY barcode
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lines)
    }

    async fn simple_transition(&self, id: &str, event: RequestEvent) -> DbResult<StockRequest> {
        let mut tx = self.pool.begin().await?;
        let request = transition_request(&mut tx, id, event, Utc::now()).await?;
        tx.commit().await?;
        Ok(request)
    }
}

// =============================================================================
// In-transaction helpers
// =============================================================================

pub(crate) async fn insert_request(conn: &mut SqliteConnection, request: &StockRequest) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_requests (
            id, channel_id, request_type, status, requested_total_quantity,
            notes, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&request.id)
    .bind(&request.channel_id)
    .bind(request.request_type.as_str())
    .bind(request.status.as_str())
    .bind(request.requested_total_quantity)
    .bind(&request.notes)
    .bind(request.created_at)
    .bind(request.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn fetch_request(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<StockRequest>> {
    let sql = format!("SELECT {REQUEST_COLUMNS} FROM stock_requests WHERE id = ?1");
    let request = sqlx::query_as::<_, StockRequest>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(request)
}

pub(crate) async fn fetch_initial_request(
    conn: &mut SqliteConnection,
    channel_id: &str,
) -> DbResult<Option<StockRequest>> {
    let sql = format!(
        "SELECT {REQUEST_COLUMNS} FROM stock_requests WHERE channel_id = ?1 AND request_type = 'initial'"
    );
    let request = sqlx::query_as::<_, StockRequest>(&sql)
        .bind(channel_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(request)
}

/// Applies `event` to a request: touch, read, table check, status CAS,
/// history row.
pub(crate) async fn transition_request(
    conn: &mut SqliteConnection,
    id: &str,
    event: RequestEvent,
    now: DateTime<Utc>,
) -> DbResult<StockRequest> {
    debug!(request_id = %id, event = ?event, "Request transition requested");

    let touched = sqlx::query("UPDATE stock_requests SET updated_at = ?2 WHERE id = ?1")
        .bind(id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    if touched.rows_affected() == 0 {
        return Err(CoreError::not_found("stock request", id).into());
    }

    let mut request = fetch_request(conn, id)
        .await?
        .ok_or_else(|| CoreError::not_found("stock request", id))?;
    let from = request.status;
    let to = from.apply(event)?;

    let swapped = sqlx::query(
        "UPDATE stock_requests SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
    )
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(now)
    .execute(&mut *conn)
    .await?;
    if swapped.rows_affected() == 0 {
        return Err(DbError::Domain(CoreError::conflict("stock request", id)));
    }

    record_status_change(conn, REQUEST_ENTITY, id, from.as_str(), to.as_str(), now).await?;

    info!(
        request_id = %id,
        channel_id = %request.channel_id,
        from = %from,
        to = %to,
        "Stock request transitioned"
    );

    request.status = to;
    request.updated_at = now;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use stockline_core::channel::ChannelType;
    use stockline_core::{Money, NewChannel, StockWarning, ValidationError};

    async fn setup() -> (Database, SalesChannel, StockRequest) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (channel, initial) = db
            .channels()
            .create(&NewChannel {
                channel_type: ChannelType::Branch,
                name: "Siam".into(),
                location: "Siam Paragon G".into(),
                start_date: None,
                end_date: None,
                staff: vec![],
                initial_quantity: 10,
                notes: String::new(),
                sales_target: None,
            })
            .await
            .unwrap();
        (db, channel, initial)
    }

    fn row(barcode: &str, qty: i64) -> AllocationRow {
        AllocationRow {
            barcode: barcode.into(),
            size: "M".into(),
            packed_quantity: qty,
            unit_price: Money::from_cents(49_000),
            product_ref: None,
        }
    }

    #[tokio::test]
    async fn test_upload_before_approval_is_rejected() {
        let (db, _, initial) = setup().await;
        db.requests().submit(&initial.id).await.unwrap();

        let err = db
            .requests()
            .upload_allocation(&initial.id, &[row("A", 10)])
            .await
            .unwrap_err();
        match err.as_domain() {
            Some(CoreError::InvalidTransition { entity, expected, actual }) => {
                assert_eq!(entity, "stock request");
                assert_eq!(expected, "approved");
                assert_eq!(actual, "submitted");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_row_rejects_whole_upload() {
        let (db, _, initial) = setup().await;
        db.requests().submit(&initial.id).await.unwrap();
        db.requests().approve(&initial.id).await.unwrap();

        let err = db
            .requests()
            .upload_allocation(&initial.id, &[row("A", 5), row("A", 5)])
            .await
            .unwrap_err();
        assert!(matches!(err.as_domain(), Some(CoreError::Validation(_))));

        let request = db.requests().get(&initial.id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Approved);
        assert!(db.requests().allocations(&initial.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_allocation_commits_with_warning() {
        let (db, _, initial) = setup().await;
        db.requests().submit(&initial.id).await.unwrap();
        db.requests().approve(&initial.id).await.unwrap();

        let outcome = db
            .requests()
            .upload_allocation(&initial.id, &[row("A", 4), row("B", 4)])
            .await
            .unwrap();
        assert_eq!(outcome.value.len(), 2);
        assert_eq!(
            outcome.warnings,
            vec![StockWarning::QuantityMismatch {
                request_id: initial.id.clone(),
                requested: 10,
                allocated: 8,
            }]
        );
    }

    #[tokio::test]
    async fn test_oversized_receiving_line_is_rejected() {
        let (db, channel, initial) = setup().await;
        let lines = vec![ReceivingLine {
            barcode: "A".into(),
            allocated_qty: 10,
            received_qty: stockline_core::MAX_RECEIVING_QUANTITY + 1,
        }];

        let err = db.requests().confirm_receiving(&initial.id, &lines).await.unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(CoreError::Validation(ValidationError::OutOfRange { .. }))
        ));
        assert!(db.ledger().entries(&channel.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_topup_needs_active_channel() {
        let (db, channel, _) = setup().await;
        let err = db.requests().create_topup(&channel.id, 5, "").await.unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(CoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_is_only_for_open_requests() {
        let (db, _, initial) = setup().await;
        db.requests().cancel(&initial.id).await.unwrap();

        let err = db.requests().cancel(&initial.id).await.unwrap_err();
        match err.as_domain() {
            Some(CoreError::InvalidTransition { actual, .. }) => assert_eq!(actual, "cancelled"),
            other => panic!("unexpected: {other:?}"),
        }

        let history = db.events().request_history(&initial.id).await.unwrap();
        assert_eq!(history.len(), 1);
    }
}
