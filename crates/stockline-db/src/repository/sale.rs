//! # Sale Repository
//!
//! POS sales against a channel's ledger.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE (one transaction)                                           │
//! │     ├── UPDATE sales_channels ... WHERE status = 'active'  (guard)     │
//! │     ├── ledger::try_debit(basket)  ── InsufficientStock ─► rollback    │
//! │     ├── INSERT sales, sale_items, sale_adjustments                     │
//! │     └── domain_events += SaleRecorded                                  │
//! │                                                                         │
//! │  2. (OPTIONAL) CANCEL (one transaction, idempotent)                    │
//! │     ├── UPDATE sales SET status = 'cancelled' WHERE status = 'active'  │
//! │     │     └── 0 rows + already cancelled ─► AlreadyCancelled           │
//! │     ├── channel still active?                                          │
//! │     ├── ledger::reverse(items)                                         │
//! │     └── domain_events += SaleCancelled                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DbResult;
use crate::repository::channel::fetch_channel;
use crate::repository::events::record_event;
use crate::repository::ledger;
use stockline_core::sale::{
    sale_number, validate_cancel_reason, CancelOutcome, SaleAdjustment, SaleItem, SaleWithItems,
};
use stockline_core::{ChannelStatus, CoreError, DomainEvent, NewSale, Sale, SaleStatus};

const SALE_COLUMNS: &str = r#"
    id, channel_id, sale_number, status, bill_discount_cents, total_cents,
    cancel_reason, cancelled_at, created_at
"#;

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Records a sale and debits the ledger for every line.
    ///
    /// ## Errors
    /// - `InvalidTransition` if the channel is not `active`
    /// - `InsufficientStock` for the first barcode that cannot be covered;
    ///   nothing is written in that case
    pub async fn create(&self, input: &NewSale) -> DbResult<SaleWithItems> {
        input.validate()?;

        let now = Utc::now();
        let sale_id = Uuid::new_v4().to_string();
        let channel_id = input.channel_id.as_str();

        debug!(
            sale_id = %sale_id,
            channel_id = %channel_id,
            lines = input.items.len(),
            "Creating sale"
        );

        let mut tx = self.pool.begin().await?;

        // Fails once close-out has moved the channel on.
        let guard = sqlx::query(
            "UPDATE sales_channels SET updated_at = ?2 WHERE id = ?1 AND status = 'active'",
        )
        .bind(channel_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if guard.rows_affected() == 0 {
            return Err(match fetch_channel(&mut tx, channel_id).await? {
                None => CoreError::not_found("channel", channel_id),
                Some(channel) => CoreError::invalid_transition(
                    "channel",
                    &[ChannelStatus::Active],
                    channel.status,
                ),
            }
            .into());
        }

        let code: String = sqlx::query_scalar("SELECT code FROM sales_channels WHERE id = ?1")
            .bind(channel_id)
            .fetch_one(&mut *tx)
            .await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales WHERE channel_id = ?1")
            .bind(channel_id)
            .fetch_one(&mut *tx)
            .await?;

        ledger::try_debit(&mut tx, channel_id, &input.debit_lines(), now).await?;

        let sale = Sale {
            id: sale_id.clone(),
            channel_id: channel_id.to_string(),
            sale_number: sale_number(&code, count + 1),
            status: SaleStatus::Active,
            bill_discount_cents: input.bill_discount.cents(),
            total_cents: input.total().cents(),
            cancel_reason: None,
            cancelled_at: None,
            created_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, channel_id, sale_number, status,
                bill_discount_cents, total_cents, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.channel_id)
        .bind(&sale.sale_number)
        .bind(sale.status.as_str())
        .bind(sale.bill_discount_cents)
        .bind(sale.total_cents)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut items = Vec::with_capacity(input.items.len());
        for (index, line) in input.items.iter().enumerate() {
            let item = SaleItem {
                sale_id: sale_id.clone(),
                line_no: index as i64 + 1,
                barcode: line.barcode.trim().to_string(),
                quantity: line.quantity,
                unit_price_cents: line.unit_price.cents(),
                discount_cents: line.discount.cents(),
                line_total_cents: line.line_total().cents(),
            };

            sqlx::query(
                r#"
                INSERT INTO sale_items (
                    sale_id, line_no, barcode, quantity,
                    unit_price_cents, discount_cents, line_total_cents
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&item.sale_id)
            .bind(item.line_no)
            .bind(&item.barcode)
            .bind(item.quantity)
            .bind(item.unit_price_cents)
            .bind(item.discount_cents)
            .bind(item.line_total_cents)
            .execute(&mut *tx)
            .await?;

            items.push(item);
        }

        let mut adjustments = Vec::with_capacity(input.adjustments.len());
        for (position, adjustment) in input.adjustments.iter().enumerate() {
            let row = SaleAdjustment {
                sale_id: sale_id.clone(),
                description: adjustment.description.trim().to_string(),
                amount_cents: adjustment.amount.cents(),
            };

            sqlx::query(
                r#"
                INSERT INTO sale_adjustments (sale_id, position, description, amount_cents)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(&row.sale_id)
            .bind(position as i64)
            .bind(&row.description)
            .bind(row.amount_cents)
            .execute(&mut *tx)
            .await?;

            adjustments.push(row);
        }

        record_event(
            &mut tx,
            &DomainEvent::SaleRecorded {
                channel_id: channel_id.to_string(),
                sale_id: sale_id.clone(),
                total_cents: sale.total_cents,
            },
            now,
        )
        .await?;

        tx.commit().await?;

        info!(
            sale_id = %sale.id,
            sale_number = %sale.sale_number,
            channel_id = %channel_id,
            total_cents = sale.total_cents,
            "Sale recorded"
        );

        Ok(SaleWithItems {
            sale,
            items,
            adjustments,
        })
    }

    /// Cancels a sale and gives its quantities back to the ledger.
    ///
    /// Cancelling an already cancelled sale changes nothing and returns
    /// `AlreadyCancelled`.
    pub async fn cancel(&self, sale_id: &str, reason: &str) -> DbResult<CancelOutcome> {
        validate_cancel_reason(reason)?;

        debug!(sale_id = %sale_id, "Cancelling sale");

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let swapped = sqlx::query(
            r#"
            UPDATE sales SET status = 'cancelled', cancel_reason = ?2, cancelled_at = ?3
            WHERE id = ?1 AND status = 'active'
            "#,
        )
        .bind(sale_id)
        .bind(reason.trim())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let sale = fetch_sale(&mut tx, sale_id)
            .await?
            .ok_or_else(|| CoreError::not_found("sale", sale_id))?;

        if swapped.rows_affected() == 0 {
            if sale.is_cancelled() {
                debug!(sale_id = %sale_id, "Sale already cancelled");
                return Ok(CancelOutcome::AlreadyCancelled);
            }
            return Err(CoreError::conflict("sale", sale_id).into());
        }

        let channel = fetch_channel(&mut tx, &sale.channel_id)
            .await?
            .ok_or_else(|| CoreError::not_found("channel", &sale.channel_id))?;
        if !channel.status.accepts_sales() {
            return Err(CoreError::invalid_transition(
                "channel",
                &[ChannelStatus::Active],
                channel.status,
            )
            .into());
        }

        let items = fetch_items(&mut tx, sale_id).await?;
        let lines: Vec<_> = items
            .iter()
            .map(|item| stockline_core::DebitLine::new(item.barcode.clone(), item.quantity))
            .collect();
        ledger::reverse(&mut tx, &sale.channel_id, &lines, now).await?;

        record_event(
            &mut tx,
            &DomainEvent::SaleCancelled {
                channel_id: sale.channel_id.clone(),
                sale_id: sale_id.to_string(),
            },
            now,
        )
        .await?;

        tx.commit().await?;

        info!(sale_id = %sale_id, channel_id = %sale.channel_id, "Sale cancelled");
        Ok(CancelOutcome::Cancelled)
    }

    /// Gets a sale with its lines.
    pub async fn get(&self, sale_id: &str) -> DbResult<Option<SaleWithItems>> {
        let mut conn = self.pool.acquire().await?;

        let Some(sale) = fetch_sale(&mut conn, sale_id).await? else {
            return Ok(None);
        };
        let items = fetch_items(&mut conn, sale_id).await?;
        let adjustments = sqlx::query_as::<_, SaleAdjustment>(
            r#"
            SELECT sale_id, description, amount_cents
            FROM sale_adjustments
            WHERE sale_id = ?1
            ORDER BY position
            "#,
        )
        .bind(sale_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Some(SaleWithItems {
            sale,
            items,
            adjustments,
        }))
    }

    /// Sales of a channel in the order they were rung up.
    pub async fn list_for_channel(&self, channel_id: &str) -> DbResult<Vec<Sale>> {
        let sql = format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE channel_id = ?1 ORDER BY sale_number"
        );
        let sales = sqlx::query_as::<_, Sale>(&sql)
            .bind(channel_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(sales)
    }
}

async fn fetch_sale(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Option<Sale>> {
    let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1");
    let sale = sqlx::query_as::<_, Sale>(&sql)
        .bind(sale_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(sale)
}

async fn fetch_items(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Vec<SaleItem>> {
    let items = sqlx::query_as::<_, SaleItem>(
        r#"
        SELECT sale_id, line_no, barcode, quantity,
               unit_price_cents, discount_cents, line_total_cents
        FROM sale_items
        WHERE sale_id = ?1
        ORDER BY line_no
        "#,
    )
    .bind(sale_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(items)
}
