//! # Ledger Repository
//!
//! Guarded writes against `stock_ledger`.
//!
//! ## Debit
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  (inside the sale transaction, after the channel guard write)          │
//! │                                                                         │
//! │  1. SELECT the channel's rows ──► LedgerSnapshot::check_debit           │
//! │        └── InsufficientStock{barcode, requested, available} ─► abort   │
//! │                                                                         │
//! │  2. for each barcode, in barcode order:                                │
//! │        UPDATE stock_ledger SET sold = sold + ?q                        │
//! │        WHERE channel_id = ? AND barcode = ? AND received - sold >= ?q  │
//! │        └── 0 rows ─► abort, nothing of the basket stays applied        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The write functions take the caller's connection so that they join its
//! transaction; only reads go through the pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, error, warn};

use crate::error::DbResult;
use stockline_core::ledger::{DebitLine, LedgerEntry, LedgerSnapshot};
use stockline_core::{CoreError, ValidationError};

/// Received, sold and remaining summed over a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub received: i64,
    pub sold: i64,
    pub remaining: i64,
}

/// Read access to the ledger.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    /// All rows of a channel, by barcode. Feeds the close-out form.
    pub async fn entries(&self, channel_id: &str) -> DbResult<Vec<LedgerEntry>> {
        let mut conn = self.pool.acquire().await?;
        fetch_entries(&mut conn, channel_id).await
    }

    /// `received - sold` for one barcode; 0 if the channel never got it.
    pub async fn remaining(&self, channel_id: &str, barcode: &str) -> DbResult<i64> {
        let remaining: Option<i64> = sqlx::query_scalar(
            "SELECT received - sold FROM stock_ledger WHERE channel_id = ?1 AND barcode = ?2",
        )
        .bind(channel_id)
        .bind(barcode)
        .fetch_optional(&self.pool)
        .await?;

        Ok(remaining.unwrap_or(0))
    }

    pub async fn totals(&self, channel_id: &str) -> DbResult<LedgerTotals> {
        let (received, sold): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(received), 0), COALESCE(SUM(sold), 0)
            FROM stock_ledger
            WHERE channel_id = ?1
            "#,
        )
        .bind(channel_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerTotals {
            received,
            sold,
            remaining: received - sold,
        })
    }
}

pub(crate) async fn fetch_entries(
    conn: &mut SqliteConnection,
    channel_id: &str,
) -> DbResult<Vec<LedgerEntry>> {
    let entries = sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT channel_id, barcode, received, sold, updated_at
        FROM stock_ledger
        WHERE channel_id = ?1
        ORDER BY barcode
        "#,
    )
    .bind(channel_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(entries)
}

/// `received += qty`, creating the row on first delivery.
pub(crate) async fn credit(
    conn: &mut SqliteConnection,
    channel_id: &str,
    barcode: &str,
    qty: i64,
    now: DateTime<Utc>,
) -> DbResult<()> {
    if qty < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "received quantity".to_string(),
        }
        .into());
    }

    debug!(channel_id = %channel_id, barcode = %barcode, qty, "Crediting ledger");

    sqlx::query(
        r#"
        INSERT INTO stock_ledger (channel_id, barcode, received, sold, updated_at)
        VALUES (?1, ?2, ?3, 0, ?4)
        ON CONFLICT (channel_id, barcode) DO UPDATE SET
            received = received + excluded.received,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(channel_id)
    .bind(barcode)
    .bind(qty)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// All-or-nothing `sold += qty` for a basket.
///
/// Must run after the caller's first write so the rows it checks cannot
/// change before the updates land. On error the caller drops the
/// transaction, which discards any line already applied.
pub(crate) async fn try_debit(
    conn: &mut SqliteConnection,
    channel_id: &str,
    lines: &[DebitLine],
    now: DateTime<Utc>,
) -> DbResult<Vec<DebitLine>> {
    let rows = fetch_entries(conn, channel_id).await?;
    let snapshot = LedgerSnapshot::from_entries(channel_id, &rows);

    let merged = match snapshot.check_debit(lines) {
        Ok(merged) => merged,
        Err(err) => {
            if let CoreError::InsufficientStock {
                barcode,
                requested,
                available,
            } = &err
            {
                warn!(
                    channel_id = %channel_id,
                    barcode = %barcode,
                    requested,
                    available,
                    "Debit rejected"
                );
            }
            return Err(err.into());
        }
    };

    for line in &merged {
        let result = sqlx::query(
            r#"
            UPDATE stock_ledger
            SET sold = sold + ?3, updated_at = ?4
            WHERE channel_id = ?1 AND barcode = ?2 AND received - sold >= ?3
            "#,
        )
        .bind(channel_id)
        .bind(&line.barcode)
        .bind(line.qty)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            let available: Option<i64> = sqlx::query_scalar(
                "SELECT received - sold FROM stock_ledger WHERE channel_id = ?1 AND barcode = ?2",
            )
            .bind(channel_id)
            .bind(&line.barcode)
            .fetch_optional(&mut *conn)
            .await?;

            warn!(channel_id = %channel_id, barcode = %line.barcode, "Guarded debit matched no row");
            return Err(CoreError::InsufficientStock {
                barcode: line.barcode.clone(),
                requested: line.qty,
                available: available.unwrap_or(0),
            }
            .into());
        }
    }

    Ok(merged)
}

/// `sold -= qty` for a cancelled sale.
///
/// A line that would take `sold` below zero means the ledger was already
/// wrong; it is reported as `LedgerCorrupted`, never clamped.
pub(crate) async fn reverse(
    conn: &mut SqliteConnection,
    channel_id: &str,
    lines: &[DebitLine],
    now: DateTime<Utc>,
) -> DbResult<()> {
    let merged = stockline_core::ledger::aggregate_debits(lines)?;

    for line in &merged {
        let result = sqlx::query(
            r#"
            UPDATE stock_ledger
            SET sold = sold - ?3, updated_at = ?4
            WHERE channel_id = ?1 AND barcode = ?2 AND sold >= ?3
            "#,
        )
        .bind(channel_id)
        .bind(&line.barcode)
        .bind(line.qty)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            error!(
                channel_id = %channel_id,
                barcode = %line.barcode,
                qty = line.qty,
                "Ledger reversal would drive sold below zero"
            );
            return Err(CoreError::LedgerCorrupted {
                channel_id: channel_id.to_string(),
                barcode: line.barcode.clone(),
                detail: format!("reversal of {} exceeds recorded sales", line.qty),
            }
            .into());
        }
    }

    Ok(())
}
