//! # Close-out Repository
//!
//! Ends a channel's selling period and records what happens to the stock
//! that is left.
//!
//! ```text
//! BEGIN
//!  1. channel active ──CAS──► pending_return     (first write; sales stop here)
//!  2. SELECT stock_ledger rows                   (frozen for this transaction)
//!  3. plan_close_out: clamp damaged/missing, returned = the rest
//!  4. INSERT closeout_entries, domain_events += ChannelClosed
//! COMMIT
//! ```
//!
//! A sale either committed before step 1, and is in the `remaining` read at
//! step 2, or its guard write finds the channel no longer `active`.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::error::DbResult;
use crate::repository::channel::transition_channel;
use crate::repository::events::record_event;
use crate::repository::ledger::fetch_entries;
use stockline_core::closeout::{plan_close_out, verify_conservation, ConservationGap};
use stockline_core::{ChannelEvent, CloseOutEntry, CloseOutInput, DomainEvent, Outcome};

#[derive(Debug, Clone)]
pub struct CloseOutRepository {
    pool: SqlitePool,
}

impl CloseOutRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CloseOutRepository { pool }
    }

    /// Closes the channel's stock.
    ///
    /// Barcodes missing from `inputs` close with nothing damaged or missing.
    /// Over-reported quantities are clamped and come back as warnings.
    pub async fn close_channel_stock(
        &self,
        channel_id: &str,
        inputs: &[CloseOutInput],
    ) -> DbResult<Outcome<Vec<CloseOutEntry>>> {
        debug!(channel_id = %channel_id, inputs = inputs.len(), "Closing channel stock");

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        transition_channel(&mut tx, channel_id, ChannelEvent::CloseStock, now).await?;

        let ledger = fetch_entries(&mut tx, channel_id).await?;
        let plan = plan_close_out(channel_id, &ledger, inputs)?;

        for entry in &plan.value {
            sqlx::query(
                r#"
                INSERT INTO closeout_entries (
                    channel_id, barcode, remaining, damaged, missing,
                    returned, clamped, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&entry.channel_id)
            .bind(&entry.barcode)
            .bind(entry.remaining)
            .bind(entry.damaged)
            .bind(entry.missing)
            .bind(entry.returned)
            .bind(entry.clamped)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let clamped = plan.value.iter().filter(|e| e.clamped).count();
        record_event(
            &mut tx,
            &DomainEvent::ChannelClosed {
                channel_id: channel_id.to_string(),
                barcodes: plan.value.len(),
                clamped,
            },
            now,
        )
        .await?;

        tx.commit().await?;

        for warning in &plan.warnings {
            warn!(channel_id = %channel_id, warning = ?warning, "Close-out input clamped");
        }

        info!(
            channel_id = %channel_id,
            barcodes = plan.value.len(),
            clamped,
            "Channel stock closed"
        );

        Ok(plan)
    }

    /// Persisted close-out entries, by barcode.
    pub async fn entries(&self, channel_id: &str) -> DbResult<Vec<CloseOutEntry>> {
        let entries = sqlx::query_as::<_, CloseOutEntry>(
            r#"
            SELECT channel_id, barcode, remaining, damaged, missing, returned, clamped
            FROM closeout_entries
            WHERE channel_id = ?1
            ORDER BY barcode
            "#,
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Barcodes where `received != sold + damaged + missing + returned`.
    /// Empty for a healthy channel.
    pub async fn verify_conservation(&self, channel_id: &str) -> DbResult<Vec<ConservationGap>> {
        let mut conn = self.pool.acquire().await?;
        let ledger = fetch_entries(&mut conn, channel_id).await?;
        drop(conn);

        let entries = self.entries(channel_id).await?;
        let gaps = verify_conservation(&ledger, &entries);

        for gap in &gaps {
            warn!(
                channel_id = %channel_id,
                barcode = %gap.barcode,
                received = gap.received,
                accounted = gap.accounted,
                "Close-out does not account for all received stock"
            );
        }

        Ok(gaps)
    }
}
