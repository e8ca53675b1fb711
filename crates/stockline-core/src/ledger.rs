//! # Stock Ledger
//!
//! Per-channel, per-barcode counters of what arrived and what was sold.
//!
//! ## Counters
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  received ── only grows, only from Receiving                           │
//! │  sold     ── grows on sale, shrinks on sale cancellation                │
//! │                                                                         │
//! │  invariant:  0 <= sold <= received                                      │
//! │  remaining = received - sold                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`LedgerSnapshot`] is the pure model of those rules. The database layer
//! loads the rows a basket touches into a snapshot, lets it decide, and then
//! writes the same deltas with guarded `UPDATE`s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::validation::{validate_barcode, validate_line_quantity};
use crate::MAX_BASKET_LINES;

/// A persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct LedgerEntry {
    pub channel_id: String,
    pub barcode: String,
    pub received: i64,
    pub sold: i64,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    #[inline]
    pub fn remaining(&self) -> i64 {
        self.received - self.sold
    }

    pub fn counters(&self) -> Counters {
        Counters {
            received: self.received,
            sold: self.sold,
        }
    }
}

/// Quantity to move for one barcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DebitLine {
    pub barcode: String,
    pub qty: i64,
}

impl DebitLine {
    pub fn new(barcode: impl Into<String>, qty: i64) -> Self {
        DebitLine {
            barcode: barcode.into(),
            qty,
        }
    }
}

/// Merges basket lines per barcode, in barcode order.
///
/// A basket may list the same barcode twice; the stock check must see the
/// sum, otherwise two lines that each fit could together over-sell.
pub fn aggregate_debits(lines: &[DebitLine]) -> Result<Vec<DebitLine>, ValidationError> {
    if lines.is_empty() {
        return Err(ValidationError::EmptyBatch {
            field: "sale items".to_string(),
        });
    }
    if lines.len() > MAX_BASKET_LINES {
        return Err(ValidationError::OutOfRange {
            field: "sale items".to_string(),
            min: 1,
            max: MAX_BASKET_LINES as i64,
        });
    }

    let mut merged: BTreeMap<&str, i64> = BTreeMap::new();
    for line in lines {
        validate_barcode(&line.barcode)?;
        validate_line_quantity(line.qty)?;
        *merged.entry(line.barcode.as_str()).or_insert(0) += line.qty;
    }

    Ok(merged
        .into_iter()
        .map(|(barcode, qty)| DebitLine::new(barcode, qty))
        .collect())
}

/// `received` / `sold` for one barcode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub received: i64,
    pub sold: i64,
}

impl Counters {
    #[inline]
    pub fn remaining(&self) -> i64 {
        self.received - self.sold
    }

    #[inline]
    pub fn is_consistent(&self) -> bool {
        0 <= self.sold && self.sold <= self.received
    }
}

/// In-memory view of one channel's ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    channel_id: String,
    rows: BTreeMap<String, Counters>,
}

impl LedgerSnapshot {
    pub fn new(channel_id: impl Into<String>) -> Self {
        LedgerSnapshot {
            channel_id: channel_id.into(),
            rows: BTreeMap::new(),
        }
    }

    pub fn from_entries(channel_id: impl Into<String>, entries: &[LedgerEntry]) -> Self {
        let mut snapshot = LedgerSnapshot::new(channel_id);
        for entry in entries {
            snapshot.rows.insert(entry.barcode.clone(), entry.counters());
        }
        snapshot
    }

    pub fn get(&self, barcode: &str) -> Counters {
        self.rows.get(barcode).copied().unwrap_or_default()
    }

    /// Unknown barcodes have nothing remaining.
    pub fn remaining_of(&self, barcode: &str) -> i64 {
        self.get(barcode).remaining()
    }

    pub fn barcodes(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    pub fn is_consistent(&self) -> bool {
        self.rows.values().all(Counters::is_consistent)
    }

    /// `received += qty`.
    pub fn credit(&mut self, barcode: &str, qty: i64) -> Result<(), ValidationError> {
        validate_barcode(barcode)?;
        if qty < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "received quantity".to_string(),
            });
        }
        self.rows.entry(barcode.to_string()).or_default().received += qty;
        Ok(())
    }

    /// Checks every line against `remaining` without changing anything.
    ///
    /// Returns the aggregated lines that a debit would apply.
    pub fn check_debit(&self, lines: &[DebitLine]) -> CoreResult<Vec<DebitLine>> {
        let merged = aggregate_debits(lines)?;
        for line in &merged {
            let available = self.remaining_of(&line.barcode);
            if line.qty > available {
                return Err(CoreError::InsufficientStock {
                    barcode: line.barcode.clone(),
                    requested: line.qty,
                    available,
                });
            }
        }
        Ok(merged)
    }

    /// All-or-nothing `sold += qty` across the basket.
    pub fn try_debit(&mut self, lines: &[DebitLine]) -> CoreResult<Vec<DebitLine>> {
        let merged = self.check_debit(lines)?;
        for line in &merged {
            self.rows.entry(line.barcode.clone()).or_default().sold += line.qty;
        }
        Ok(merged)
    }

    /// `sold -= qty` for a cancelled sale.
    ///
    /// ## Errors
    /// `LedgerCorrupted` if any line would push `sold` below zero; nothing is
    /// changed in that case.
    pub fn reverse(&mut self, lines: &[DebitLine]) -> CoreResult<()> {
        let merged = aggregate_debits(lines)?;
        for line in &merged {
            let sold = self.get(&line.barcode).sold;
            if sold < line.qty {
                return Err(CoreError::LedgerCorrupted {
                    channel_id: self.channel_id.clone(),
                    barcode: line.barcode.clone(),
                    detail: format!("reversal of {} exceeds sold {}", line.qty, sold),
                });
            }
        }
        for line in &merged {
            if let Some(row) = self.rows.get_mut(&line.barcode) {
                row.sold -= line.qty;
            }
        }
        Ok(())
    }
}
