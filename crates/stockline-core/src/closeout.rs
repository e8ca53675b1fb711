//! # Close-out Reconciliation
//!
//! Splits what a channel has left into damaged, missing and returned.
//!
//! ## Clamping
//! ```text
//! remaining = received − sold                (snapshot, taken inside the
//!                                             close-out transaction)
//! damaged'  = min(damaged, remaining)
//! missing'  = min(missing, remaining − damaged')
//! returned  = remaining − damaged' − missing'
//! ```
//!
//! Input that does not fit is cut down and reported as a
//! [`StockWarning::CloseOutClamped`], never rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use ts_rs::TS;

use crate::error::{Outcome, StockWarning, ValidationError};
use crate::ledger::LedgerEntry;
use crate::validation::{validate_barcode, validate_non_negative};

/// Counted damage and loss for one barcode, as entered on the close-out form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CloseOutInput {
    pub barcode: String,
    pub damaged: i64,
    pub missing: i64,
}

impl CloseOutInput {
    pub fn new(barcode: impl Into<String>, damaged: i64, missing: i64) -> Self {
        CloseOutInput {
            barcode: barcode.into(),
            damaged,
            missing,
        }
    }
}

/// The persisted disposition of one barcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CloseOutEntry {
    pub channel_id: String,
    pub barcode: String,
    pub remaining: i64,
    pub damaged: i64,
    pub missing: i64,
    pub returned: i64,
    pub clamped: bool,
}

impl CloseOutEntry {
    /// `damaged + missing + returned == remaining`, nothing negative.
    pub fn is_balanced(&self) -> bool {
        self.damaged >= 0
            && self.missing >= 0
            && self.returned >= 0
            && self.damaged + self.missing <= self.remaining
            && self.damaged + self.missing + self.returned == self.remaining
    }
}

/// Clamps one barcode's input against what is left.
pub fn clamp_disposition(
    channel_id: &str,
    barcode: &str,
    remaining: i64,
    damaged: i64,
    missing: i64,
) -> (CloseOutEntry, Option<StockWarning>) {
    let remaining = remaining.max(0);
    let damaged_clamped = damaged.min(remaining);
    let missing_clamped = missing.min(remaining - damaged_clamped);
    let clamped = damaged_clamped != damaged || missing_clamped != missing;

    let entry = CloseOutEntry {
        channel_id: channel_id.to_string(),
        barcode: barcode.to_string(),
        remaining,
        damaged: damaged_clamped,
        missing: missing_clamped,
        returned: remaining - damaged_clamped - missing_clamped,
        clamped,
    };

    let warning = clamped.then(|| StockWarning::CloseOutClamped {
        barcode: barcode.to_string(),
        remaining,
        requested_damaged: damaged,
        requested_missing: missing,
        damaged: damaged_clamped,
        missing: missing_clamped,
    });

    (entry, warning)
}

/// Builds the close-out entries for every barcode in `ledger`.
///
/// Barcodes left out of `inputs` count as `(0, 0)` and are returned in full.
///
/// ## Errors
/// - `UnknownBarcode` for an input the channel never received
/// - `Duplicate` if a barcode is listed twice
/// - `MustNotBeNegative` for negative counts
pub fn plan_close_out(
    channel_id: &str,
    ledger: &[LedgerEntry],
    inputs: &[CloseOutInput],
) -> Result<Outcome<Vec<CloseOutEntry>>, ValidationError> {
    let held: HashSet<&str> = ledger.iter().map(|e| e.barcode.as_str()).collect();
    let mut requested: BTreeMap<&str, (i64, i64)> = BTreeMap::new();

    for input in inputs {
        validate_barcode(&input.barcode)?;
        validate_non_negative("damaged", input.damaged)?;
        validate_non_negative("missing", input.missing)?;

        if !held.contains(input.barcode.as_str()) {
            return Err(ValidationError::UnknownBarcode {
                barcode: input.barcode.clone(),
            });
        }
        if requested
            .insert(input.barcode.as_str(), (input.damaged, input.missing))
            .is_some()
        {
            return Err(ValidationError::Duplicate {
                field: "close-out barcode".to_string(),
                value: input.barcode.clone(),
            });
        }
    }

    let mut ordered: Vec<&LedgerEntry> = ledger.iter().collect();
    ordered.sort_by(|a, b| a.barcode.cmp(&b.barcode));

    let mut entries = Vec::with_capacity(ordered.len());
    let mut warnings = Vec::new();
    for ledger_entry in ordered {
        let (damaged, missing) = requested
            .get(ledger_entry.barcode.as_str())
            .copied()
            .unwrap_or((0, 0));
        let (entry, warning) = clamp_disposition(
            channel_id,
            &ledger_entry.barcode,
            ledger_entry.remaining(),
            damaged,
            missing,
        );
        entries.push(entry);
        warnings.extend(warning);
    }

    Ok(Outcome::new(entries, warnings))
}

/// Leftover stock on its way back to the warehouse.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ReturnShipment {
    pub channel_id: String,
    pub provider: String,
    pub tracking_number: String,
    #[ts(as = "String")]
    pub shipped_at: DateTime<Utc>,
    /// Set when the warehouse confirms arrival.
    #[ts(as = "Option<String>")]
    pub received_at: Option<DateTime<Utc>>,
}

/// A barcode whose books do not balance after close-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConservationGap {
    pub barcode: String,
    pub received: i64,
    pub accounted: i64,
}

/// Checks `received = sold + damaged + missing + returned` per barcode.
///
/// A ledger row without a close-out entry, or the other way round, is a gap.
pub fn verify_conservation(ledger: &[LedgerEntry], entries: &[CloseOutEntry]) -> Vec<ConservationGap> {
    let closed: BTreeMap<&str, &CloseOutEntry> =
        entries.iter().map(|e| (e.barcode.as_str(), e)).collect();
    let mut gaps = Vec::new();

    for row in ledger {
        let accounted = row.sold
            + closed
                .get(row.barcode.as_str())
                .map(|e| e.damaged + e.missing + e.returned)
                .unwrap_or(0);
        if accounted != row.received || !closed.contains_key(row.barcode.as_str()) {
            gaps.push(ConservationGap {
                barcode: row.barcode.clone(),
                received: row.received,
                accounted,
            });
        }
    }

    let known: HashSet<&str> = ledger.iter().map(|e| e.barcode.as_str()).collect();
    for entry in entries {
        if !known.contains(entry.barcode.as_str()) {
            gaps.push(ConservationGap {
                barcode: entry.barcode.clone(),
                received: 0,
                accounted: entry.damaged + entry.missing + entry.returned,
            });
        }
    }

    gaps
}
