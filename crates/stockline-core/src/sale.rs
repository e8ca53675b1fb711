//! # Sales
//!
//! POS baskets recorded against a channel's ledger.
//!
//! ## Total
//! ```text
//! total = Σ (unit_price − discount) × quantity     per line
//!       + Σ adjustment.amount                      free-form, may be negative
//!       − bill_discount
//! ```
//!
//! A sale is either `active` or `cancelled`. Cancelling is one-way and gives
//! the quantities back to the ledger exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::ledger::DebitLine;
use crate::money::Money;
use crate::validation::{
    validate_barcode, validate_line_quantity, validate_notes, validate_price_cents,
    validate_required_text, validate_uuid,
};
use crate::MAX_BASKET_LINES;

// =============================================================================
// Sale Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Counted against the ledger.
    Active,
    /// Reversed. Terminal.
    Cancelled,
}

impl SaleStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Active => "active",
            SaleStatus::Cancelled => "cancelled",
        }
    }
}

impl Default for SaleStatus {
    fn default() -> Self {
        SaleStatus::Active
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a cancel call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// This call cancelled the sale and reversed the ledger.
    Cancelled,
    /// The sale was cancelled earlier; nothing changed.
    AlreadyCancelled,
}

// =============================================================================
// Input
// =============================================================================

/// One basket line as scanned at the till.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleLine {
    pub barcode: String,
    pub quantity: i64,
    /// Price per unit.
    pub unit_price: Money,
    /// Discount per unit, `0 <= discount <= unit_price`.
    pub discount: Money,
}

impl SaleLine {
    pub fn new(barcode: impl Into<String>, quantity: i64, unit_price: Money) -> Self {
        SaleLine {
            barcode: barcode.into(),
            quantity,
            unit_price,
            discount: Money::zero(),
        }
    }

    pub fn with_discount(mut self, discount: Money) -> Self {
        self.discount = discount;
        self
    }

    #[inline]
    pub fn line_total(&self) -> Money {
        self.unit_price.line_total(self.discount, self.quantity)
    }
}

/// A free-form bill line: service fee, rounding, manual markdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Adjustment {
    pub description: String,
    pub amount: Money,
}

impl Adjustment {
    pub fn new(description: impl Into<String>, amount: Money) -> Self {
        Adjustment {
            description: description.into(),
            amount,
        }
    }
}

/// A basket ready to be recorded.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewSale {
    pub channel_id: String,
    pub items: Vec<SaleLine>,
    pub adjustments: Vec<Adjustment>,
    pub bill_discount: Money,
}

impl NewSale {
    pub fn new(channel_id: impl Into<String>, items: Vec<SaleLine>) -> Self {
        NewSale {
            channel_id: channel_id.into(),
            items,
            adjustments: Vec::new(),
            bill_discount: Money::zero(),
        }
    }

    pub fn with_adjustment(mut self, adjustment: Adjustment) -> Self {
        self.adjustments.push(adjustment);
        self
    }

    pub fn with_bill_discount(mut self, bill_discount: Money) -> Self {
        self.bill_discount = bill_discount;
        self
    }

    /// Sum of the lines before adjustments and bill discount.
    pub fn subtotal(&self) -> Money {
        self.items.iter().map(SaleLine::line_total).sum()
    }

    pub fn total(&self) -> Money {
        let adjustments: Money = self.adjustments.iter().map(|a| a.amount).sum();
        self.subtotal() + adjustments - self.bill_discount
    }

    /// The ledger movement this basket causes, one entry per line.
    pub fn debit_lines(&self) -> Vec<DebitLine> {
        self.items
            .iter()
            .map(|line| DebitLine::new(line.barcode.clone(), line.quantity))
            .collect()
    }

    /// Checks every line and the resulting total.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_uuid("channel id", &self.channel_id)?;

        if self.items.is_empty() {
            return Err(ValidationError::EmptyBatch {
                field: "sale items".to_string(),
            });
        }
        if self.items.len() > MAX_BASKET_LINES {
            return Err(ValidationError::OutOfRange {
                field: "sale items".to_string(),
                min: 1,
                max: MAX_BASKET_LINES as i64,
            });
        }

        for line in &self.items {
            validate_barcode(&line.barcode)?;
            validate_line_quantity(line.quantity)?;
            validate_price_cents("unit price", line.unit_price.cents())?;
            validate_price_cents("discount", line.discount.cents())?;
            if line.discount > line.unit_price {
                return Err(ValidationError::OutOfRange {
                    field: "discount".to_string(),
                    min: 0,
                    max: line.unit_price.cents(),
                });
            }
        }

        for adjustment in &self.adjustments {
            validate_required_text("adjustment description", &adjustment.description)?;
        }

        validate_price_cents("bill discount", self.bill_discount.cents())?;

        let total = self
            .items
            .iter()
            .map(|line| line.unit_price.checked_line_total(line.discount, line.quantity))
            .chain(self.adjustments.iter().map(|a| Some(a.amount)))
            .try_fold(Money::zero(), |sum, amount| sum.checked_add(amount?))
            .and_then(|sum| sum.cents().checked_sub(self.bill_discount.cents()))
            .ok_or_else(|| ValidationError::InvalidFormat {
                field: "total".to_string(),
                reason: "amount overflows".to_string(),
            })?;

        if total < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "total".to_string(),
            });
        }

        Ok(())
    }
}

/// Validates the reason given for a cancellation.
pub fn validate_cancel_reason(reason: &str) -> Result<(), ValidationError> {
    validate_required_text("cancel reason", reason)?;
    validate_notes("cancel reason", reason)
}

/// `{channel code}-{sequence}`, sequence zero-padded to four digits.
///
/// ```rust
/// use stockline_core::sale::sale_number;
/// assert_eq!(sale_number("EV-261017-4F2A", 7), "EV-261017-4F2A-0007");
/// ```
pub fn sale_number(channel_code: &str, sequence: i64) -> String {
    format!("{}-{:04}", channel_code, sequence)
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub channel_id: String,
    pub sale_number: String,
    pub status: SaleStatus,
    pub bill_discount_cents: i64,
    pub total_cents: i64,
    pub cancel_reason: Option<String>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.status == SaleStatus::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleItem {
    pub sale_id: String,
    /// Position in the basket, from 1.
    pub line_no: i64,
    pub barcode: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub discount_cents: i64,
    pub line_total_cents: i64,
}

impl SaleItem {
    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleAdjustment {
    pub sale_id: String,
    pub description: String,
    pub amount_cents: i64,
}

/// A sale with its lines, as shown on the receipt and in reports.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleWithItems {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
    pub adjustments: Vec<SaleAdjustment>,
}

impl SaleWithItems {
    pub fn debit_lines(&self) -> Vec<DebitLine> {
        self.items
            .iter()
            .map(|item| DebitLine::new(item.barcode.clone(), item.quantity))
            .collect()
    }
}
