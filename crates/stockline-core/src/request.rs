//! # Stock Request Pipeline
//!
//! A stock request is a coarse "send me N pieces" ask from a channel to the
//! warehouse. The warehouse breaks it into per-barcode allocations, packs,
//! ships, and the channel confirms what actually arrived.
//!
//! ## Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  draft ─submit─► submitted ─approve─► approved ─upload_allocation─►     │
//! │                                                                         │
//! │     allocated ─pack─► packed ─ship─► shipped ─receive─► received ✔     │
//! │                                                  │                      │
//! │                                                  └─► ledger credit      │
//! │                                                      (received qty)     │
//! │                                                                         │
//! │  cancel: any non-terminal state ──► cancelled ✘                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, Outcome, StockWarning, ValidationError};
use crate::money::Money;
use crate::validation::{
    validate_barcode, validate_non_negative, validate_price_cents, validate_receiving_quantity,
    validate_required_text,
};

// =============================================================================
// Request Type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    /// Opening stock, created together with the channel. One per channel.
    Initial,
    /// Replenishment while the channel is trading.
    Topup,
}

impl RequestType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RequestType::Initial => "initial",
            RequestType::Topup => "topup",
        }
    }
}

// =============================================================================
// Request Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    Submitted,
    Approved,
    Allocated,
    Packed,
    Shipped,
    Received,
    Cancelled,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 8] = [
        RequestStatus::Draft,
        RequestStatus::Submitted,
        RequestStatus::Approved,
        RequestStatus::Allocated,
        RequestStatus::Packed,
        RequestStatus::Shipped,
        RequestStatus::Received,
        RequestStatus::Cancelled,
    ];

    const NON_TERMINAL: [RequestStatus; 6] = [
        RequestStatus::Draft,
        RequestStatus::Submitted,
        RequestStatus::Approved,
        RequestStatus::Allocated,
        RequestStatus::Packed,
        RequestStatus::Shipped,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Draft => "draft",
            RequestStatus::Submitted => "submitted",
            RequestStatus::Approved => "approved",
            RequestStatus::Allocated => "allocated",
            RequestStatus::Packed => "packed",
            RequestStatus::Shipped => "shipped",
            RequestStatus::Received => "received",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<RequestStatus> {
        RequestStatus::ALL.into_iter().find(|s| s.as_str() == value)
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Received | RequestStatus::Cancelled)
    }

    pub fn allowed_events(&self) -> Vec<RequestEvent> {
        RequestEvent::ALL
            .into_iter()
            .filter(|e| e.sources().contains(self))
            .collect()
    }

    /// Applies `event` using the pipeline table.
    pub fn apply(self, event: RequestEvent) -> CoreResult<RequestStatus> {
        if event.sources().contains(&self) {
            Ok(event.target())
        } else {
            Err(CoreError::invalid_transition(
                "stock request",
                event.sources(),
                self,
            ))
        }
    }
}

impl Default for RequestStatus {
    fn default() -> Self {
        RequestStatus::Draft
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Request Events (transition table)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RequestEvent {
    Submit,
    Approve,
    UploadAllocation,
    Pack,
    Ship,
    Receive,
    Cancel,
}

impl RequestEvent {
    pub const ALL: [RequestEvent; 7] = [
        RequestEvent::Submit,
        RequestEvent::Approve,
        RequestEvent::UploadAllocation,
        RequestEvent::Pack,
        RequestEvent::Ship,
        RequestEvent::Receive,
        RequestEvent::Cancel,
    ];

    pub const fn sources(&self) -> &'static [RequestStatus] {
        match self {
            RequestEvent::Submit => &[RequestStatus::Draft],
            RequestEvent::Approve => &[RequestStatus::Submitted],
            RequestEvent::UploadAllocation => &[RequestStatus::Approved],
            RequestEvent::Pack => &[RequestStatus::Allocated],
            RequestEvent::Ship => &[RequestStatus::Packed],
            RequestEvent::Receive => &[RequestStatus::Shipped],
            RequestEvent::Cancel => &RequestStatus::NON_TERMINAL,
        }
    }

    pub const fn target(&self) -> RequestStatus {
        match self {
            RequestEvent::Submit => RequestStatus::Submitted,
            RequestEvent::Approve => RequestStatus::Approved,
            RequestEvent::UploadAllocation => RequestStatus::Allocated,
            RequestEvent::Pack => RequestStatus::Packed,
            RequestEvent::Ship => RequestStatus::Shipped,
            RequestEvent::Receive => RequestStatus::Received,
            RequestEvent::Cancel => RequestStatus::Cancelled,
        }
    }
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockRequest {
    pub id: String,
    pub channel_id: String,
    pub request_type: RequestType,
    pub status: RequestStatus,
    pub requested_total_quantity: i64,
    pub notes: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// One row of the warehouse allocation upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AllocationRow {
    pub barcode: String,
    pub size: String,
    pub packed_quantity: i64,
    pub unit_price: Money,
    /// Reference into the external product catalog, if known.
    pub product_ref: Option<String>,
}

/// A persisted allocation line.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Allocation {
    pub request_id: String,
    pub barcode: String,
    pub size: String,
    pub packed_quantity: i64,
    pub unit_price_cents: i64,
    pub product_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Shipment {
    pub request_id: String,
    pub provider: String,
    pub tracking_number: String,
    #[ts(as = "String")]
    pub shipped_at: DateTime<Utc>,
}

/// What the channel confirms on arrival, per barcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ReceivingLine {
    pub barcode: String,
    pub allocated_qty: i64,
    /// Ground truth; credited to the ledger even when it differs.
    pub received_qty: i64,
}

impl ReceivingLine {
    pub fn discrepancy(&self) -> i64 {
        self.received_qty - self.allocated_qty
    }
}

// =============================================================================
// Batch checks
// =============================================================================

/// Validates an allocation upload against its request.
///
/// The whole batch is rejected if any row is malformed or a barcode repeats.
/// A total that differs from `requested_total` is only a warning.
pub fn check_allocation(
    request_id: &str,
    requested_total: i64,
    rows: &[AllocationRow],
) -> Result<Outcome<i64>, ValidationError> {
    if rows.is_empty() {
        return Err(ValidationError::EmptyBatch {
            field: "allocation rows".to_string(),
        });
    }

    let mut seen = HashSet::with_capacity(rows.len());
    let mut allocated: i64 = 0;

    for row in rows {
        validate_barcode(&row.barcode)?;
        validate_required_text("size", &row.size)?;
        validate_non_negative("packed quantity", row.packed_quantity)?;
        validate_price_cents("price", row.unit_price.cents())?;
        if !seen.insert(row.barcode.as_str()) {
            return Err(ValidationError::Duplicate {
                field: "barcode".to_string(),
                value: row.barcode.clone(),
            });
        }
        allocated = allocated.saturating_add(row.packed_quantity);
    }

    let mut warnings = Vec::new();
    if allocated != requested_total {
        warnings.push(StockWarning::QuantityMismatch {
            request_id: request_id.to_string(),
            requested: requested_total,
            allocated,
        });
    }

    Ok(Outcome::new(allocated, warnings))
}

/// Validates a receiving confirmation. Returns the total received.
pub fn check_receiving(lines: &[ReceivingLine]) -> Result<i64, ValidationError> {
    if lines.is_empty() {
        return Err(ValidationError::EmptyBatch {
            field: "receiving items".to_string(),
        });
    }

    let mut seen = HashSet::with_capacity(lines.len());
    let mut total: i64 = 0;
    for line in lines {
        validate_barcode(&line.barcode)?;
        validate_receiving_quantity("allocated quantity", line.allocated_qty)?;
        validate_receiving_quantity("received quantity", line.received_qty)?;
        if !seen.insert(line.barcode.as_str()) {
            return Err(ValidationError::Duplicate {
                field: "barcode".to_string(),
                value: line.barcode.clone(),
            });
        }
        total = total.saturating_add(line.received_qty);
    }
    Ok(total)
}

/// Composes the warehouse barcode `{productCode}-{color}-{size}`.
pub fn compose_barcode(product_code: &str, color: &str, size: &str) -> String {
    format!("{}-{}-{}", product_code.trim(), color.trim(), size.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(barcode: &str, qty: i64) -> AllocationRow {
        AllocationRow {
            barcode: barcode.to_string(),
            size: "M".to_string(),
            packed_quantity: qty,
            unit_price: Money::from_major(390, 0),
            product_ref: None,
        }
    }

    #[test]
    fn test_full_pipeline() {
        let mut status = RequestStatus::Draft;
        for event in [
            RequestEvent::Submit,
            RequestEvent::Approve,
            RequestEvent::UploadAllocation,
            RequestEvent::Pack,
            RequestEvent::Ship,
            RequestEvent::Receive,
        ] {
            status = status.apply(event).unwrap();
        }
        assert_eq!(status, RequestStatus::Received);
        assert!(status.allowed_events().is_empty());
    }

    #[test]
    fn test_cancel_from_every_non_terminal_state() {
        for status in RequestStatus::ALL {
            let result = status.apply(RequestEvent::Cancel);
            assert_eq!(result.is_ok(), !status.is_terminal(), "{status}");
        }
    }

    #[test]
    fn test_skipping_a_stage_is_rejected() {
        let err = RequestStatus::Approved.apply(RequestEvent::Ship).unwrap_err();
        match err {
            CoreError::InvalidTransition { expected, actual, .. } => {
                assert_eq!(expected, "packed");
                assert_eq!(actual, "approved");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_allocation_short_of_request_warns() {
        let rows = vec![row("A", 200), row("B", 180), row("C", 100)];
        let outcome = check_allocation("req-1", 500, &rows).unwrap();
        assert_eq!(outcome.value, 480);
        assert_eq!(
            outcome.warnings,
            vec![StockWarning::QuantityMismatch {
                request_id: "req-1".to_string(),
                requested: 500,
                allocated: 480,
            }]
        );

        let exact = check_allocation("req-1", 480, &rows).unwrap();
        assert!(!exact.has_warnings());
    }

    #[test]
    fn test_allocation_batch_rejected_as_a_whole() {
        assert!(matches!(
            check_allocation("r", 10, &[]),
            Err(ValidationError::EmptyBatch { .. })
        ));
        assert!(matches!(
            check_allocation("r", 10, &[row("A", 5), row("A", 5)]),
            Err(ValidationError::Duplicate { .. })
        ));
        assert!(check_allocation("r", 10, &[row("A", 5), row("B", -1)]).is_err());
    }

    #[test]
    fn test_receiving_checks() {
        let lines = vec![
            ReceivingLine {
                barcode: "A".into(),
                allocated_qty: 10,
                received_qty: 9,
            },
            ReceivingLine {
                barcode: "B".into(),
                allocated_qty: 5,
                received_qty: 5,
            },
        ];
        assert_eq!(check_receiving(&lines).unwrap(), 14);
        assert_eq!(lines[0].discrepancy(), -1);

        let mut negative = lines.clone();
        negative[1].received_qty = -1;
        assert!(check_receiving(&negative).is_err());

        let mut huge = lines.clone();
        huge[0].received_qty = i64::MAX;
        assert!(matches!(
            check_receiving(&huge),
            Err(ValidationError::OutOfRange { max: crate::MAX_RECEIVING_QUANTITY, .. })
        ));
    }

    #[test]
    fn test_compose_barcode() {
        assert_eq!(compose_barcode("TEE01", "BLK", "M"), "TEE01-BLK-M");
    }
}
