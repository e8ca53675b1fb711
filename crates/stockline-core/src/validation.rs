//! # Validation Module
//!
//! Input checks run before any state change.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Dashboard forms (clamp inputs, required fields)              │
//! │           │   not trusted: the browser is not an enforcer               │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE + domain planners (clamping, totals)             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite (UNIQUE, CHECK sold <= received, FK)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::NaiveDate;

use crate::error::ValidationError;
use crate::{MAX_LINE_QUANTITY, MAX_RECEIVING_QUANTITY, MAX_REQUEST_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_BARCODE_LEN: usize = 64;
const MAX_NAME_LEN: usize = 200;
const MAX_TEXT_LEN: usize = 500;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a barcode.
///
/// Barcodes are opaque keys (usually `{productCode}-{color}-{size}`), so the
/// only rules are: non-empty, bounded, printable without whitespace.
///
/// ```rust
/// use stockline_core::validation::validate_barcode;
///
/// assert!(validate_barcode("TEE01-BLK-M").is_ok());
/// assert!(validate_barcode("").is_err());
/// assert!(validate_barcode("TEE01 BLK").is_err());
/// ```
pub fn validate_barcode(barcode: &str) -> ValidationResult<()> {
    if barcode.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "barcode".to_string(),
        });
    }

    if barcode.len() > MAX_BARCODE_LEN {
        return Err(ValidationError::TooLong {
            field: "barcode".to_string(),
            max: MAX_BARCODE_LEN,
        });
    }

    if barcode.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::InvalidFormat {
            field: "barcode".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates a required free-text field (channel name, location, provider...).
pub fn validate_required_text(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(())
}

/// Validates optional notes / reasons. Empty is fine.
pub fn validate_notes(field: &str, value: &str) -> ValidationResult<()> {
    if value.len() > MAX_TEXT_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_TEXT_LEN,
        });
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a sale line quantity: `1..=MAX_LINE_QUANTITY`.
pub fn validate_line_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a stock request's coarse total: `1..=MAX_REQUEST_QUANTITY`.
pub fn validate_request_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "requested total quantity".to_string(),
        });
    }

    if qty > MAX_REQUEST_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "requested total quantity".to_string(),
            min: 1,
            max: MAX_REQUEST_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a receiving count: `0..=MAX_RECEIVING_QUANTITY`.
pub fn validate_receiving_quantity(field: &str, qty: i64) -> ValidationResult<()> {
    validate_non_negative(field, qty)?;

    if qty > MAX_RECEIVING_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_RECEIVING_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a count that may be zero (packed, received, damaged, missing).
pub fn validate_non_negative(field: &str, value: i64) -> ValidationResult<()> {
    if value < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates an amount in minor units that must be `>= 0`.
///
/// ```rust
/// use stockline_core::validation::validate_price_cents;
///
/// assert!(validate_price_cents("unit price", 0).is_ok());
/// assert!(validate_price_cents("unit price", -1).is_err());
/// ```
pub fn validate_price_cents(field: &str, cents: i64) -> ValidationResult<()> {
    validate_non_negative(field, cents)
}

// =============================================================================
// Date Validators
// =============================================================================

/// Validates the date window of a channel.
///
/// EVENT channels need both dates with `start <= end`; BRANCH channels must
/// carry neither.
pub fn validate_channel_dates(
    is_event: bool,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> ValidationResult<()> {
    match (is_event, start, end) {
        (true, Some(start), Some(end)) if start <= end => Ok(()),
        (true, Some(_), Some(_)) => Err(ValidationError::InvalidDates {
            reason: "start date is after end date".to_string(),
        }),
        (true, _, _) => Err(ValidationError::InvalidDates {
            reason: "event channels need a start and an end date".to_string(),
        }),
        (false, None, None) => Ok(()),
        (false, _, _) => Err(ValidationError::InvalidDates {
            reason: "branch channels have no date window".to_string(),
        }),
    }
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates an entity id handed in by the UI layer.
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_validate_barcode() {
        assert!(validate_barcode("TEE01-BLK-M").is_ok());
        assert!(validate_barcode("8850001112223").is_ok());

        assert!(validate_barcode("").is_err());
        assert!(validate_barcode("   ").is_err());
        assert!(validate_barcode("has space").is_err());
        assert!(validate_barcode(&"A".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_required_text() {
        assert!(validate_required_text("name", "Siam Paragon Pop-up").is_ok());
        assert!(validate_required_text("name", "  ").is_err());
        assert!(validate_required_text("name", &"x".repeat(201)).is_err());
    }

    #[test]
    fn test_validate_quantities() {
        assert!(validate_line_quantity(1).is_ok());
        assert!(validate_line_quantity(0).is_err());
        assert!(validate_line_quantity(-3).is_err());
        assert!(validate_line_quantity(MAX_LINE_QUANTITY + 1).is_err());

        assert!(validate_request_quantity(500).is_ok());
        assert!(validate_request_quantity(0).is_err());

        assert!(validate_non_negative("damaged", 0).is_ok());
        assert!(validate_non_negative("damaged", -1).is_err());
    }

    #[test]
    fn test_validate_channel_dates() {
        assert!(validate_channel_dates(true, Some(d(2026, 3, 1)), Some(d(2026, 3, 1))).is_ok());
        assert!(validate_channel_dates(true, Some(d(2026, 3, 2)), Some(d(2026, 3, 1))).is_err());
        assert!(validate_channel_dates(true, None, Some(d(2026, 3, 1))).is_err());
        assert!(validate_channel_dates(false, None, None).is_ok());
        assert!(validate_channel_dates(false, Some(d(2026, 3, 1)), None).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("id", "550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("id", "").is_err());
        assert!(validate_uuid("id", "not-a-uuid").is_err());
    }
}
