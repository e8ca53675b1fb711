//! # Error Types
//!
//! Domain errors and non-fatal warnings for stockline-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockline-core (this file)                                            │
//! │  ├── CoreError        - Hard failures, nothing was written             │
//! │  ├── ValidationError  - Malformed input                                │
//! │  └── StockWarning     - Soft checks; the operation still went through  │
//! │                                                                         │
//! │  stockline-db                                                          │
//! │  └── DbError          - Storage failures, wraps CoreError              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → dashboard UI            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The UI layer turns these into user-facing text. The core never guesses:
//! it rejects on hard invariants and only warns on the two soft checks
//! (allocation total, close-out clamping).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

// =============================================================================
// Core Error
// =============================================================================

/// Domain errors.
///
/// Every variant means the operation was rejected as a whole and left no
/// partial effect behind.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A state-machine event was attempted from a state that does not allow it.
    ///
    /// `expected` lists the states the event is legal from, joined with `|`.
    #[error("Invalid {entity} transition: expected status {expected}, found {actual}")]
    InvalidTransition {
        entity: String,
        expected: String,
        actual: String,
    },

    /// A basket asks for more of a barcode than the channel has left.
    ///
    /// ## User Workflow
    /// ```text
    /// Terminal A: sell 7 × SKU-A   (remaining 10)  → ok, remaining 3
    /// Terminal B: sell 5 × SKU-A   (remaining 3)   → InsufficientStock
    ///      │
    ///      ▼
    /// UI shows: "Only 3 left of SKU-A"
    /// ```
    #[error("Insufficient stock for {barcode}: requested {requested}, available {available}")]
    InsufficientStock {
        barcode: String,
        requested: i64,
        available: i64,
    },

    /// A compare-and-swap lost against a concurrent writer.
    ///
    /// The caller should reload and retry; the core never retries by itself.
    #[error("Concurrent update on {entity} {id}, reload and retry")]
    ConcurrencyConflict { entity: String, id: String },

    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A ledger row would break `0 <= sold <= received`.
    ///
    /// Only reachable if an earlier write already violated the invariant,
    /// so this is a bug report rather than a user error.
    #[error("Ledger corrupted for channel {channel_id}, barcode {barcode}: {detail}")]
    LedgerCorrupted {
        channel_id: String,
        barcode: String,
        detail: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Builds an `InvalidTransition` from displayable states.
    pub fn invalid_transition<S: std::fmt::Display>(
        entity: impl Into<String>,
        expected: &[S],
        actual: impl std::fmt::Display,
    ) -> Self {
        let expected = expected
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("|");
        CoreError::InvalidTransition {
            entity: entity.into(),
            expected: if expected.is_empty() {
                "none (terminal)".to_string()
            } else {
                expected
            },
            actual: actual.to_string(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn conflict(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::ConcurrencyConflict {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any state change.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID, bad barcode characters).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A batch is empty where at least one row is needed.
    #[error("{field} must contain at least one row")]
    EmptyBatch { field: String },

    /// Same key appears twice in one batch.
    #[error("{field} '{value}' appears more than once")]
    Duplicate { field: String, value: String },

    /// Barcode is not held by the channel.
    #[error("barcode '{barcode}' is not held by this channel")]
    UnknownBarcode { barcode: String },

    /// Event dates are missing, present when they must not be, or reversed.
    #[error("invalid channel dates: {reason}")]
    InvalidDates { reason: String },
}

// =============================================================================
// Warnings
// =============================================================================

/// Non-fatal findings returned next to a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockWarning {
    /// Allocation rows do not add up to the requested total.
    QuantityMismatch {
        request_id: String,
        requested: i64,
        allocated: i64,
    },

    /// Damaged + missing exceeded what was left and was cut down.
    CloseOutClamped {
        barcode: String,
        remaining: i64,
        requested_damaged: i64,
        requested_missing: i64,
        damaged: i64,
        missing: i64,
    },
}

/// A successful result plus the soft-check warnings it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<StockWarning>,
}

impl<T> Outcome<T> {
    pub fn new(value: T, warnings: Vec<StockWarning>) -> Self {
        Outcome { value, warnings }
    }

    pub fn clean(value: T) -> Self {
        Outcome {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            warnings: self.warnings,
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
