//! # Sales Channel Lifecycle
//!
//! A channel is a temporary EVENT booth or a permanent BRANCH. Its status is
//! driven by one transition table, checked here and nowhere else.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  draft ──submit──► submitted                                            │
//! │    │                  │                                                 │
//! │    └──────approve─────┴──► approved ──activate──► active                │
//! │                              │          (INITIAL   │                    │
//! │   cancel (draft/submitted/   │           received) │ close_stock         │
//! │           approved) ─────────┴──► cancelled        ▼                    │
//! │                                              pending_return             │
//! │                                                    │ ship_return        │
//! │                                                    ▼                    │
//! │                                                returning                │
//! │                                                    │ confirm_return     │
//! │                                                    ▼                    │
//! │        active / returned / completed ◄──────── returned ──complete──►   │
//! │                  │                                          completed   │
//! │                  │ submit_payment                                       │
//! │                  ▼                                                      │
//! │          pending_payment ──approve_payment──► payment_approved          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `completed` and the payment sub-flow are independent: a channel can be
//! closed manually and still go through payment approval afterwards.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::validation::{
    validate_channel_dates, validate_notes, validate_request_quantity, validate_required_text,
};

// =============================================================================
// Channel Type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    /// Temporary booth with a fixed date window.
    Event,
    /// Permanent store, no date window.
    Branch,
}

impl ChannelType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Event => "event",
            ChannelType::Branch => "branch",
        }
    }

    /// Prefix used in generated channel codes.
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            ChannelType::Event => "EV",
            ChannelType::Branch => "BR",
        }
    }
}

// =============================================================================
// Channel Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Draft,
    Submitted,
    Approved,
    Active,
    PendingReturn,
    Returning,
    Returned,
    PendingPayment,
    PaymentApproved,
    Completed,
    Cancelled,
}

impl ChannelStatus {
    pub const ALL: [ChannelStatus; 11] = [
        ChannelStatus::Draft,
        ChannelStatus::Submitted,
        ChannelStatus::Approved,
        ChannelStatus::Active,
        ChannelStatus::PendingReturn,
        ChannelStatus::Returning,
        ChannelStatus::Returned,
        ChannelStatus::PendingPayment,
        ChannelStatus::PaymentApproved,
        ChannelStatus::Completed,
        ChannelStatus::Cancelled,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Draft => "draft",
            ChannelStatus::Submitted => "submitted",
            ChannelStatus::Approved => "approved",
            ChannelStatus::Active => "active",
            ChannelStatus::PendingReturn => "pending_return",
            ChannelStatus::Returning => "returning",
            ChannelStatus::Returned => "returned",
            ChannelStatus::PendingPayment => "pending_payment",
            ChannelStatus::PaymentApproved => "payment_approved",
            ChannelStatus::Completed => "completed",
            ChannelStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<ChannelStatus> {
        ChannelStatus::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// POS sales are only accepted while the channel is trading.
    pub const fn accepts_sales(&self) -> bool {
        matches!(self, ChannelStatus::Active)
    }

    /// Received stock may still be credited to the ledger.
    ///
    /// Once close-out has snapshotted `remaining`, no further stock may land.
    pub const fn accepts_stock(&self) -> bool {
        matches!(
            self,
            ChannelStatus::Draft
                | ChannelStatus::Submitted
                | ChannelStatus::Approved
                | ChannelStatus::Active
        )
    }

    /// No event leaves this state.
    pub fn is_terminal(&self) -> bool {
        self.allowed_events().is_empty()
    }

    /// Events that are legal from this state, in table order.
    pub fn allowed_events(&self) -> Vec<ChannelEvent> {
        ChannelEvent::ALL
            .into_iter()
            .filter(|e| e.sources().contains(self))
            .collect()
    }

    /// Applies `event` to this state using the transition table.
    ///
    /// ## Errors
    /// `InvalidTransition` when the event is not legal from `self`.
    pub fn apply(self, event: ChannelEvent) -> CoreResult<ChannelStatus> {
        if event.sources().contains(&self) {
            Ok(event.target())
        } else {
            Err(CoreError::invalid_transition(
                "channel",
                event.sources(),
                self,
            ))
        }
    }
}

impl Default for ChannelStatus {
    fn default() -> Self {
        ChannelStatus::Draft
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Channel Events (transition table)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ChannelEvent {
    Submit,
    Approve,
    /// Fired by the activation hook, never by a user directly.
    Activate,
    /// Fired by the close-out engine.
    CloseStock,
    ShipReturn,
    ConfirmReturn,
    SubmitPayment,
    ApprovePayment,
    Complete,
    Cancel,
}

impl ChannelEvent {
    pub const ALL: [ChannelEvent; 10] = [
        ChannelEvent::Submit,
        ChannelEvent::Approve,
        ChannelEvent::Activate,
        ChannelEvent::CloseStock,
        ChannelEvent::ShipReturn,
        ChannelEvent::ConfirmReturn,
        ChannelEvent::SubmitPayment,
        ChannelEvent::ApprovePayment,
        ChannelEvent::Complete,
        ChannelEvent::Cancel,
    ];

    /// States this event may fire from.
    pub const fn sources(&self) -> &'static [ChannelStatus] {
        use ChannelStatus::*;
        match self {
            ChannelEvent::Submit => &[Draft],
            ChannelEvent::Approve => &[Draft, Submitted],
            ChannelEvent::Activate => &[Approved],
            ChannelEvent::CloseStock => &[Active],
            ChannelEvent::ShipReturn => &[PendingReturn],
            ChannelEvent::ConfirmReturn => &[Returning],
            ChannelEvent::SubmitPayment => &[Active, Returned, Completed],
            ChannelEvent::ApprovePayment => &[PendingPayment],
            ChannelEvent::Complete => &[Returned],
            ChannelEvent::Cancel => &[Draft, Submitted, Approved],
        }
    }

    /// State the event lands in.
    pub const fn target(&self) -> ChannelStatus {
        match self {
            ChannelEvent::Submit => ChannelStatus::Submitted,
            ChannelEvent::Approve => ChannelStatus::Approved,
            ChannelEvent::Activate => ChannelStatus::Active,
            ChannelEvent::CloseStock => ChannelStatus::PendingReturn,
            ChannelEvent::ShipReturn => ChannelStatus::Returning,
            ChannelEvent::ConfirmReturn => ChannelStatus::Returned,
            ChannelEvent::SubmitPayment => ChannelStatus::PendingPayment,
            ChannelEvent::ApprovePayment => ChannelStatus::PaymentApproved,
            ChannelEvent::Complete => ChannelStatus::Completed,
            ChannelEvent::Cancel => ChannelStatus::Cancelled,
        }
    }
}

// =============================================================================
// Sales Channel
// =============================================================================

/// A persisted sales channel.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SalesChannel {
    pub id: String,
    /// Human-facing unique code, e.g. `EV-261017-4F2A`.
    pub code: String,
    pub channel_type: ChannelType,
    pub name: String,
    pub location: String,
    pub status: ChannelStatus,
    #[ts(as = "Option<String>")]
    pub start_date: Option<NaiveDate>,
    #[ts(as = "Option<String>")]
    pub end_date: Option<NaiveDate>,
    pub sales_target_cents: Option<i64>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl SalesChannel {
    pub fn sales_target(&self) -> Option<Money> {
        self.sales_target_cents.map(Money::from_cents)
    }
}

/// A staff member assigned to work a channel. Identities belong to HR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StaffAssignment {
    pub staff_id: String,
    pub role: String,
}

/// Input of the channel-creation flow.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewChannel {
    pub channel_type: ChannelType,
    pub name: String,
    pub location: String,
    #[ts(as = "Option<String>")]
    pub start_date: Option<NaiveDate>,
    #[ts(as = "Option<String>")]
    pub end_date: Option<NaiveDate>,
    pub staff: Vec<StaffAssignment>,
    /// Coarse quantity of the INITIAL stock request.
    pub initial_quantity: i64,
    pub notes: String,
    pub sales_target: Option<Money>,
}

impl NewChannel {
    /// Checks every field; nothing is written if this fails.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_required_text("name", &self.name)?;
        validate_required_text("location", &self.location)?;
        validate_channel_dates(
            self.channel_type == ChannelType::Event,
            self.start_date,
            self.end_date,
        )?;
        validate_request_quantity(self.initial_quantity)?;
        validate_notes("notes", &self.notes)?;

        if let Some(target) = self.sales_target {
            if target.is_negative() {
                return Err(ValidationError::MustNotBeNegative {
                    field: "sales target".to_string(),
                });
            }
        }

        let mut seen = std::collections::HashSet::new();
        for member in &self.staff {
            validate_required_text("staff id", &member.staff_id)?;
            if !seen.insert(member.staff_id.as_str()) {
                return Err(ValidationError::Duplicate {
                    field: "staff id".to_string(),
                    value: member.staff_id.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Builds a channel code: `{EV|BR}-{YYMMDD}-{SUFFIX}`.
///
/// ```rust
/// use chrono::NaiveDate;
/// use stockline_core::channel::{channel_code, ChannelType};
///
/// let day = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
/// assert_eq!(channel_code(ChannelType::Event, day, "4f2a09c1"), "EV-261017-4F2A09C1");
/// ```
pub fn channel_code(channel_type: ChannelType, day: NaiveDate, suffix: &str) -> String {
    format!(
        "{}-{}-{}",
        channel_type.code_prefix(),
        day.format("%y%m%d"),
        suffix.to_uppercase()
    )
}
