//! # stockline-core: Pure Domain Logic for Stockline
//!
//! This crate holds the rules of a sales channel's stock lifecycle as pure
//! functions and plain types. It never touches a database or the network.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Stockline Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │           Operations dashboard / POS terminals                  │   │
//! │  │    channel forms ─ allocation upload ─ till ─ close-out form    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ plain data                             │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ stockline-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐          │   │
//! │  │   │ channel  │ │ request  │ │  ledger  │ │ closeout │          │   │
//! │  │   │ lifecycle│ │ pipeline │ │ counters │ │ clamping │          │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────┘          │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐          │   │
//! │  │   │   sale   │ │  events  │ │  money   │ │validation│          │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────┘          │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 stockline-db (Database Layer)                   │   │
//! │  │      SQLite transactions, status CAS, guarded ledger updates    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`channel`] - Sales channel types and the channel transition table
//! - [`request`] - Stock request pipeline, allocation and receiving checks
//! - [`ledger`] - Per-barcode received/sold counters and the debit model
//! - [`sale`] - Baskets, totals, sale records
//! - [`closeout`] - Damaged/missing/returned split and conservation check
//! - [`events`] - Domain events and the activation hook
//! - [`money`] - Integer money
//! - [`error`] - Errors, warnings, [`Outcome`]
//! - [`validation`] - Field-level input checks
//!
//! ## Example Usage
//!
//! ```rust
//! use stockline_core::channel::{ChannelEvent, ChannelStatus};
//!
//! let status = ChannelStatus::Draft.apply(ChannelEvent::Submit).unwrap();
//! assert_eq!(status, ChannelStatus::Submitted);
//!
//! // Only draft, submitted and approved channels can be cancelled.
//! assert!(ChannelStatus::Active.apply(ChannelEvent::Cancel).is_err());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod channel;
pub mod closeout;
pub mod error;
pub mod events;
pub mod ledger;
pub mod money;
pub mod request;
pub mod sale;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use channel::{ChannelEvent, ChannelStatus, ChannelType, NewChannel, SalesChannel};
pub use closeout::{CloseOutEntry, CloseOutInput};
pub use error::{CoreError, CoreResult, Outcome, StockWarning, ValidationError};
pub use events::DomainEvent;
pub use ledger::{DebitLine, LedgerEntry, LedgerSnapshot};
pub use money::Money;
pub use request::{RequestEvent, RequestStatus, RequestType, StockRequest};
pub use sale::{NewSale, Sale, SaleLine, SaleStatus};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines in one POS basket.
pub const MAX_BASKET_LINES: usize = 100;

/// Maximum quantity on a single sale line.
///
/// Catches a mistyped `1000` for `10` at the till.
pub const MAX_LINE_QUANTITY: i64 = 999;

/// Maximum total quantity of one stock request.
pub const MAX_REQUEST_QUANTITY: i64 = 100_000;

/// Maximum allocated or received quantity on one receiving line.
///
/// Keeps the ledger's running `received` far inside `i64`.
pub const MAX_RECEIVING_QUANTITY: i64 = MAX_REQUEST_QUANTITY;
